//! Engine-local record of open positions.
//!
//! The ledger caches entry metadata (price, time) needed by the exit
//! rules. It is not the source of truth for quantity: every cycle starts
//! by reconciling against the broker's balance snapshot, and the broker
//! wins any disagreement.

use crate::broker::Holding;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

/// An open holding tracked for exit-rule evaluation.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed BUY fill.
    pub fn record_entry(
        &mut self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        time: DateTime<Utc>,
    ) {
        self.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                quantity,
                entry_price: price,
                entry_time: time,
            },
        );
    }

    /// Record a confirmed full SELL fill; the symbol leaves the ledger.
    pub fn record_exit(&mut self, symbol: &str) {
        self.positions.remove(symbol);
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Whole calendar days the position has been held.
    pub fn held_days(&self, symbol: &str, now: DateTime<Utc>) -> Option<i64> {
        self.positions
            .get(symbol)
            .map(|p| (now.date_naive() - p.entry_time.date_naive()).num_days())
    }

    /// Align the ledger with the broker's authoritative holdings.
    ///
    /// Ledger entries the broker no longer reports are dropped, broker
    /// holdings the ledger never saw are adopted with the broker's average
    /// price and `now` as the entry time, and quantities always follow
    /// the broker.
    pub fn reconcile(&mut self, holdings: &[Holding], now: DateTime<Utc>) {
        let held: HashMap<&str, &Holding> = holdings
            .iter()
            .filter(|h| h.quantity > Decimal::ZERO)
            .map(|h| (h.symbol.as_str(), h))
            .collect();

        let stale: Vec<String> = self
            .positions
            .keys()
            .filter(|symbol| !held.contains_key(symbol.as_str()))
            .cloned()
            .collect();
        for symbol in stale {
            warn!(%symbol, "ledger position no longer held at broker, dropping");
            self.positions.remove(&symbol);
        }

        for (symbol, holding) in held {
            match self.positions.get_mut(symbol) {
                Some(position) => {
                    if position.quantity != holding.quantity {
                        warn!(
                            %symbol,
                            ledger_qty = %position.quantity,
                            broker_qty = %holding.quantity,
                            "quantity mismatch, broker wins"
                        );
                        position.quantity = holding.quantity;
                    }
                }
                None => {
                    info!(
                        %symbol,
                        quantity = %holding.quantity,
                        avg_price = %holding.avg_price,
                        "adopting broker holding unknown to ledger"
                    );
                    self.positions.insert(
                        symbol.to_string(),
                        Position {
                            symbol: symbol.to_string(),
                            quantity: holding.quantity,
                            entry_price: holding.avg_price,
                            entry_time: now,
                        },
                    );
                }
            }
        }
    }
}
