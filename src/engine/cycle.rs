//! The per-cycle trading state machine.
//!
//! Strict order inside one cycle: reconcile against the broker, evaluate
//! exits for every held position, gate entries, screen ranked candidates,
//! confirm signals, size and submit. A failure on one symbol skips that
//! symbol only; the cycle never aborts for bad market data. Only an
//! authentication failure halts the engine.

use crate::broker::{BrokerApi, BrokerError, Candidate, OrderReceipt, OrderRequest, OrderSide};
use crate::config::TradingConfig;
use crate::engine::ledger::{Position, PositionLedger};
use crate::engine::signal::{PositionSizer, RatioSizer, SignalSource};
use crate::engine::strategy::{EvalContext, Strategy};
use crate::persistence::{TradeLog, TradeRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Daily bars fetched per symbol: covers RSI(14) with headroom for the
/// short moving average.
const HISTORY_BARS: usize = 30;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Trading cannot continue without a valid session.
    #[error("session authentication failed: {0}")]
    Auth(#[source] BrokerError),

    /// The cycle could not run to completion; the scheduler cools down
    /// and tries again.
    #[error("cycle failed: {0}")]
    Cycle(String),
}

/// Why a position was closed. Ordered by evaluation priority.
#[derive(Debug, Clone)]
enum ExitReason {
    TakeProfit(Decimal),
    StopLoss(Decimal),
    MaxHoldDays(i64),
    Technical(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit(rate) => write!(f, "take-profit at {:.2}%", rate * Decimal::from(100)),
            ExitReason::StopLoss(rate) => write!(f, "stop-loss at {:.2}%", rate * Decimal::from(100)),
            ExitReason::MaxHoldDays(days) => write!(f, "held {days} days, over limit"),
            ExitReason::Technical(reason) => write!(f, "{reason}"),
        }
    }
}

/// What one cycle did, for the scheduler's log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub exits: usize,
    pub entries: usize,
    pub candidates: usize,
}

/// Drives one strategy over one account. The scheduler calls
/// [`run_cycle`](Self::run_cycle) strictly sequentially, so engine state
/// needs no locking of its own.
pub struct StrategyEngine<B: BrokerApi> {
    broker: Arc<B>,
    strategy: Box<dyn Strategy>,
    sizer: Box<dyn PositionSizer>,
    signal_source: Option<Box<dyn SignalSource>>,
    config: TradingConfig,
    ledger: PositionLedger,
    trade_log: Option<TradeLog>,
    daily_buys: u32,
    counter_date: Option<NaiveDate>,
}

impl<B: BrokerApi> StrategyEngine<B> {
    pub fn new(broker: Arc<B>, strategy: Box<dyn Strategy>, config: TradingConfig) -> Self {
        let sizer = Box::new(RatioSizer::new(config.position_ratio));
        Self {
            broker,
            strategy,
            sizer,
            signal_source: None,
            config,
            ledger: PositionLedger::new(),
            trade_log: None,
            daily_buys: 0,
            counter_date: None,
        }
    }

    /// Replace the default cash-ratio sizer with an external one.
    pub fn with_sizer(mut self, sizer: Box<dyn PositionSizer>) -> Self {
        self.sizer = sizer;
        self
    }

    /// Add an external signal source that can veto rule-confirmed entries.
    pub fn with_signal_source(mut self, source: Box<dyn SignalSource>) -> Self {
        self.signal_source = Some(source);
        self
    }

    /// Record every submission in the local trade log.
    pub fn with_trade_log(mut self, log: TradeLog) -> Self {
        self.trade_log = Some(log);
        self
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Run one full cycle. `now` stamps decisions, `now_local` feeds the
    /// time-of-day rules; the scheduler passes the current wall clock,
    /// tests pass fixtures.
    pub async fn run_cycle(
        &mut self,
        now: DateTime<Utc>,
        now_local: NaiveDateTime,
    ) -> Result<CycleReport, EngineError> {
        let mut report = CycleReport::default();

        // 1. Reconcile. The buy counter resets once per calendar day.
        let today = now.date_naive();
        if self.counter_date != Some(today) {
            if self.counter_date.is_some() {
                info!(buys_yesterday = self.daily_buys, "daily buy counter reset");
            }
            self.daily_buys = 0;
            self.counter_date = Some(today);
        }

        let snapshot = match self.broker.account_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_auth() => return Err(EngineError::Auth(e)),
            Err(e) => return Err(EngineError::Cycle(format!("balance fetch failed: {e}"))),
        };
        self.ledger.reconcile(&snapshot.holdings, now);
        let mut cash = snapshot.cash;
        debug!(%cash, positions = self.ledger.len(), "reconciled");

        // 2. Evaluate exits, one position at a time.
        for symbol in self.ledger.symbols() {
            match self.evaluate_exit(&symbol, now, now_local).await {
                Ok(true) => report.exits += 1,
                Ok(false) => {}
                Err(e) if e.is_auth() => return Err(EngineError::Auth(e)),
                Err(e) => {
                    warn!(%symbol, error = %e, "exit evaluation failed, skipping position this cycle");
                }
            }
        }

        // 3. Entry gate.
        if self.ledger.len() >= self.config.max_positions {
            debug!(open = self.ledger.len(), "at max positions, no entries this cycle");
            return Ok(report);
        }
        if self.daily_buys >= self.config.max_buys_per_day {
            debug!(buys = self.daily_buys, "daily buy limit reached, no entries this cycle");
            return Ok(report);
        }
        if cash <= self.config.min_cash {
            debug!(%cash, "cash at floor, no entries this cycle");
            return Ok(report);
        }

        // 4. Screen ranked candidates.
        let candidates = match self.broker.volume_leaders(self.config.candidate_limit).await {
            Ok(candidates) => candidates,
            Err(e) if e.is_auth() => return Err(EngineError::Auth(e)),
            Err(e) => {
                warn!(error = %e, "screening query failed, no entries this cycle");
                Vec::new()
            }
        };
        report.candidates = candidates.len();

        // 5./6. Confirm, size and submit per candidate.
        for candidate in candidates {
            if self.ledger.len() >= self.config.max_positions
                || self.daily_buys >= self.config.max_buys_per_day
                || cash <= self.config.min_cash
            {
                break;
            }
            if self.ledger.get(&candidate.symbol).is_some() {
                continue;
            }
            if !self.strategy.screen(&candidate) {
                continue;
            }

            match self.try_enter(&candidate, cash, now, now_local).await {
                Ok(Some(spent)) => {
                    report.entries += 1;
                    cash -= spent;
                }
                Ok(None) => {}
                Err(e) if e.is_auth() => return Err(EngineError::Auth(e)),
                Err(e) => {
                    warn!(symbol = %candidate.symbol, error = %e, "candidate failed, skipping");
                }
            }
        }

        Ok(report)
    }

    /// Evaluate exit rules for one held position, selling on the first
    /// match. Returns whether an exit order was accepted.
    async fn evaluate_exit(
        &mut self,
        symbol: &str,
        now: DateTime<Utc>,
        now_local: NaiveDateTime,
    ) -> Result<bool, BrokerError> {
        let Some(position) = self.ledger.get(symbol).cloned() else {
            return Ok(false);
        };
        let quantity = position.quantity.to_u64().unwrap_or(0);
        if quantity == 0 {
            return Ok(false);
        }

        let quote = self.broker.quote(symbol).await?;
        let history = self.broker.daily_candles(symbol, HISTORY_BARS).await?;
        let ctx = EvalContext {
            quote: &quote,
            history: &history,
            now_local,
        };

        let Some(reason) = self.exit_reason(&position, &ctx, now) else {
            return Ok(false);
        };
        info!(%symbol, %reason, quantity, "exit rule matched, selling");

        let order = OrderRequest::market(symbol, OrderSide::Sell, quantity);
        let receipt = self.broker.submit_order(&order).await?;
        self.log_trade(&order, quote.price, &receipt, reason.to_string());

        if receipt.accepted {
            self.ledger.record_exit(symbol);
            info!(%symbol, order_id = ?receipt.order_id, "sell accepted");
            Ok(true)
        } else {
            warn!(%symbol, message = %receipt.message, "sell rejected");
            Ok(false)
        }
    }

    /// Exit priority: take-profit (boundary inclusive), stop-loss,
    /// max hold days, then the strategy's technical trigger.
    fn exit_reason(
        &self,
        position: &Position,
        ctx: &EvalContext<'_>,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        if position.entry_price.is_zero() {
            return None;
        }
        let profit_rate = (ctx.quote.price - position.entry_price) / position.entry_price;

        if profit_rate >= self.config.take_profit_rate {
            return Some(ExitReason::TakeProfit(profit_rate));
        }
        if profit_rate <= -self.config.stop_loss_rate {
            return Some(ExitReason::StopLoss(profit_rate));
        }

        let held = (now.date_naive() - position.entry_time.date_naive()).num_days();
        if held > self.config.max_hold_days {
            return Some(ExitReason::MaxHoldDays(held));
        }

        self.strategy
            .exit_trigger(position, ctx)
            .map(ExitReason::Technical)
    }

    /// Confirm, size and submit one candidate. Returns the cash spent on
    /// an accepted buy.
    async fn try_enter(
        &mut self,
        candidate: &Candidate,
        available_cash: Decimal,
        now: DateTime<Utc>,
        now_local: NaiveDateTime,
    ) -> Result<Option<Decimal>, BrokerError> {
        let symbol = candidate.symbol.as_str();
        let quote = self.broker.quote(symbol).await?;
        let history = self.broker.daily_candles(symbol, HISTORY_BARS).await?;
        let ctx = EvalContext {
            quote: &quote,
            history: &history,
            now_local,
        };

        let signal = self.strategy.confirm(candidate, &ctx);
        if !signal.is_buy() {
            debug!(%symbol, reason = %signal.reason, "entry not confirmed");
            return Ok(None);
        }
        info!(
            %symbol,
            confidence = signal.confidence,
            reason = %signal.reason,
            "entry signal confirmed"
        );

        if let Some(source) = &self.signal_source {
            match source.evaluate(symbol, &history).await {
                Ok(external) if !external.is_buy() => {
                    info!(%symbol, action = %external.action, reason = %external.reason,
                        "external signal vetoed entry");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%symbol, error = %e, "external signal source failed, proceeding on rules");
                }
            }
        }

        let budget = match self.sizer.recommend_cash(&signal, available_cash).await {
            Ok(budget) => budget,
            Err(e) => {
                warn!(%symbol, error = %e, "sizer failed, skipping candidate");
                return Ok(None);
            }
        };
        if quote.price.is_zero() {
            return Ok(None);
        }
        let quantity = (budget / quote.price).floor().to_u64().unwrap_or(0);
        if quantity < 1 {
            debug!(%symbol, %budget, price = %quote.price, "size below one share, skipping");
            return Ok(None);
        }

        let order = OrderRequest::market(symbol, OrderSide::Buy, quantity);
        let receipt = self.broker.submit_order(&order).await?;
        self.log_trade(&order, quote.price, &receipt, signal.reason.clone());

        if receipt.accepted {
            self.ledger
                .record_entry(symbol, quote.price, Decimal::from(quantity), now);
            self.daily_buys += 1;
            info!(%symbol, quantity, order_id = ?receipt.order_id, "buy accepted");
            Ok(Some(quote.price * Decimal::from(quantity)))
        } else {
            warn!(%symbol, message = %receipt.message, "buy rejected");
            Ok(None)
        }
    }

    fn log_trade(&self, order: &OrderRequest, price: Decimal, receipt: &OrderReceipt, reason: String) {
        let Some(log) = &self.trade_log else { return };
        let record = TradeRecord {
            timestamp: receipt.submitted_at,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            order_id: receipt.order_id.clone(),
            accepted: receipt.accepted,
            message: receipt.message.clone(),
            strategy: self.strategy.name().to_string(),
            reason,
        };
        if let Err(e) = log.append(&record) {
            warn!(error = %e, "failed to append trade record");
        }
    }
}
