//! In-memory broker fake shared by the engine and runner tests.
//!
//! Serves preset snapshots, quotes and rankings, records every submitted
//! order, and can be switched into failure modes (per-symbol quote
//! faults, order rejection, credential failure).

use crate::broker::{
    AccountSnapshot, BrokerApi, BrokerError, BrokerResult, Candidate, DailyCandle, Holding,
    OrderReceipt, OrderRequest, Quote,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub(crate) struct FakeBroker {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    cash: Decimal,
    holdings: Vec<Holding>,
    quotes: HashMap<String, Quote>,
    histories: HashMap<String, Vec<DailyCandle>>,
    leaders: Vec<Candidate>,
    failing_quotes: HashSet<String>,
    reject_message: Option<String>,
    auth_down: bool,
    orders: Vec<OrderRequest>,
    next_order_id: u64,
}

impl FakeBroker {
    pub fn new(cash: Decimal) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cash,
                next_order_id: 1,
                ..Inner::default()
            }),
        }
    }

    pub fn set_holding(&self, symbol: &str, quantity: Decimal, avg_price: Decimal) {
        self.inner.lock().unwrap().holdings.push(Holding {
            symbol: symbol.to_string(),
            quantity,
            avg_price,
        });
    }

    pub fn clear_holdings(&self) {
        self.inner.lock().unwrap().holdings.clear();
    }

    pub fn set_quote(&self, symbol: &str, price: Decimal, prev_close: Decimal, volume: Decimal) {
        let change_rate = if prev_close.is_zero() {
            Decimal::ZERO
        } else {
            (price - prev_close) / prev_close
        };
        self.inner.lock().unwrap().quotes.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                price,
                open: prev_close,
                high: price.max(prev_close),
                low: price.min(prev_close),
                prev_close,
                change_rate,
                volume,
            },
        );
    }

    /// Daily bars from flat-volume closes, oldest first.
    pub fn set_history(&self, symbol: &str, closes: &[i64], volume: i64) {
        let start = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let close = Decimal::from(*close);
                DailyCandle {
                    date: start
                        .checked_add_days(chrono::Days::new(i as u64))
                        .unwrap(),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: Decimal::from(volume),
                }
            })
            .collect();
        self.inner
            .lock()
            .unwrap()
            .histories
            .insert(symbol.to_string(), candles);
    }

    pub fn set_leader(&self, symbol: &str, price: Decimal, change_rate: Decimal) {
        let mut inner = self.inner.lock().unwrap();
        let rank = inner.leaders.len() as u32 + 1;
        inner.leaders.push(Candidate {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price,
            change_rate,
            volume: dec!(1_000_000),
            rank,
        });
    }

    pub fn fail_quote(&self, symbol: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_quotes
            .insert(symbol.to_string());
    }

    pub fn reject_orders(&self, message: &str) {
        self.inner.lock().unwrap().reject_message = Some(message.to_string());
    }

    pub fn fail_auth(&self) {
        self.inner.lock().unwrap().auth_down = true;
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.inner.lock().unwrap().orders.clone()
    }

    fn check_auth(&self) -> BrokerResult<()> {
        if self.inner.lock().unwrap().auth_down {
            Err(BrokerError::Auth("credential revoked".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerApi for FakeBroker {
    async fn account_snapshot(&self) -> BrokerResult<AccountSnapshot> {
        self.check_auth()?;
        let inner = self.inner.lock().unwrap();
        Ok(AccountSnapshot {
            cash: inner.cash,
            holdings: inner.holdings.clone(),
        })
    }

    async fn quote(&self, symbol: &str) -> BrokerResult<Quote> {
        self.check_auth()?;
        let inner = self.inner.lock().unwrap();
        if inner.failing_quotes.contains(symbol) {
            return Err(BrokerError::Transient {
                endpoint: "quote".into(),
                attempts: 3,
                message: "injected fault".into(),
            });
        }
        inner
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::Transient {
                endpoint: "quote".into(),
                attempts: 3,
                message: format!("no quote for {symbol}"),
            })
    }

    async fn daily_candles(&self, symbol: &str, count: usize) -> BrokerResult<Vec<DailyCandle>> {
        self.check_auth()?;
        let inner = self.inner.lock().unwrap();
        let candles = inner.histories.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(count);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn volume_leaders(&self, limit: usize) -> BrokerResult<Vec<Candidate>> {
        self.check_auth()?;
        let mut leaders = self.inner.lock().unwrap().leaders.clone();
        leaders.truncate(limit);
        Ok(leaders)
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerResult<OrderReceipt> {
        self.check_auth()?;
        let mut inner = self.inner.lock().unwrap();
        inner.orders.push(order.clone());
        if let Some(message) = inner.reject_message.clone() {
            return Ok(OrderReceipt {
                order_id: None,
                accepted: false,
                message,
                submitted_at: Utc::now(),
            });
        }
        let order_id = inner.next_order_id;
        inner.next_order_id += 1;
        Ok(OrderReceipt {
            order_id: Some(order_id.to_string()),
            accepted: true,
            message: String::new(),
            submitted_at: Utc::now(),
        })
    }
}
