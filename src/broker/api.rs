//! The operation surface the strategy engine consumes.
//!
//! Implemented by the live [`BrokerClient`](crate::broker::BrokerClient)
//! and by the in-memory fake the engine tests drive. Each operation
//! returns a typed result; failures arrive as classified
//! [`BrokerError`](crate::broker::BrokerError)s, never raw payloads.

use crate::broker::error::BrokerResult;
use crate::broker::types::{
    AccountSnapshot, Candidate, DailyCandle, OrderReceipt, OrderRequest, Quote,
};
use async_trait::async_trait;

#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Authoritative cash and holdings for the configured account.
    async fn account_snapshot(&self) -> BrokerResult<AccountSnapshot>;

    /// Current quote for one instrument.
    async fn quote(&self, symbol: &str) -> BrokerResult<Quote>;

    /// Up to `count` daily bars, oldest first, most recent last.
    async fn daily_candles(&self, symbol: &str, count: usize) -> BrokerResult<Vec<DailyCandle>>;

    /// Ranked screening query (volume leaders), best rank first.
    async fn volume_leaders(&self, limit: usize) -> BrokerResult<Vec<Candidate>>;

    /// Submit an order. The receipt reflects the broker's synchronous
    /// accept/reject answer; nothing stronger is guaranteed.
    async fn submit_order(&self, order: &OrderRequest) -> BrokerResult<OrderReceipt>;
}
