//! Trading signals and the collaborator seams around them.
//!
//! Signal generation beyond the built-in rule strategies (learned agents,
//! factor ensembles) lives outside this crate and is consumed through the
//! narrow traits below.

use crate::broker::DailyCandle;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

/// Directional recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// A directional recommendation with its supporting rationale.
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    /// 0.0-1.0
    pub confidence: f64,
    pub reason: String,
}

impl Signal {
    pub fn hold(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: SignalAction::Hold,
            confidence: 0.0,
            reason: reason.into(),
        }
    }

    pub fn buy(symbol: &str, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: SignalAction::Buy,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.action == SignalAction::Buy
    }
}

/// External signal generator: given a symbol and its history, produce a
/// signal with confidence. When configured, a non-BUY answer vetoes a
/// rule-confirmed entry.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn evaluate(&self, symbol: &str, history: &[DailyCandle]) -> anyhow::Result<Signal>;
}

/// External position sizer: given a signal, recommend the cash to commit.
#[async_trait]
pub trait PositionSizer: Send + Sync {
    async fn recommend_cash(
        &self,
        signal: &Signal,
        available_cash: Decimal,
    ) -> anyhow::Result<Decimal>;
}

/// Default sizer: a fixed fraction of available cash per entry.
pub struct RatioSizer {
    position_ratio: Decimal,
}

impl RatioSizer {
    pub fn new(position_ratio: Decimal) -> Self {
        Self { position_ratio }
    }
}

#[async_trait]
impl PositionSizer for RatioSizer {
    async fn recommend_cash(
        &self,
        _signal: &Signal,
        available_cash: Decimal,
    ) -> anyhow::Result<Decimal> {
        Ok(available_cash * self.position_ratio)
    }
}
