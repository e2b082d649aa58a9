//! Trading orchestration.
//!
//! The engine turns broker data into decisions: per-cycle reconciliation,
//! exit rules, entry screening and confirmation, sizing and submission.
//! The runner schedules cycles around market hours and control signals.

mod breakout;
mod cycle;
mod indicators;
mod ledger;
mod momentum;
mod runner;
mod signal;
mod strategy;
#[cfg(test)]
pub(crate) mod testing;

pub use breakout::BreakoutStrategy;
pub use cycle::{CycleReport, EngineError, StrategyEngine};
pub use indicators::{moving_average, rsi, volume_ratio, RSI_PERIOD};
pub use ledger::{Position, PositionLedger};
pub use momentum::MomentumStrategy;
pub use runner::{RunState, Runner, RunnerHandle};
pub use signal::{PositionSizer, RatioSizer, Signal, SignalAction, SignalSource};
pub use strategy::{EvalContext, Strategy};
