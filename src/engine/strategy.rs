//! Strategy seam: the pure decision rules the engine drives.
//!
//! The engine owns all I/O; a strategy only ever sees data already
//! fetched for it, which keeps every rule unit-testable against fixed
//! snapshots.

use crate::broker::{Candidate, DailyCandle, Quote};
use crate::engine::ledger::Position;
use crate::engine::signal::Signal;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// Market data assembled for one symbol in one cycle.
///
/// `history` holds completed daily bars oldest-first; today's session is
/// represented by `quote` only.
pub struct EvalContext<'a> {
    pub quote: &'a Quote,
    pub history: &'a [DailyCandle],
    pub now_local: NaiveDateTime,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap pre-filter over a ranking row, before any per-symbol fetches.
    fn screen(&self, candidate: &Candidate) -> bool;

    /// Full entry confirmation once quote and history are available.
    fn confirm(&self, candidate: &Candidate, ctx: &EvalContext<'_>) -> Signal;

    /// Strategy-specific technical exit. Returns the exit reason when it
    /// fires. Evaluated only after take-profit, stop-loss and max-hold.
    fn exit_trigger(&self, position: &Position, ctx: &EvalContext<'_>) -> Option<String>;
}

pub(crate) fn in_band(value: Decimal, min: Decimal, max: Decimal) -> bool {
    min <= value && value <= max
}
