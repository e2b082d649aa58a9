//! Volatility-breakout strategy.
//!
//! Enters when the price clears `open + k * (prev_high - prev_low)`
//! inside the configured entry window; every position is flattened once
//! the exit time passes.

use crate::broker::Candidate;
use crate::config::BreakoutConfig;
use crate::engine::ledger::Position;
use crate::engine::signal::Signal;
use crate::engine::strategy::{in_band, EvalContext, Strategy};
use anyhow::Result;
use chrono::NaiveTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub struct BreakoutStrategy {
    config: BreakoutConfig,
    entry_start: NaiveTime,
    entry_end: NaiveTime,
    exit_time: NaiveTime,
}

impl BreakoutStrategy {
    pub fn new(config: BreakoutConfig) -> Result<Self> {
        let (entry_start, entry_end) = config.entry_window()?;
        let exit_time = config.parsed_exit_time()?;
        Ok(Self {
            config,
            entry_start,
            entry_end,
            exit_time,
        })
    }

    /// Breakout target from yesterday's range and today's open.
    fn target(&self, ctx: &EvalContext<'_>) -> Option<Decimal> {
        let prev = ctx.history.last()?;
        Some(ctx.quote.open + self.config.k_value * (prev.high - prev.low))
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "volatility-breakout"
    }

    fn screen(&self, candidate: &Candidate) -> bool {
        in_band(candidate.price, self.config.min_price, self.config.max_price)
            && in_band(
                candidate.change_rate,
                self.config.min_change_rate,
                self.config.max_change_rate,
            )
    }

    fn confirm(&self, candidate: &Candidate, ctx: &EvalContext<'_>) -> Signal {
        let symbol = candidate.symbol.as_str();

        let time = ctx.now_local.time();
        if time < self.entry_start || time > self.entry_end {
            return Signal::hold(symbol, "outside entry window");
        }

        let Some(target) = self.target(ctx) else {
            return Signal::hold(symbol, "no previous session range");
        };
        if ctx.quote.price <= target {
            return Signal::hold(symbol, format!("price below breakout target {target:.0}"));
        }

        // Conviction grows with the margin above the target.
        let margin = ((ctx.quote.price - target) / target)
            .to_f64()
            .unwrap_or(0.0);
        let confidence = (0.6 + margin * 10.0).min(1.0);

        Signal::buy(
            symbol,
            confidence,
            format!("price {} broke target {target:.0}", ctx.quote.price),
        )
    }

    fn exit_trigger(&self, position: &Position, ctx: &EvalContext<'_>) -> Option<String> {
        if ctx.now_local.time() >= self.exit_time {
            return Some(format!(
                "past session exit time {} on {}",
                self.exit_time.format("%H:%M"),
                position.symbol
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{DailyCandle, Quote};
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use rust_decimal_macros::dec;

    fn prev_day(high: i64, low: i64) -> Vec<DailyCandle> {
        vec![DailyCandle {
            date: NaiveDate::from_ymd_opt(2026, 8, 2).unwrap(),
            open: Decimal::from(low),
            high: Decimal::from(high),
            low: Decimal::from(low),
            close: Decimal::from(high),
            volume: dec!(100_000),
        }]
    }

    fn quote(price: i64, open: i64) -> Quote {
        Quote {
            symbol: "069500".into(),
            price: Decimal::from(price),
            open: Decimal::from(open),
            high: Decimal::from(price),
            low: Decimal::from(open),
            prev_close: Decimal::from(open),
            change_rate: dec!(0.01),
            volume: dec!(500_000),
        }
    }

    fn candidate(price: i64) -> Candidate {
        Candidate {
            symbol: "069500".into(),
            name: "test".into(),
            price: Decimal::from(price),
            change_rate: dec!(0.01),
            volume: dec!(500_000),
            rank: 1,
        }
    }

    fn at(time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    fn strategy() -> BreakoutStrategy {
        BreakoutStrategy::new(BreakoutConfig::default()).unwrap()
    }

    #[test]
    fn test_buy_above_target_inside_window() {
        // Yesterday's range 1000 wide, k 0.5: target = open + 500.
        let history = prev_day(10_500, 9_500);
        let q = quote(10_600, 10_000);
        let ctx = EvalContext {
            quote: &q,
            history: &history,
            now_local: at((10, 0)),
        };
        let signal = strategy().confirm(&candidate(10_600), &ctx);
        assert!(signal.is_buy(), "got {:?}", signal.reason);
    }

    #[test]
    fn test_hold_at_or_below_target() {
        let history = prev_day(10_500, 9_500);
        let q = quote(10_500, 10_000); // exactly the target
        let ctx = EvalContext {
            quote: &q,
            history: &history,
            now_local: at((10, 0)),
        };
        assert!(!strategy().confirm(&candidate(10_500), &ctx).is_buy());
    }

    #[test]
    fn test_hold_outside_entry_window() {
        let history = prev_day(10_500, 9_500);
        let q = quote(10_600, 10_000);
        let ctx = EvalContext {
            quote: &q,
            history: &history,
            now_local: at((8, 30)),
        };
        let signal = strategy().confirm(&candidate(10_600), &ctx);
        assert!(!signal.is_buy());
        assert!(signal.reason.contains("entry window"));
    }

    #[test]
    fn test_exit_after_configured_time() {
        let history = prev_day(10_500, 9_500);
        let q = quote(10_600, 10_000);
        let position = Position {
            symbol: "069500".into(),
            quantity: dec!(10),
            entry_price: dec!(10_000),
            entry_time: Utc::now(),
        };

        let before = EvalContext {
            quote: &q,
            history: &history,
            now_local: at((14, 0)),
        };
        assert!(strategy().exit_trigger(&position, &before).is_none());

        let after = EvalContext {
            quote: &q,
            history: &history,
            now_local: at((15, 10)),
        };
        assert!(strategy().exit_trigger(&position, &after).is_some());
    }
}
