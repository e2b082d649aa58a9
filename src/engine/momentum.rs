//! Momentum-volume strategy.
//!
//! Enters when a volume-leader trades above its short moving average with
//! RSI inside the entry band and today's volume surging over the trailing
//! average. Technical exit: overbought RSI combined with a price
//! down-tick.

use crate::config::MomentumConfig;
use crate::engine::indicators::{moving_average, rsi, volume_ratio, RSI_PERIOD};
use crate::engine::ledger::Position;
use crate::engine::signal::Signal;
use crate::engine::strategy::{in_band, EvalContext, Strategy};
use crate::broker::Candidate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub struct MomentumStrategy {
    config: MomentumConfig,
}

impl MomentumStrategy {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    /// RSI over completed closes with today's price as the latest bar.
    fn current_rsi(&self, ctx: &EvalContext<'_>) -> Option<Decimal> {
        let mut closes: Vec<Decimal> = ctx.history.iter().map(|c| c.close).collect();
        closes.push(ctx.quote.price);
        rsi(&closes, RSI_PERIOD)
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &'static str {
        "momentum-volume"
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
        let period = self.config.ma_period;

        let volumes: Vec<Decimal> = ctx
            .history
            .iter()
            .rev()
            .take(period)
            .map(|c| c.volume)
            .collect();
        let Some(ratio) = volume_ratio(ctx.quote.volume, &volumes) else {
            return Signal::hold(symbol, "volume history unavailable");
        };
        if ratio < self.config.volume_ratio_threshold {
            return Signal::hold(
                symbol,
                format!(
                    "volume ratio {ratio:.2} below {}",
                    self.config.volume_ratio_threshold
                ),
            );
        }

        let closes: Vec<Decimal> = ctx.history.iter().map(|c| c.close).collect();
        let Some(ma) = moving_average(&closes, period) else {
            return Signal::hold(symbol, "insufficient history for moving average");
        };
        if ctx.quote.price <= ma {
            return Signal::hold(symbol, format!("price not above {period}-day average {ma:.0}"));
        }

        let Some(rsi_value) = self.current_rsi(ctx) else {
            return Signal::hold(symbol, "insufficient history for RSI");
        };
        if !in_band(
            rsi_value,
            self.config.rsi_entry_min,
            self.config.rsi_entry_max,
        ) {
            return Signal::hold(symbol, format!("RSI {rsi_value:.1} outside entry band"));
        }

        // Stronger surges read as higher conviction, capped at 1.0.
        let surge = (ratio / self.config.volume_ratio_threshold)
            .to_f64()
            .unwrap_or(1.0);
        let confidence = (0.5 + 0.25 * surge).min(1.0);

        Signal::buy(
            symbol,
            confidence,
            format!(
                "price {} above ma{period} {ma:.0}, RSI {rsi_value:.1}, volume x{ratio:.2}",
                ctx.quote.price
            ),
        )
    }

    fn exit_trigger(&self, position: &Position, ctx: &EvalContext<'_>) -> Option<String> {
        let rsi_value = self.current_rsi(ctx)?;
        let down_tick = ctx.quote.price < ctx.quote.prev_close;
        if rsi_value > self.config.rsi_overbought && down_tick {
            return Some(format!(
                "RSI {rsi_value:.1} overbought with down-tick on {}",
                position.symbol
            ));
        }
        None
    }
}
