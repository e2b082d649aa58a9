//! Technical indicators over daily closes.
//!
//! All functions take bars oldest-first and return the latest value, or
//! `None` when the series is too short to evaluate. Division-by-zero
//! cases are mapped to defined results up front: a flat loss series is
//! RSI 100, a zero volume average disables the ratio filter.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Standard RSI lookback.
pub const RSI_PERIOD: usize = 14;

/// Wilder RSI of the final bar.
///
/// First averages are simple means over the first `period` changes;
/// subsequent bars use Wilder smoothing
/// `avg = (prev_avg * (period - 1) + current) / period`.
/// A zero average loss yields 100, not a division fault.
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: &Decimal| if *c > Decimal::ZERO { *c } else { Decimal::ZERO };
    let loss = |c: &Decimal| if *c < Decimal::ZERO { -*c } else { Decimal::ZERO };

    let period_dec = Decimal::from(period as u64);
    let mut avg_gain: Decimal = changes[..period].iter().map(gain).sum::<Decimal>() / period_dec;
    let mut avg_loss: Decimal = changes[..period].iter().map(loss).sum::<Decimal>() / period_dec;

    for change in &changes[period..] {
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain(change)) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss(change)) / period_dec;
    }

    if avg_loss.is_zero() {
        return Some(dec!(100));
    }
    let rs = avg_gain / avg_loss;
    Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
}

/// Simple moving average of the last `period` values.
pub fn moving_average(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values[values.len() - period..].iter().sum();
    Some(sum / Decimal::from(period as u64))
}

/// Today's volume relative to the trailing average.
///
/// `None` when there is no history or the average is zero — the caller
/// treats that as "no signal", never as an infinite surge.
pub fn volume_ratio(today: Decimal, trailing: &[Decimal]) -> Option<Decimal> {
    if trailing.is_empty() {
        return None;
    }
    let avg: Decimal = trailing.iter().sum::<Decimal>() / Decimal::from(trailing.len() as u64);
    if avg.is_zero() {
        return None;
    }
    Some(today / avg)
}
