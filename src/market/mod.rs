//! Market calendar and session windows.

mod clock;

pub use clock::{active_markets, MarketHours, SessionWindow};
