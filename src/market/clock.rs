//! Market session clock.
//!
//! Pure functions of wall-clock time; no state, trivially testable
//! against fixed timestamps.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

/// Which markets are currently in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHours {
    pub domestic: bool,
    pub overseas: bool,
}

impl MarketHours {
    pub fn any(&self) -> bool {
        self.domestic || self.overseas
    }
}

/// One market's trading window in local wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid session time")
}

fn domestic_window() -> SessionWindow {
    SessionWindow {
        open: hm(9, 0),
        close: hm(15, 30),
    }
}

/// Report which markets are open at `now` (local wall-clock).
pub fn active_markets(now: NaiveDateTime) -> MarketHours {
    MarketHours {
        domestic: domestic_open(now),
        overseas: overseas_open(now),
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

fn domestic_open(now: NaiveDateTime) -> bool {
    if is_weekend(now.weekday()) {
        return false;
    }
    let window = domestic_window();
    let t = now.time();
    window.open <= t && t <= window.close
}

/// Overseas session mapped into local time: while the remote market
/// observes daylight saving (April through October) it runs 22:30-05:00,
/// otherwise 23:30-06:00.
fn overseas_window(month: u32) -> SessionWindow {
    if (4..=10).contains(&month) {
        SessionWindow {
            open: hm(22, 30),
            close: hm(5, 0),
        }
    } else {
        SessionWindow {
            open: hm(23, 30),
            close: hm(6, 0),
        }
    }
}

/// The overseas session crosses midnight, so `now` can belong to a
/// session that started today or yesterday. A session whose start day
/// falls on a weekend never opens.
fn overseas_open(now: NaiveDateTime) -> bool {
    for days_back in 0..=1u64 {
        let Some(start_day) = now.date().checked_sub_days(chrono::Days::new(days_back)) else {
            continue;
        };
        if is_weekend(start_day.weekday()) {
            continue;
        }
        let window = overseas_window(start_day.month());
        let start = start_day.and_time(window.open);
        let Some(end_day) = start_day.checked_add_days(chrono::Days::new(1)) else {
            continue;
        };
        let end = end_day.and_time(window.close);
        if start <= now && now <= end {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    #[test]
    fn test_monday_morning_domestic_only() {
        // 2026-08-03 is a Monday, August is a DST month.
        let hours = active_markets(at((2026, 8, 3), (10, 0)));
        assert_eq!(
            hours,
            MarketHours {
                domestic: true,
                overseas: false
            }
        );
    }

    #[test]
    fn test_monday_night_dst_overseas_only() {
        let hours = active_markets(at((2026, 8, 3), (23, 0)));
        assert_eq!(
            hours,
            MarketHours {
                domestic: false,
                overseas: true
            }
        );
    }

    #[test]
    fn test_monday_night_standard_before_open() {
        // 2026-12-07 is a Monday; standard-time session opens 23:30.
        let hours = active_markets(at((2026, 12, 7), (23, 0)));
        assert!(!hours.any());

        let hours = active_markets(at((2026, 12, 7), (23, 45)));
        assert!(hours.overseas);
    }

    #[test]
    fn test_saturday_closed() {
        // 2026-08-08 is a Saturday.
        assert!(!active_markets(at((2026, 8, 8), (10, 0))).any());
        assert!(!active_markets(at((2026, 8, 8), (23, 0))).any());
    }

    #[test]
    fn test_friday_session_runs_into_saturday_morning() {
        // 2026-08-07 is a Friday; its overseas session ends Saturday 05:00.
        assert!(active_markets(at((2026, 8, 8), (3, 0))).overseas);
        // Past the close it is gone.
        assert!(!active_markets(at((2026, 8, 8), (5, 30))).overseas);
    }

    #[test]
    fn test_sunday_start_never_opens() {
        // 2026-08-09 is a Sunday; Monday 02:00 falls inside a window whose
        // start day is Sunday, so it stays closed.
        assert!(!active_markets(at((2026, 8, 10), (2, 0))).overseas);
    }

    #[test]
    fn test_domestic_boundaries_inclusive() {
        assert!(active_markets(at((2026, 8, 3), (9, 0))).domestic);
        assert!(active_markets(at((2026, 8, 3), (15, 30))).domestic);
        assert!(!active_markets(at((2026, 8, 3), (15, 31))).domestic);
        assert!(!active_markets(at((2026, 8, 3), (8, 59))).domestic);
    }

    #[test]
    fn test_dst_edge_months() {
        // 2026-04-06 is a Monday: April uses the DST window.
        assert!(active_markets(at((2026, 4, 6), (22, 45))).overseas);
        // 2026-11-02 is a Monday: November is back to standard time.
        assert!(!active_markets(at((2026, 11, 2), (22, 45))).overseas);
        assert!(active_markets(at((2026, 11, 2), (23, 45))).overseas);
    }
}
