//! Trading calendar contract (§6).
//!
//! The spec treats the calendar as an external collaborator: the kernel only
//! needs `next_open` / `next_close` / `previous_close` / session boundaries for
//! a given exchange, identified by its ISO MIC (e.g. `XNYS`). This module
//! defines that contract as a trait plus a small reference implementation
//! (`NyseCalendar`) covering the NYSE/XNYS full-day holiday calendar, grounded
//! in the original `exchange_calendars`-backed `MarketEvents` (`event.py`) this
//! crate's market generator supersedes.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;

use crate::error::{CalendarError, SimResult};

/// Regular session open, 09:30 local exchange time.
pub const SESSION_OPEN_HOUR: u32 = 9;
pub const SESSION_OPEN_MINUTE: u32 = 30;
/// Regular session close, 16:00 local exchange time.
pub const SESSION_CLOSE_HOUR: u32 = 16;
pub const SESSION_CLOSE_MINUTE: u32 = 0;

/// A trading calendar for a single exchange (§6).
///
/// Implementations are pure: they derive session boundaries from the exchange's
/// static holiday/weekend rules, never from simulation state.
pub trait TradingCalendar: Send + Sync {
    /// ISO Market Identifier Code this calendar serves, e.g. `"XNYS"`.
    fn mic(&self) -> &str;

    /// The regular-session open strictly after `t`.
    fn next_open(&self, t: DateTime<Utc>) -> SimResult<DateTime<Utc>>;

    /// The regular-session close strictly after `t`.
    fn next_close(&self, t: DateTime<Utc>) -> SimResult<DateTime<Utc>>;

    /// The regular-session close on or before `t` (the most recent close, strictly
    /// before `t` if `t` is itself a close).
    fn previous_close(&self, t: DateTime<Utc>) -> SimResult<DateTime<Utc>>;

    /// Whether `date` is a trading session at all.
    fn is_session(&self, date: NaiveDate) -> bool;

    /// The open timestamp of the session on `date`. Errors if `date` is not a session.
    fn session_open(&self, date: NaiveDate) -> SimResult<DateTime<Utc>>;

    /// The close timestamp of the session on `date`. Errors if `date` is not a session.
    fn session_close(&self, date: NaiveDate) -> SimResult<DateTime<Utc>>;

    /// Whether `t` falls within `[session_open, session_close)` of its own date.
    fn is_trading_minute(&self, t: DateTime<Utc>) -> bool {
        let date = self.local_date(t);
        match (self.session_open(date), self.session_close(date)) {
            (Ok(open), Ok(close)) => t >= open && t < close,
            _ => false,
        }
    }

    /// The exchange-local calendar date for an instant, used to look up sessions.
    fn local_date(&self, t: DateTime<Utc>) -> NaiveDate;
}

/// Reference NYSE (`XNYS`) calendar: weekends plus the fixed-date and
/// floating-date US market holidays observed by that exchange.
///
/// This is a small, explicit implementation rather than a full holiday-rule
/// engine: it is sufficient to drive the literal scenarios in spec §8 and any
/// backtest within the years it enumerates. Extending coverage to further
/// years means extending [`NyseCalendar::holidays_for_year`].
#[derive(Debug, Clone, Default)]
pub struct NyseCalendar;

impl NyseCalendar {
    pub fn new() -> Self {
        Self
    }

    /// Full-day market holidays for a given year. Only years exercised by this
    /// crate's tests are populated; extend as needed.
    fn holidays_for_year(year: i32) -> Vec<NaiveDate> {
        let d = |m: u32, day: u32| NaiveDate::from_ymd_opt(year, m, day).expect("valid date");
        match year {
            2018 => vec![
                d(1, 1),
                d(1, 15),
                d(2, 19),
                d(3, 30),
                d(5, 28),
                d(7, 4),
                d(9, 3),
                d(11, 22),
                d(12, 25),
            ],
            2020 => vec![
                d(1, 1),
                d(1, 20),
                d(2, 17),
                d(4, 10),
                d(5, 25),
                d(7, 3),
                d(9, 7),
                d(11, 26),
                d(12, 25),
            ],
            2021 => vec![
                d(1, 1),
                d(1, 18),
                d(2, 15),
                d(4, 2),
                d(5, 31),
                d(7, 5),
                d(9, 6),
                d(11, 25),
                d(12, 24),
            ],
            _ => Vec::new(),
        }
    }

    fn is_holiday(date: NaiveDate) -> bool {
        Self::holidays_for_year(date.year()).contains(&date)
    }

    fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn session_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let open_local = New_York
            .with_ymd_and_hms(
                date.year(),
                date.month(),
                date.day(),
                SESSION_OPEN_HOUR,
                SESSION_OPEN_MINUTE,
                0,
            )
            .single()
            .expect("unambiguous local time");
        let close_local = New_York
            .with_ymd_and_hms(
                date.year(),
                date.month(),
                date.day(),
                SESSION_CLOSE_HOUR,
                SESSION_CLOSE_MINUTE,
                0,
            )
            .single()
            .expect("unambiguous local time");
        (open_local.with_timezone(&Utc), close_local.with_timezone(&Utc))
    }

    fn next_session_on_or_after(mut date: NaiveDate) -> NaiveDate {
        while Self::is_weekend(date) || Self::is_holiday(date) {
            date = date.succ_opt().expect("date does not overflow");
        }
        date
    }
}

impl TradingCalendar for NyseCalendar {
    fn mic(&self) -> &str {
        "XNYS"
    }

    fn next_open(&self, t: DateTime<Utc>) -> SimResult<DateTime<Utc>> {
        let mut date = self.local_date(t);
        loop {
            date = Self::next_session_on_or_after(date);
            let (open, _) = Self::session_bounds(date);
            if open > t {
                return Ok(open);
            }
            date = date.succ_opt().ok_or_else(|| {
                CalendarError::OutOfRange(format!("no session after {date}"))
            })?;
        }
    }

    fn next_close(&self, t: DateTime<Utc>) -> SimResult<DateTime<Utc>> {
        let mut date = self.local_date(t);
        loop {
            date = Self::next_session_on_or_after(date);
            let (_, close) = Self::session_bounds(date);
            if close > t {
                return Ok(close);
            }
            date = date.succ_opt().ok_or_else(|| {
                CalendarError::OutOfRange(format!("no session after {date}"))
            })?;
        }
    }

    fn previous_close(&self, t: DateTime<Utc>) -> SimResult<DateTime<Utc>> {
        let mut date = self.local_date(t);
        loop {
            date = date.pred_opt().ok_or_else(|| {
                CalendarError::OutOfRange("no session before the epoch".to_string())
            })?;
            if Self::is_weekend(date) || Self::is_holiday(date) {
                continue;
            }
            let (_, close) = Self::session_bounds(date);
            if close < t {
                return Ok(close);
            }
        }
    }

    fn is_session(&self, date: NaiveDate) -> bool {
        !Self::is_weekend(date) && !Self::is_holiday(date)
    }

    fn session_open(&self, date: NaiveDate) -> SimResult<DateTime<Utc>> {
        if !self.is_session(date) {
            return Err(CalendarError::OutOfRange(format!("{date} is not a trading session")).into());
        }
        Ok(Self::session_bounds(date).0)
    }

    fn session_close(&self, date: NaiveDate) -> SimResult<DateTime<Utc>> {
        if !self.is_session(date) {
            return Err(CalendarError::OutOfRange(format!("{date} is not a trading session")).into());
        }
        Ok(Self::session_bounds(date).1)
    }

    fn local_date(&self, t: DateTime<Utc>) -> NaiveDate {
        t.with_timezone(&New_York).date_naive()
    }
}

/// `pre_market_open` / `post_market_close` offsets used by the Market Event
/// Generator (§4.2): 15 minutes either side of the regular session.
pub fn pre_market_offset() -> Duration {
    Duration::minutes(15)
}

pub fn post_market_offset() -> Duration {
    Duration::minutes(15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_ymd_hms(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn skips_new_years_day_holiday() {
        let cal = NyseCalendar::new();
        // Dec 31 2019 is a Tuesday session; Jan 1 2020 is New Year's Day (holiday).
        let t = utc_ymd_hms(2020, 1, 1, 0, 0);
        let open = cal.next_open(t).unwrap();
        assert_eq!(cal.local_date(open), NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
    }

    #[test]
    fn skips_weekend() {
        let cal = NyseCalendar::new();
        // Jan 3 2020 is a Friday; next open after its close should be Monday Jan 6.
        let close = cal.session_close(NaiveDate::from_ymd_opt(2020, 1, 3).unwrap()).unwrap();
        let open = cal.next_open(close).unwrap();
        assert_eq!(cal.local_date(open), NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
    }

    #[test]
    fn is_trading_minute_bounds() {
        let cal = NyseCalendar::new();
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let open = cal.session_open(date).unwrap();
        let close = cal.session_close(date).unwrap();
        assert!(cal.is_trading_minute(open));
        assert!(!cal.is_trading_minute(close));
        assert!(!cal.is_trading_minute(open - Duration::minutes(1)));
    }
}
