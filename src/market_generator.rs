//! Market-calendar-driven session-boundary event generator (§4.2).
//!
//! Pure with respect to `(t, calendar)`: it never mutates state, and its
//! result is consumed once by the [`crate::event_manager::EventManager`]'s
//! `step`, mirroring how the teacher's `Scheduler::step` peeks its market
//! cursor without advancing it until the outcome is chosen.

use chrono::{DateTime, Utc};
use std::rc::Rc;

use crate::calendar::{pre_market_offset, post_market_offset, TradingCalendar};
use crate::error::SimResult;
use crate::event::EventKind;

/// The next session-boundary candidate strictly after some virtual time `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCandidate {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

/// Produces the single next market-session boundary event after a given
/// virtual time, per §4.2's four-candidate rule.
pub struct MarketEventGenerator {
    calendar: Rc<dyn TradingCalendar>,
}

impl MarketEventGenerator {
    pub fn new(calendar: Rc<dyn TradingCalendar>) -> Self {
        Self { calendar }
    }

    /// Returns the minimum of `{open-15m, open, close, close+15m}` strictly
    /// greater than `t`, rolling to the next trading session if `t` is on or
    /// after all of today's candidates (§4.2 edge case: never re-dispatch `t`
    /// itself even when `t` lands exactly on a boundary).
    pub fn next(&self, t: DateTime<Utc>) -> SimResult<MarketCandidate> {
        let mut date = self.calendar.local_date(t);
        loop {
            if self.calendar.is_session(date) {
                let open = self.calendar.session_open(date)?;
                let close = self.calendar.session_close(date)?;
                let candidates = [
                    (open - pre_market_offset(), EventKind::PreMarketOpen),
                    (open, EventKind::MarketOpen),
                    (close, EventKind::MarketClose),
                    (close + post_market_offset(), EventKind::PostMarketClose),
                ];
                if let Some((time, kind)) =
                    candidates.into_iter().filter(|(time, _)| *time > t).min_by_key(|(time, _)| *time)
                {
                    return Ok(MarketCandidate { time, kind });
                }
            }
            date = date.succ_opt().expect("date does not overflow in a backtest horizon");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NyseCalendar;
    use chrono::TimeZone;

    fn generator() -> MarketEventGenerator {
        MarketEventGenerator::new(Rc::new(NyseCalendar::new()))
    }

    #[test]
    fn returns_pre_market_open_first() {
        let gen = generator();
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let candidate = gen.next(t).unwrap();
        assert_eq!(candidate.kind, EventKind::PreMarketOpen);
    }

    #[test]
    fn never_returns_the_same_instant() {
        let gen = generator();
        let close = Utc.with_ymd_and_hms(2020, 1, 2, 16, 0, 0).unwrap();
        let candidate = gen.next(close).unwrap();
        assert_eq!(candidate.kind, EventKind::PostMarketClose);
        assert!(candidate.time > close);
    }

    #[test]
    fn rolls_to_next_session_across_a_weekend() {
        let gen = generator();
        let t = Utc.with_ymd_and_hms(2020, 1, 3, 16, 15, 0).unwrap(); // Friday post-close
        let candidate = gen.next(t).unwrap();
        assert_eq!(candidate.kind, EventKind::PreMarketOpen);
        assert_eq!(candidate.time.date_naive(), chrono::NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
    }
}
