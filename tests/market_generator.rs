//! Calendar-driven market event generation (§4.2, §8 S1/S6).

use chrono::{TimeZone, Utc};
use simkernel::calendar::NyseCalendar;
use simkernel::event::EventKind;
use simkernel::market_generator::MarketEventGenerator;
use std::rc::Rc;

fn generator() -> MarketEventGenerator {
    MarketEventGenerator::new(Rc::new(NyseCalendar::new()))
}

/// S1: an empty week with no subscribers produces exactly the four
/// per-session candidates, in order, for each trading day — six sessions
/// between 2020-01-01 and 2020-01-10 (New Year's Day is a holiday).
#[test]
fn empty_week_yields_24_ordered_market_events() {
    let gen = generator();
    let mut t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap();

    let mut events = Vec::new();
    loop {
        let candidate = gen.next(t).unwrap();
        if candidate.time >= end {
            break;
        }
        events.push(candidate);
        t = candidate.time;
    }

    assert_eq!(events.len(), 24, "6 sessions * 4 candidates each");
    for session in events.chunks(4) {
        let kinds: Vec<EventKind> = session.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PreMarketOpen,
                EventKind::MarketOpen,
                EventKind::MarketClose,
                EventKind::PostMarketClose,
            ]
        );
    }
    for pair in events.windows(2) {
        assert!(pair[0].time < pair[1].time, "candidates are strictly increasing");
    }
}

/// S6: repeatedly stepping to the next `PRE_MARKET_OPEN` across a run of four
/// plain trading days (no holidays in this window) yields exactly four
/// strictly increasing timestamps.
#[test]
fn repeated_pre_market_open_lookup_is_strictly_increasing() {
    let gen = generator();
    let mut t = Utc.with_ymd_and_hms(2018, 11, 27, 0, 0, 0).unwrap();
    let mut opens = Vec::new();

    for _ in 0..4 {
        loop {
            let candidate = gen.next(t).unwrap();
            t = candidate.time;
            if candidate.kind == EventKind::PreMarketOpen {
                opens.push(candidate.time);
                break;
            }
        }
    }

    assert_eq!(opens.len(), 4);
    for pair in opens.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    let days: Vec<_> = opens.iter().map(|t| t.date_naive()).collect();
    assert_eq!(
        days,
        vec![
            chrono::NaiveDate::from_ymd_opt(2018, 11, 27).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2018, 11, 28).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2018, 11, 29).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2018, 11, 30).unwrap(),
        ]
    );
}
