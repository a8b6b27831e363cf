//! Point-in-time "latest known price" adapter over a daily OHLCV store
//! (§4.8), grounded in the original `data/datasource.py`'s
//! lookback-vs-exact `@overload` pair and the calendar contract in §6.

use chrono::{DateTime, Utc};
use std::rc::Rc;

use crate::asset::Symbol;
use crate::calendar::TradingCalendar;
use crate::data::source::{session_day, FetchMode, OhlcvSource};
use crate::error::{PriceError, SimResult};

/// Adapts an [`OhlcvSource`] into the timestamp-accurate price query the
/// [`crate::broker::Broker`] and [`crate::strategy::Strategy`] data bindings
/// need (§4.8):
///
/// - `t` before the session open: the previous session's close.
/// - `t` within the session: this session's open.
/// - `t` at or after the session close: this session's close.
pub struct PricesView {
    source: Rc<OhlcvSource>,
    calendar: Rc<dyn TradingCalendar>,
}

impl PricesView {
    pub fn new(source: Rc<OhlcvSource>, calendar: Rc<dyn TradingCalendar>) -> Self {
        Self { source, calendar }
    }

    /// Exposes the calendar backing this view so callers (e.g. [`crate::broker::Broker`])
    /// can decide session membership without duplicating calendar wiring.
    pub fn calendar(&self) -> &dyn TradingCalendar {
        self.calendar.as_ref()
    }

    /// The price of `symbol` at virtual time `t`, per §4.8's three-branch rule.
    pub fn price_at(&self, symbol: &Symbol, t: DateTime<Utc>) -> SimResult<f64> {
        let date = self.calendar.local_date(t);
        if !self.calendar.is_session(date) {
            return self.price_for_non_session_day(symbol, t);
        }
        let open = self
            .calendar
            .session_open(date)
            .map_err(|_| PriceError::OutOfRange(t.to_rfc3339()))?;
        let close = self
            .calendar
            .session_close(date)
            .map_err(|_| PriceError::OutOfRange(t.to_rfc3339()))?;

        if t < open {
            let previous_close_at = self
                .calendar
                .previous_close(open)
                .map_err(|_| PriceError::OutOfRange(t.to_rfc3339()))?;
            let previous_date = self.calendar.local_date(previous_close_at);
            self.row_field(symbol, previous_date, FetchMode::Exact, |row| row.close)
        } else if t < close {
            self.row_field(symbol, date, FetchMode::Exact, |row| row.open)
        } else {
            self.row_field(symbol, date, FetchMode::Exact, |row| row.close)
        }
    }

    /// Batch form used by the Portfolio Manager to refresh its held symbols
    /// (§4.5) in one pass.
    pub fn prices_at<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a Symbol>,
        t: DateTime<Utc>,
    ) -> SimResult<std::collections::HashMap<Symbol, f64>> {
        let mut out = std::collections::HashMap::new();
        for symbol in symbols {
            out.insert(symbol.clone(), self.price_at(symbol, t)?);
        }
        Ok(out)
    }

    /// `t` falls on a non-session day (weekend/holiday): the price is the
    /// most recent session's close on or before `t`, found via the source's
    /// own lookback fetch since no calendar session exists on `date` itself.
    fn price_for_non_session_day(&self, symbol: &Symbol, t: DateTime<Utc>) -> SimResult<f64> {
        let date = session_day(t);
        self.row_field(symbol, date, FetchMode::LatestOnOrBefore, |row| row.close)
    }

    fn row_field(
        &self,
        symbol: &Symbol,
        date: chrono::NaiveDate,
        mode: FetchMode,
        field: impl FnOnce(&crate::data::source::OhlcvRow) -> f64,
    ) -> SimResult<f64> {
        let rows = self
            .source
            .fetch(symbol, date, mode)
            .map_err(|_| PriceError::Unavailable { symbol: symbol.to_string(), at: date.to_string() })?;
        let row = rows.last().ok_or_else(|| PriceError::Unavailable {
            symbol: symbol.to_string(),
            at: date.to_string(),
        })?;
        Ok(field(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NyseCalendar;
    use crate::data::source::OhlcvRow;
    use chrono::{NaiveDate, TimeZone};

    fn view() -> PricesView {
        let rows = vec![(
            Symbol::from("BA"),
            vec![
                OhlcvRow {
                    date: NaiveDate::from_ymd_opt(2018, 12, 24).unwrap(),
                    open: 289.0,
                    high: 292.0,
                    low: 287.0,
                    close: 290.18,
                    volume: 1.0,
                },
                OhlcvRow {
                    date: NaiveDate::from_ymd_opt(2018, 12, 26).unwrap(),
                    open: 290.18,
                    high: 306.0,
                    low: 289.0,
                    close: 305.06,
                    volume: 1.0,
                },
            ],
        )];
        let source = Rc::new(OhlcvSource::from_rows(rows));
        PricesView::new(source, Rc::new(NyseCalendar::new()))
    }

    #[test]
    fn within_session_returns_open() {
        let view = view();
        let t = Utc.with_ymd_and_hms(2018, 12, 26, 9, 30, 0).unwrap();
        let price = view.price_at(&Symbol::from("BA"), t).unwrap();
        assert_eq!(price, 290.18);
    }

    #[test]
    fn at_close_returns_close() {
        let view = view();
        let t = Utc.with_ymd_and_hms(2018, 12, 26, 16, 0, 0).unwrap();
        let price = view.price_at(&Symbol::from("BA"), t).unwrap();
        assert_eq!(price, 305.06);
    }

    #[test]
    fn unknown_symbol_errors() {
        let view = view();
        let t = Utc.with_ymd_and_hms(2018, 12, 26, 9, 30, 0).unwrap();
        assert!(view.price_at(&Symbol::from("MSFT"), t).is_err());
    }
}
