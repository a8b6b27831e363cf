//! Tabular OHLCV data source with schema validation and point-in-time fetch
//! modes (§6, §2 "Data Source + Format"), grounded in the original
//! `CSVDataSource`/`OHLCVData` (`data/datasource.py`) and the teacher's
//! `polars::DataFrame`-based ingestion (`data_provider.rs`'s `DataProvider`
//! trait, which validates against a `polars::prelude::Schema` before use).

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::{DataFrame, DataType, Field, Schema};

use crate::asset::Symbol;
use crate::error::{DataError, SimResult};

/// One row of the `date, ticker, open, high, low, close, volume` table (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcvRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// How a fetch should select a row relative to a requested point (§6, §2):
/// an exact session match, the latest row on or before it (lookback), or a
/// fixed-size slice ending at it.
#[derive(Debug, Clone, Copy)]
pub enum FetchMode {
    Exact,
    LatestOnOrBefore,
    Slice { len: usize },
}

/// The fixed schema every ingested table is validated against. Mirrors the
/// teacher's `DataProvider::schema` contract, specialized to §6's column set.
fn expected_schema() -> Schema {
    Schema::from_iter([
        Field::new("date".into(), DataType::Date),
        Field::new("ticker".into(), DataType::String),
        Field::new("open".into(), DataType::Float64),
        Field::new("high".into(), DataType::Float64),
        Field::new("low".into(), DataType::Float64),
        Field::new("close".into(), DataType::Float64),
        Field::new("volume".into(), DataType::Float64),
    ])
}

/// A multi-indexed `(date, ticker)` OHLCV table, point-in-time queryable
/// (§6 "Historical price source").
///
/// Ingestion validates the incoming `DataFrame` against [`expected_schema`]
/// once, then materializes each `ticker`'s rows into a date-sorted `Vec` for
/// O(log n) lookback/exact/slice lookups — the fetch path itself never
/// touches `polars` again, keeping the hot loop (called once per
/// [`crate::broker::Broker`] fill and per strategy data-binding) allocation-free.
pub struct OhlcvSource {
    by_symbol: std::collections::HashMap<Symbol, Vec<OhlcvRow>>,
}

impl OhlcvSource {
    /// Validates `frame`'s schema against §6's fixed column set and indexes
    /// it by `(ticker, date)`. Returns [`DataError::SchemaValidation`] on any
    /// mismatch (§7, fatal at first occurrence).
    pub fn from_dataframe(frame: &DataFrame) -> SimResult<Self> {
        let expected = expected_schema();
        let actual = frame.schema();
        for field in expected.iter_fields() {
            match actual.get(field.name()) {
                Some(dtype) if dtype == field.dtype() => {}
                Some(dtype) => {
                    return Err(DataError::SchemaValidation(format!(
                        "column '{}': expected {:?}, got {:?}",
                        field.name(),
                        field.dtype(),
                        dtype
                    ))
                    .into());
                }
                None => {
                    return Err(DataError::SchemaValidation(format!("missing column '{}'", field.name())).into());
                }
            }
        }

        let mut by_symbol: std::collections::HashMap<Symbol, Vec<OhlcvRow>> = std::collections::HashMap::new();
        let height = frame.height();
        let dates = frame
            .column("date")
            .and_then(|c| c.date())
            .map_err(|e| DataError::Frame(e.to_string()))?
            .physical()
            .clone();
        let tickers = frame
            .column("ticker")
            .and_then(|c| c.str())
            .map_err(|e| DataError::Frame(e.to_string()))?
            .clone();
        let opens = frame.column("open").and_then(|c| c.f64()).map_err(|e| DataError::Frame(e.to_string()))?.clone();
        let highs = frame.column("high").and_then(|c| c.f64()).map_err(|e| DataError::Frame(e.to_string()))?.clone();
        let lows = frame.column("low").and_then(|c| c.f64()).map_err(|e| DataError::Frame(e.to_string()))?.clone();
        let closes =
            frame.column("close").and_then(|c| c.f64()).map_err(|e| DataError::Frame(e.to_string()))?.clone();
        let volumes =
            frame.column("volume").and_then(|c| c.f64()).map_err(|e| DataError::Frame(e.to_string()))?.clone();

        for i in 0..height {
            let ticker = tickers
                .get(i)
                .ok_or_else(|| DataError::SchemaValidation(format!("null ticker at row {i}")))?
                .to_string();
            let days = dates.get(i).ok_or_else(|| DataError::SchemaValidation(format!("null date at row {i}")))?;
            let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap() + chrono::Duration::days(days as i64);
            let field = |values: &polars::prelude::Float64Chunked, name: &str| -> SimResult<f64> {
                values
                    .get(i)
                    .ok_or_else(|| DataError::SchemaValidation(format!("null '{name}' at row {i}")).into())
            };
            let row = OhlcvRow {
                date,
                open: field(&opens, "open")?,
                high: field(&highs, "high")?,
                low: field(&lows, "low")?,
                close: field(&closes, "close")?,
                volume: field(&volumes, "volume")?,
            };
            by_symbol.entry(Symbol::new(ticker)).or_default().push(row);
        }
        for rows in by_symbol.values_mut() {
            rows.sort_by_key(|row| row.date);
        }
        Ok(Self { by_symbol })
    }

    /// Constructs directly from pre-sorted rows, bypassing `polars` schema
    /// validation. Used by tests and by callers that already hold validated,
    /// in-memory data.
    pub fn from_rows(rows: impl IntoIterator<Item = (Symbol, Vec<OhlcvRow>)>) -> Self {
        let mut by_symbol = std::collections::HashMap::new();
        for (symbol, mut rows) in rows {
            rows.sort_by_key(|row| row.date);
            by_symbol.insert(symbol, rows);
        }
        Self { by_symbol }
    }

    /// Fetches a row for `symbol` relative to `date`, per `mode`.
    pub fn fetch(&self, symbol: &Symbol, date: NaiveDate, mode: FetchMode) -> SimResult<Vec<OhlcvRow>> {
        let rows = self
            .by_symbol
            .get(symbol)
            .ok_or_else(|| DataError::SymbolNotFound(symbol.to_string()))?;
        match mode {
            FetchMode::Exact => {
                let row = rows
                    .iter()
                    .find(|row| row.date == date)
                    .ok_or_else(|| DataError::OutOfRange(format!("no row for {symbol} on {date}")))?;
                Ok(vec![*row])
            }
            FetchMode::LatestOnOrBefore => {
                let row = rows
                    .iter()
                    .rev()
                    .find(|row| row.date <= date)
                    .ok_or_else(|| DataError::OutOfRange(format!("no row on or before {date} for {symbol}")))?;
                Ok(vec![*row])
            }
            FetchMode::Slice { len } => {
                let end = rows
                    .iter()
                    .rposition(|row| row.date <= date)
                    .ok_or_else(|| DataError::OutOfRange(format!("no row on or before {date} for {symbol}")))?;
                let start = end.saturating_sub(len.saturating_sub(1));
                Ok(rows[start..=end].to_vec())
            }
        }
    }

    /// Ordinal fetch: the `index`-th row for `symbol`, zero-based (§2's
    /// "ordinal" fetch mode).
    pub fn fetch_ordinal(&self, symbol: &Symbol, index: usize) -> SimResult<OhlcvRow> {
        let rows = self
            .by_symbol
            .get(symbol)
            .ok_or_else(|| DataError::SymbolNotFound(symbol.to_string()))?;
        rows.get(index)
            .copied()
            .ok_or_else(|| DataError::OutOfRange(format!("ordinal {index} out of range for {symbol}")).into())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.by_symbol.keys()
    }

    pub(crate) fn rows_for(&self, symbol: &Symbol) -> Option<&[OhlcvRow]> {
        self.by_symbol.get(symbol).map(Vec::as_slice)
    }
}

/// Converts a UTC instant to the session day used as the row key (§6:
/// "dates in UTC, normalized to session day").
pub fn session_day(t: DateTime<Utc>) -> NaiveDate {
    t.date_naive()
}
