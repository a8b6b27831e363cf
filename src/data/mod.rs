//! Point-in-time tabular data access (§4.8, §6), grounded in the original
//! `data/datasource.py`'s `CSVDataSource`/`OHLCVData` pair and the teacher's
//! `polars::DataFrame`-backed tabular storage.

pub mod prices;
pub mod source;

pub use prices::PricesView;
pub use source::{FetchMode, OhlcvRow, OhlcvSource};
