//! Asset identity and lot accounting (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::sorted_vec_map::SortedVecMap;

/// A tradable instrument identifier, e.g. `"AAPL"`.
///
/// Newtype rather than a bare `String` so the rest of the crate can't
/// accidentally compare a symbol against an arbitrary string field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

crate::impl_from_primitive!(Symbol, String);

/// A tradable instrument's static identity (§3 Data Model): a numeric id, its
/// trading symbol, a display name, and a price multiplier carried over from
/// the original `assets.py::Asset.price_multiplier` (e.g. futures contract
/// sizes) and applied wherever a position is valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub sid: u64,
    pub symbol: Symbol,
    pub name: String,
    pub price_multiplier: f64,
}

impl Asset {
    pub fn new(sid: u64, symbol: Symbol, name: impl Into<String>) -> Self {
        Self { sid, symbol, name: name.into(), price_multiplier: 1.0 }
    }

    pub fn with_price_multiplier(mut self, price_multiplier: f64) -> Self {
        self.price_multiplier = price_multiplier;
        self
    }
}

/// A single purchase lot within a [`crate::portfolio::Position`]: the shares
/// bought at one fill, tracked separately so realized P&L can be computed
/// per-lot (FIFO) rather than only against a blended average cost.
///
/// Mirrors the original `assets.py` `Position` lot list, but keyed and stored
/// via [`SortedVecMap`] the way the teacher keys order-book levels — sorted by
/// acquisition time so FIFO consumption is a front-to-back scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Number of shares still held from this lot. Always non-negative;
    /// a fully-consumed lot is removed from its map rather than zeroed.
    pub quantity: f64,
    /// Price per share paid when the lot was acquired.
    pub cost_basis: f64,
}

/// Per-symbol lot book, ordered by acquisition time for FIFO realization.
pub type LotBook = SortedVecMap<DateTime<Utc>, Lot, 8>;

/// A held position in a single symbol: the aggregate of all open lots.
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub lots: LotBook,
}

impl Position {
    pub fn new() -> Self {
        Self { lots: LotBook::new() }
    }

    /// Total shares held across all lots.
    pub fn quantity(&self) -> f64 {
        self.lots.values().map(|lot| lot.quantity).sum()
    }

    /// Whether this position has no remaining shares (and so can be dropped
    /// from the portfolio's holdings map).
    pub fn is_flat(&self) -> bool {
        self.quantity().abs() < f64::EPSILON
    }

    pub fn add_lot(&mut self, at: DateTime<Utc>, quantity: f64, cost_basis: f64) {
        self.lots
            .entry(at)
            .and_modify(|lot| {
                let total_qty = lot.quantity + quantity;
                if total_qty.abs() > f64::EPSILON {
                    lot.cost_basis = (lot.cost_basis * lot.quantity + cost_basis * quantity) / total_qty;
                }
                lot.quantity = total_qty;
            })
            .or_insert(Lot { quantity, cost_basis });
    }

    /// Consume `quantity` shares FIFO across lots, returning the realized P&L
    /// against `exit_price`. `quantity` must be positive and no larger than
    /// [`Position::quantity`].
    pub fn consume_fifo(&mut self, quantity: f64, exit_price: f64) -> f64 {
        let mut remaining = quantity;
        let mut realized = 0.0;
        let keys: SmallVec<[DateTime<Utc>; 8]> = self.lots.keys().copied().collect();
        for key in keys {
            if remaining <= f64::EPSILON {
                break;
            }
            let Some(lot) = self.lots.get_mut(&key) else { continue };
            let take = remaining.min(lot.quantity);
            realized += take * (exit_price - lot.cost_basis);
            lot.quantity -= take;
            remaining -= take;
            if lot.quantity.abs() < f64::EPSILON {
                self.lots.remove(&key);
            }
        }
        realized
    }
}
