//! Order lifecycle (§3, §4.4), grounded in the original `order.py`'s
//! `Order`/`OrderStatus`/`OrderType` and the teacher's `thiserror`-backed
//! newtype conventions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::Symbol;
use crate::error::{OrderError, SimResult};

/// Unique order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buy or sell side. Positive `amount` on [`Order`] means buy, negative means
/// sell; `Side` is a convenience derived from the sign rather than stored
/// independently, avoiding a state where the two disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_amount(amount: f64) -> Self {
        if amount >= 0.0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Current lifecycle state of an [`Order`] (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Submitted but not yet acted on by the broker.
    Open,
    /// Filled at a known price and timestamp.
    Filled,
    /// Withdrawn before being filled.
    Cancelled,
}

/// A request to trade `amount` shares of `symbol`, placed by a
/// [`crate::strategy::Strategy`] and owned thereafter by the
/// [`crate::broker::Broker`] (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    /// Signed share count: positive buys, negative sells.
    pub amount: f64,
    /// The time the strategy issued this order.
    pub placed_at: DateTime<Utc>,
    pub status: OrderStatus,
    /// Set once the broker fills the order.
    pub fill_price: Option<f64>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Construct a new open order. Rejects a zero `amount`: a no-op order
    /// has no side and nothing for the broker to execute (§4.4 edge cases).
    pub fn new(symbol: Symbol, amount: f64, placed_at: DateTime<Utc>) -> SimResult<Self> {
        if amount == 0.0 {
            return Err(OrderError::ZeroAmount.into());
        }
        Ok(Self {
            id: OrderId::new(),
            symbol,
            amount,
            placed_at,
            status: OrderStatus::Open,
            fill_price: None,
            filled_at: None,
        })
    }

    pub fn side(&self) -> Side {
        Side::from_amount(self.amount)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::Open)
    }

    /// Transition an open order to `Filled` at `price`/`at`. Errors if the
    /// order has already left the `Open` state (double-fill, fill-after-cancel).
    pub fn fill(&mut self, price: f64, at: DateTime<Utc>) -> SimResult<()> {
        if !self.is_open() {
            return Err(OrderError::NotOpen(self.id.0).into());
        }
        self.status = OrderStatus::Filled;
        self.fill_price = Some(price);
        self.filled_at = Some(at);
        Ok(())
    }

    /// Transition an open order to `Cancelled`.
    pub fn cancel(&mut self) -> SimResult<()> {
        if !self.is_open() {
            return Err(OrderError::NotOpen(self.id.0).into());
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2020-01-02T14:30:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn zero_amount_rejected() {
        let err = Order::new(Symbol::from("AAPL"), 0.0, now());
        assert!(err.is_err());
    }

    #[test]
    fn fill_transitions_status() {
        let mut order = Order::new(Symbol::from("AAPL"), 10.0, now()).unwrap();
        assert_eq!(order.side(), Side::Buy);
        order.fill(101.5, now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_price, Some(101.5));
    }

    #[test]
    fn cannot_fill_twice() {
        let mut order = Order::new(Symbol::from("AAPL"), -5.0, now()).unwrap();
        assert_eq!(order.side(), Side::Sell);
        order.fill(100.0, now()).unwrap();
        assert!(order.fill(100.0, now()).is_err());
    }
}
