//! Settled trade record (§3), grounded in the original `transaction.py`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::Symbol;
use crate::order::{OrderId, Side};

/// The permanent record of a filled [`crate::order::Order`], appended to the
/// [`crate::portfolio::Portfolio`]'s transaction ledger and never mutated
/// afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    /// Always positive: the number of shares that changed hands.
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub executed_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            symbol,
            side,
            quantity: quantity.abs(),
            price,
            commission,
            executed_at,
        }
    }

    /// Signed cash impact of this transaction on the portfolio's cash
    /// balance: a buy debits `price * quantity + commission`, a sell credits
    /// `price * quantity - commission`.
    pub fn cash_delta(&self) -> f64 {
        let gross = self.price * self.quantity;
        match self.side {
            Side::Buy => -(gross + self.commission),
            Side::Sell => gross - self.commission,
        }
    }
}
