//! Pluggable commission model (§6, §9), grounded in the commission
//! integration point named in `broker.py` but never wired in the original
//! source. §9's Open Question is resolved here: commission debits
//! [`crate::transaction::Transaction::cash_delta`] as before, and
//! [`crate::portfolio::Portfolio`] additionally accumulates it into
//! `total_commission_paid` so Testable Property 5 (cash conservation) can be
//! checked against `cash + cost_basis_open + total_commission_paid -
//! realized_pnl` rather than only holding for a zero-commission model.

use crate::order::Order;
use crate::transaction::Transaction;

/// Computes the commission owed on a fill. The default ([`ZeroCommission`])
/// matches §4.4's "the default is zero".
pub trait CommissionModel {
    fn calculate(&self, order: &Order, quantity: f64, price: f64) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCommission;

impl CommissionModel for ZeroCommission {
    fn calculate(&self, _order: &Order, _quantity: f64, _price: f64) -> f64 {
        0.0
    }
}

/// A fixed cost per share, e.g. the flat per-share broker fees common to
/// retail equities trading.
#[derive(Debug, Clone, Copy)]
pub struct PerShareCommission {
    pub rate: f64,
}

impl CommissionModel for PerShareCommission {
    fn calculate(&self, _order: &Order, quantity: f64, _price: f64) -> f64 {
        quantity.abs() * self.rate
    }
}

/// A minimum-plus-percentage model: `max(minimum, rate * notional)`, common
/// to US equities brokers.
#[derive(Debug, Clone, Copy)]
pub struct PercentageCommission {
    pub rate: f64,
    pub minimum: f64,
}

impl CommissionModel for PercentageCommission {
    fn calculate(&self, _order: &Order, quantity: f64, price: f64) -> f64 {
        (quantity.abs() * price * self.rate).max(self.minimum)
    }
}

/// Applies `model` to a prospective fill, returning the [`Transaction`]'s
/// commission field. Kept as a free function rather than a method on
/// `Transaction` since the transaction itself is commission-agnostic until
/// construction time.
pub fn commission_for(model: &dyn CommissionModel, order: &Order, quantity: f64, price: f64) -> f64 {
    model.calculate(order, quantity, price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Symbol;
    use chrono::Utc;

    fn order() -> Order {
        Order::new(Symbol::from("AAPL"), 10.0, Utc::now()).unwrap()
    }

    #[test]
    fn zero_commission_is_zero() {
        assert_eq!(ZeroCommission.calculate(&order(), 10.0, 100.0), 0.0);
    }

    #[test]
    fn per_share_scales_with_quantity() {
        let model = PerShareCommission { rate: 0.01 };
        assert_eq!(model.calculate(&order(), 100.0, 50.0), 1.0);
    }

    #[test]
    fn percentage_respects_minimum() {
        let model = PercentageCommission { rate: 0.001, minimum: 1.0 };
        assert_eq!(model.calculate(&order(), 1.0, 50.0), 1.0);
        assert_eq!(model.calculate(&order(), 1000.0, 50.0), 50.0);
    }
}
