//! Positions, cash, and lazily-derived valuations (§3, §4.5), grounded in
//! the original `portfolio.py`'s `Portfolio`/`current_portfolio_weights` and
//! the teacher's lazy-derived-value-with-dirty-flag pattern (§9 Design Notes).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use crate::asset::{Asset, Position, Symbol};
use crate::data::prices::PricesView;
use crate::error::SimResult;
use crate::event::{Event, EventKind, Payload};
use crate::event_manager::SharedEventManager;
use crate::transaction::Transaction;

/// Positions, cash, and the live price vector they're marked against (§3
/// "Portfolio state").
#[derive(Clone)]
pub struct Portfolio {
    pub starting_cash: f64,
    pub cash: f64,
    pub positions: HashMap<Symbol, Position>,
    pub current_market_prices: HashMap<Symbol, f64>,
    /// Static asset identities, registered once at setup time. Symbols with
    /// no registered [`Asset`] value at `1.0` (the original `price_multiplier`
    /// default).
    pub assets: HashMap<Symbol, Asset>,
    /// Running sum of every fill's commission (Testable Property 5).
    pub total_commission_paid: f64,
    /// Running sum of FIFO-realized gain/loss from sell-side fills (§3,
    /// supplementing the original `assets.py` lot list with the P&L a sell
    /// actually locks in).
    pub realized_pnl: f64,
}

impl Portfolio {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            starting_cash,
            cash: starting_cash,
            positions: HashMap::new(),
            current_market_prices: HashMap::new(),
            assets: HashMap::new(),
            total_commission_paid: 0.0,
            realized_pnl: 0.0,
        }
    }

    /// Cost basis of every open lot across every held symbol — the term
    /// Testable Property 5's cash-conservation check compares `cash` against.
    pub fn cost_basis_open(&self) -> f64 {
        self.positions
            .values()
            .flat_map(|position| position.lots.values())
            .map(|lot| lot.quantity * lot.cost_basis)
            .sum()
    }

    pub fn register_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.symbol.clone(), asset);
    }

    fn net_amount(&self, symbol: &Symbol) -> f64 {
        self.positions.get(symbol).map(Position::quantity).unwrap_or(0.0)
    }

    /// `price_multiplier` of a registered asset, or `1.0` for an unregistered
    /// symbol (§3's `Asset.price_multiplier=1.0` default).
    fn multiplier(&self, symbol: &Symbol) -> f64 {
        self.assets.get(symbol).map(|asset| asset.price_multiplier).unwrap_or(1.0)
    }

    /// `Σ net_amount(s) · price(s) · price_multiplier(s)` (§3, extended by the
    /// supplemented `Asset.price_multiplier`).
    pub fn positions_value(&self) -> f64 {
        self.positions
            .keys()
            .map(|symbol| {
                let price = self.current_market_prices.get(symbol).copied().unwrap_or(0.0);
                self.net_amount(symbol) * price * self.multiplier(symbol)
            })
            .sum()
    }

    /// `cash + positions_value` (§3).
    pub fn portfolio_value(&self) -> f64 {
        self.cash + self.positions_value()
    }

    /// `net_amount(s)·price(s)·price_multiplier(s) / positions_value` for each
    /// held symbol (§3, carried over from `Portfolio.current_portfolio_weights`).
    pub fn weights(&self) -> HashMap<Symbol, f64> {
        let denom = self.positions_value();
        self.positions
            .keys()
            .map(|symbol| {
                let price = self.current_market_prices.get(symbol).copied().unwrap_or(0.0);
                let market_value = self.net_amount(symbol) * price * self.multiplier(symbol);
                let weight = if denom.abs() < f64::EPSILON { 0.0 } else { market_value / denom };
                (symbol.clone(), weight)
            })
            .collect()
    }

    /// Applies a filled [`Transaction`] to positions and cash (§4.5). A buy
    /// opens or extends a lot; a sell consumes open lots FIFO via
    /// [`Position::consume_fifo`], crediting the realized gain/loss to
    /// `realized_pnl`. Commission is debited from `cash` via `cash_delta`
    /// and separately tracked in `total_commission_paid` so Testable
    /// Property 5 holds under any [`crate::commission::CommissionModel`],
    /// not just [`crate::commission::ZeroCommission`].
    fn apply_fill(&mut self, tx: &Transaction) {
        match tx.side {
            crate::order::Side::Buy => {
                self.positions
                    .entry(tx.symbol.clone())
                    .or_insert_with(Position::new)
                    .add_lot(tx.executed_at, tx.quantity, tx.price);
            }
            crate::order::Side::Sell => {
                if let Some(position) = self.positions.get_mut(&tx.symbol) {
                    self.realized_pnl += position.consume_fifo(tx.quantity, tx.price);
                }
            }
        }
        self.total_commission_paid += tx.commission;
        self.cash += tx.cash_delta();
        self.positions.retain(|_, position| !position.is_flat());
    }

    fn refresh_prices(&mut self, prices: &PricesView, at: DateTime<Utc>) {
        let symbols: Vec<Symbol> = self.positions.keys().cloned().collect();
        if let Ok(fetched) = prices.prices_at(symbols.iter(), at) {
            self.current_market_prices = fetched;
        }
    }
}

/// Lazily-derived, dirty-flag-invalidated wrapper the spec's §9 "Lazy derived
/// values" design note asks for. `Portfolio`'s own accessors above are pure
/// recomputation; this cache exists for callers (e.g. the Performance
/// Tracker) that read `portfolio_value` many times between mutations.
pub struct CachedValuation {
    dirty: Cell<bool>,
    portfolio_value: Cell<f64>,
    positions_value: Cell<f64>,
}

impl CachedValuation {
    fn new() -> Self {
        Self { dirty: Cell::new(true), portfolio_value: Cell::new(0.0), positions_value: Cell::new(0.0) }
    }

    fn invalidate(&self) {
        self.dirty.set(true);
    }

    fn refresh(&self, portfolio: &Portfolio) {
        if self.dirty.get() {
            self.positions_value.set(portfolio.positions_value());
            self.portfolio_value.set(portfolio.portfolio_value());
            self.dirty.set(false);
        }
    }
}

/// Owns a [`Portfolio`] and subscribes it to `ORDER_FULFILLED` / `PRICE_CHANGE`
/// (§4.5).
pub struct PortfolioManager {
    portfolio: RefCell<Portfolio>,
    prices: Rc<PricesView>,
    event_manager: SharedEventManager,
    valuation: CachedValuation,
}

impl PortfolioManager {
    pub fn new(starting_cash: f64, prices: Rc<PricesView>, event_manager: SharedEventManager) -> Self {
        Self {
            portfolio: RefCell::new(Portfolio::new(starting_cash)),
            prices,
            event_manager,
            valuation: CachedValuation::new(),
        }
    }

    pub fn snapshot(&self) -> Portfolio {
        self.portfolio.borrow().clone()
    }

    /// Registers an asset's static identity (symbol, name, price multiplier)
    /// ahead of any fill, so valuation picks up its `price_multiplier` from
    /// the first trade onward.
    pub fn register_asset(&self, asset: Asset) {
        self.portfolio.borrow_mut().register_asset(asset);
    }

    pub fn portfolio_value(&self) -> f64 {
        let portfolio = self.portfolio.borrow();
        self.valuation.refresh(&portfolio);
        self.valuation.portfolio_value.get()
    }

    pub fn positions_value(&self) -> f64 {
        let portfolio = self.portfolio.borrow();
        self.valuation.refresh(&portfolio);
        self.valuation.positions_value.get()
    }

    /// Applies a fill, refreshes marks, and re-emits `PORTFOLIO_UPDATE`
    /// (§4.1's event table: "Emitter: Portfolio Manager") so subscribers
    /// downstream of a fill see a fresh valuation without polling.
    #[instrument(skip(self, event))]
    fn on_order_fulfilled(&self, event: &Event) -> SimResult<()> {
        let Payload::Transaction(tx) = &event.payload else { return Ok(()) };
        let current_time = self.event_manager.current_time();
        {
            let mut portfolio = self.portfolio.borrow_mut();
            portfolio.apply_fill(tx);
            portfolio.refresh_prices(&self.prices, current_time);
        }
        self.valuation.invalidate();
        self.event_manager.schedule_kind(EventKind::PortfolioUpdate, Duration::zero())
    }

    /// Re-marks open positions against a `PRICE_CHANGE` event and re-emits
    /// `PORTFOLIO_UPDATE`, mirroring `on_order_fulfilled`.
    #[instrument(skip(self, event))]
    fn on_price_change(&self, event: &Event) -> SimResult<()> {
        let Payload::PriceChange(_) = &event.payload else { return Ok(()) };
        let is_empty = self.portfolio.borrow().positions.is_empty();
        if is_empty {
            return Ok(());
        }
        let current_time = self.event_manager.current_time();
        self.portfolio.borrow_mut().refresh_prices(&self.prices, current_time);
        self.valuation.invalidate();
        self.event_manager.schedule_kind(EventKind::PortfolioUpdate, Duration::zero())
    }

    /// Subscribes this manager's handlers on `event_manager`, holding only a
    /// `Weak` back-reference from the closures (§9 cycle-breaking). Each
    /// closure returns the handler's `Result` directly so a failure
    /// propagates per §7.
    pub fn install(manager: &Rc<PortfolioManager>, event_manager: &SharedEventManager) {
        let weak_fulfilled: Weak<PortfolioManager> = Rc::downgrade(manager);
        event_manager.subscribe(
            EventKind::OrderFulfilled,
            Box::new(move |event: &Event| match weak_fulfilled.upgrade() {
                Some(manager) => manager.on_order_fulfilled(event),
                None => Ok(()),
            }),
        );

        let weak_price: Weak<PortfolioManager> = Rc::downgrade(manager);
        event_manager.subscribe(
            EventKind::PriceChange,
            Box::new(move |event: &Event| match weak_price.upgrade() {
                Some(manager) => manager.on_price_change(event),
                None => Ok(()),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderId, Side};
    use chrono::TimeZone;

    fn tx(symbol: &str, side: Side, quantity: f64, price: f64, at: DateTime<Utc>) -> Transaction {
        Transaction::new(OrderId::new(), Symbol::from(symbol), side, quantity, price, 0.0, at)
    }

    #[test]
    fn buy_and_hold_matches_s4() {
        let mut portfolio = Portfolio::new(1000.0);
        let fill_time = Utc.with_ymd_and_hms(2018, 12, 26, 9, 30, 0).unwrap();
        portfolio.apply_fill(&tx("BA", Side::Buy, 1.0, 290.18, fill_time));
        assert!((portfolio.cash - 709.82).abs() < 1e-9);
        portfolio.current_market_prices.insert(Symbol::from("BA"), 290.18);
        assert!((portfolio.positions_value() - 290.18).abs() < 1e-9);
        assert!((portfolio.portfolio_value() - 1000.00).abs() < 1e-9);

        portfolio.current_market_prices.insert(Symbol::from("BA"), 305.06);
        assert!((portfolio.positions_value() - 305.06).abs() < 1e-9);
        assert!((portfolio.portfolio_value() - 1014.88).abs() < 1e-6);
    }

    #[test]
    fn price_multiplier_scales_positions_value() {
        let mut portfolio = Portfolio::new(1000.0);
        portfolio.register_asset(Asset::new(1, Symbol::from("ES"), "E-mini S&P 500").with_price_multiplier(50.0));
        let fill_time = Utc.with_ymd_and_hms(2020, 1, 2, 9, 30, 0).unwrap();
        portfolio.apply_fill(&tx("ES", Side::Buy, 1.0, 10.0, fill_time));
        portfolio.current_market_prices.insert(Symbol::from("ES"), 10.0);
        assert!((portfolio.positions_value() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn cash_conservation_holds_across_fills() {
        let mut portfolio = Portfolio::new(1000.0);
        let t = Utc.with_ymd_and_hms(2020, 1, 2, 9, 30, 0).unwrap();
        portfolio.apply_fill(&tx("AAPL", Side::Buy, 2.0, 100.0, t));
        let total_cost_basis: f64 = portfolio
            .positions
            .values()
            .flat_map(|position| position.lots.values())
            .map(|lot| lot.quantity * lot.cost_basis)
            .sum();
        assert!((portfolio.starting_cash - (portfolio.cash + total_cost_basis)).abs() < 1e-9);
    }

    #[test]
    fn cash_conservation_holds_with_commission_and_a_partial_sell() {
        let mut portfolio = Portfolio::new(1000.0);
        let t = Utc.with_ymd_and_hms(2020, 1, 2, 9, 30, 0).unwrap();
        portfolio.apply_fill(&Transaction::new(
            OrderId::new(),
            Symbol::from("AAPL"),
            Side::Buy,
            5.0,
            100.0,
            2.0,
            t,
        ));
        portfolio.apply_fill(&Transaction::new(
            OrderId::new(),
            Symbol::from("AAPL"),
            Side::Sell,
            3.0,
            110.0,
            1.5,
            t,
        ));

        assert!(portfolio.total_commission_paid > 0.0);
        assert!((portfolio.realized_pnl - 3.0 * (110.0 - 100.0)).abs() < 1e-9);
        let rhs = portfolio.cash + portfolio.cost_basis_open() + portfolio.total_commission_paid
            - portfolio.realized_pnl;
        assert!(
            (portfolio.starting_cash - rhs).abs() < 1e-9,
            "cash + cost basis + commission paid - realized pnl must equal starting cash"
        );
    }

    #[test]
    fn flat_positions_are_dropped() {
        let mut portfolio = Portfolio::new(1000.0);
        let t = Utc.with_ymd_and_hms(2020, 1, 2, 9, 30, 0).unwrap();
        portfolio.apply_fill(&tx("AAPL", Side::Buy, 5.0, 100.0, t));
        portfolio.apply_fill(&tx("AAPL", Side::Sell, 5.0, 101.0, t));
        assert!(!portfolio.positions.contains_key(&Symbol::from("AAPL")));
    }
}
