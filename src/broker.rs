//! Order execution (§4.4), grounded in the original `broker.py`'s
//! `BrokerService` (kept per §9's resolution of the two order-placement-time
//! policies; `order.py`'s simpler `OrderManager` variant is superseded).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::Duration;
use tracing::instrument;

use crate::asset::Symbol;
use crate::commission::{commission_for, CommissionModel};
use crate::data::prices::PricesView;
use crate::error::{EngineError, OrderError, PriceError, SimResult};
use crate::event::{Event, EventKind, Payload};
use crate::event_manager::SharedEventManager;
use crate::order::{Order, OrderId};
use crate::transaction::Transaction;

/// Default delay between an `ORDER_PLACED` event and its `ORDER_FULFILLED`
/// counterpart (§4.4: "a small constant, default 3 ms").
pub const DEFAULT_EXECUTION_DELAY: Duration = Duration::milliseconds(3);

/// Executes orders against a [`PricesView`], applying `commission_model` to
/// each fill and scheduling the resulting `ORDER_FULFILLED` event (§4.4).
///
/// Owns the canonical `Order` record for every order it has placed, keyed by
/// [`OrderId`], so the OPEN→FILLED/CANCELLED lifecycle (§3) has somewhere to
/// live: the clone carried on an event's [`Payload`] is a point-in-time
/// snapshot, not the order of record.
pub struct Broker {
    event_manager: SharedEventManager,
    prices: Rc<PricesView>,
    commission_model: Rc<dyn CommissionModel>,
    execution_delay: Duration,
    orders: RefCell<HashMap<OrderId, Order>>,
}

impl Broker {
    pub fn new(
        event_manager: SharedEventManager,
        prices: Rc<PricesView>,
        commission_model: Rc<dyn CommissionModel>,
        execution_delay: Duration,
    ) -> Self {
        Self { event_manager, prices, commission_model, execution_delay, orders: RefCell::new(HashMap::new()) }
    }

    /// Places an order for `amount` shares of `symbol` (§4.4 `place_order`).
    ///
    /// If the current virtual time is outside a trading session, the
    /// order's `placed_at` is shifted to the next session open and the
    /// `ORDER_PLACED` event is scheduled with the matching delay; otherwise
    /// it fires immediately (zero delay).
    #[instrument(skip(self))]
    pub fn place_order(&self, symbol: Symbol, amount: f64) -> SimResult<Order> {
        if amount == 0.0 {
            return Err(OrderError::ZeroAmount.into());
        }
        let current_time = self.event_manager.current_time();
        let placed_at = if self.prices_calendar_in_session(current_time) {
            current_time
        } else {
            self.next_open(current_time)?
        };
        let order = Order::new(symbol, amount, placed_at)?;
        self.orders.borrow_mut().insert(order.id, order.clone());
        let delay = placed_at - current_time;
        self.event_manager.schedule_order_placed(order.clone(), delay)?;
        Ok(order)
    }

    /// Looks up the order-of-record for `id`, reflecting whatever lifecycle
    /// transitions have been applied to it so far.
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.borrow().get(&id).cloned()
    }

    fn prices_calendar_in_session(&self, t: chrono::DateTime<chrono::Utc>) -> bool {
        self.prices.calendar().is_trading_minute(t)
    }

    fn next_open(&self, t: chrono::DateTime<chrono::Utc>) -> SimResult<chrono::DateTime<chrono::Utc>> {
        self.prices.calendar().next_open(t)
    }

    /// Handles a dispatched `ORDER_PLACED` event: prices the fill from the
    /// Prices View, builds the `Transaction`, and schedules `ORDER_FULFILLED`
    /// after `execution_delay` (§4.4 steps 1–3).
    ///
    /// If the price lookup fails, the order-of-record is cancelled (§5
    /// cancellation condition (b): "the handler invoked for it returns an
    /// error") before the error is propagated, so the order never silently
    /// vanishes — it ends in a caller-visible terminal state instead.
    #[instrument(skip(self, event))]
    fn on_order_placed(&self, event: &Event) -> SimResult<()> {
        let Payload::Order(order) = &event.payload else {
            return Ok(());
        };
        let current_time = self.event_manager.current_time();
        let price = match self.prices.price_at(&order.symbol, current_time) {
            Ok(price) => price,
            Err(_) => {
                if let Some(stored) = self.orders.borrow_mut().get_mut(&order.id) {
                    let _ = stored.cancel();
                }
                return Err(PriceError::Unavailable {
                    symbol: order.symbol.to_string(),
                    at: current_time.to_rfc3339(),
                }
                .into());
            }
        };
        let commission = commission_for(self.commission_model.as_ref(), order, order.amount, price);
        let tx = Transaction::new(
            order.id,
            order.symbol.clone(),
            order.side(),
            order.amount,
            price,
            commission,
            current_time + self.execution_delay,
        );
        self.event_manager.schedule_order_fulfilled(tx, self.execution_delay)?;
        Ok(())
    }

    /// Handles a dispatched `ORDER_FULFILLED` event: transitions the
    /// order-of-record OPEN → FILLED (§3 "transitions OPEN → FILLED on
    /// fulfilment") at the transaction's fill price and timestamp.
    #[instrument(skip(self, event))]
    fn on_order_fulfilled(&self, event: &Event) -> SimResult<()> {
        let Payload::Transaction(tx) = &event.payload else {
            return Ok(());
        };
        let mut orders = self.orders.borrow_mut();
        let order = orders
            .get_mut(&tx.order_id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("no order-of-record for {}", tx.order_id)))?;
        order.fill(tx.price, tx.executed_at)
    }

    /// Registers this broker's `ORDER_PLACED`/`ORDER_FULFILLED` handlers on
    /// `event_manager`.
    ///
    /// Kept as an associated function taking `Rc<Self>` (rather than
    /// `&self`) so the handler closures can hold a `Weak` back-reference
    /// instead of an owning one, breaking the manager/handler cycle §9 calls
    /// out: the manager owns the closures, the closures only weakly reach
    /// the broker they serve. Each closure returns the handler's `Result`
    /// directly rather than catching it, so a failure propagates out of
    /// `EventManager::publish` to the caller of `run`/`step_until` (§7).
    pub fn install(broker: &Rc<Broker>, event_manager: &SharedEventManager) {
        let weak: Weak<Broker> = Rc::downgrade(broker);
        event_manager.subscribe(
            EventKind::OrderPlaced,
            Box::new(move |event: &Event| match weak.upgrade() {
                Some(broker) => broker.on_order_placed(event),
                None => Ok(()),
            }),
        );

        let weak: Weak<Broker> = Rc::downgrade(broker);
        event_manager.subscribe(
            EventKind::OrderFulfilled,
            Box::new(move |event: &Event| match weak.upgrade() {
                Some(broker) => broker.on_order_fulfilled(event),
                None => Ok(()),
            }),
        );
    }
}
