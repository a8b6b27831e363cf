//! Kernel dispatch semantics (§4.3, §8): chained reentrant scheduling,
//! subscription FIFO order, and clock monotonicity.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Duration, TimeZone, Utc};
use simkernel::asset::Symbol;
use simkernel::calendar::NyseCalendar;
use simkernel::error::SimResult;
use simkernel::event::{Event, EventIdGenerator, EventKind};
use simkernel::event_manager::EventManager;
use simkernel::market_generator::MarketEventGenerator;
use simkernel::order::Order;

fn kernel(start: DateTime<Utc>, end: DateTime<Utc>) -> Rc<EventManager> {
    let calendar = Rc::new(NyseCalendar::new());
    let market_generator = MarketEventGenerator::new(calendar);
    let id_generator = EventIdGenerator::seeded(7);
    Rc::new(EventManager::new(start, end, market_generator, id_generator).unwrap())
}

fn log_everything(event_manager: &Rc<EventManager>, log: &Rc<RefCell<Vec<(EventKind, DateTime<Utc>)>>>) {
    for kind in [
        EventKind::PreMarketOpen,
        EventKind::MarketOpen,
        EventKind::MarketClose,
        EventKind::PostMarketClose,
        EventKind::OrderPlaced,
        EventKind::OrderFulfilled,
    ] {
        let log = log.clone();
        event_manager.subscribe(
            kind,
            Box::new(move |event: &Event| -> SimResult<()> {
                log.borrow_mut().push((event.kind, event.time));
                Ok(())
            }),
        );
    }
}

/// S2: a `MARKET_OPEN` handler schedules `ORDER_PLACED` with zero delay, and
/// an `ORDER_PLACED` handler schedules `ORDER_FULFILLED` 3 seconds later.
/// Both handlers call back into the same `EventManager` they are dispatched
/// from — this is the scenario that requires `EventManager`'s fields to be
/// independently interior-mutable rather than sitting behind one outer
/// `RefCell` borrowed across the whole dispatch.
#[test]
fn chained_schedule_reenters_the_manager_without_panicking() {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap();
    let event_manager = kernel(start, end);

    let log = Rc::new(RefCell::new(Vec::new()));
    log_everything(&event_manager, &log);

    let weak: Weak<EventManager> = Rc::downgrade(&event_manager);
    event_manager.subscribe(
        EventKind::MarketOpen,
        Box::new(move |event: &Event| -> SimResult<()> {
            let Some(em) = weak.upgrade() else { return Ok(()) };
            let order = Order::new(Symbol::from("AAPL"), 10.0, event.time)?;
            em.schedule_order_placed(order, Duration::zero())
        }),
    );

    let weak: Weak<EventManager> = Rc::downgrade(&event_manager);
    event_manager.subscribe(
        EventKind::OrderPlaced,
        Box::new(move |event: &Event| -> SimResult<()> {
            let Some(em) = weak.upgrade() else { return Ok(()) };
            let simkernel::event::Payload::Order(order) = &event.payload else { return Ok(()) };
            let tx = simkernel::transaction::Transaction::new(
                order.id,
                order.symbol.clone(),
                order.side(),
                order.amount,
                100.0,
                0.0,
                event.time + Duration::seconds(3),
            );
            em.schedule_order_fulfilled(tx, Duration::seconds(3))
        }),
    );

    event_manager.run().unwrap();

    let log = log.borrow();
    let market_open_idx = log.iter().position(|(k, _)| *k == EventKind::MarketOpen).unwrap();
    let order_placed_idx = log.iter().position(|(k, _)| *k == EventKind::OrderPlaced).unwrap();
    let order_fulfilled_idx = log.iter().position(|(k, _)| *k == EventKind::OrderFulfilled).unwrap();

    assert!(market_open_idx < order_placed_idx, "order placed dispatches after market open");
    assert!(order_placed_idx < order_fulfilled_idx, "fulfillment dispatches after placement");
    assert_eq!(log[market_open_idx].1, log[order_placed_idx].1, "zero-delay schedule ties with market open");
    assert_eq!(
        log[order_fulfilled_idx].1,
        log[order_placed_idx].1 + Duration::seconds(3),
        "fulfillment lands exactly 3s after placement"
    );

    let market_close_idx = log.iter().position(|(k, _)| *k == EventKind::MarketClose).unwrap();
    assert!(order_fulfilled_idx < market_close_idx, "fulfillment dispatches strictly before the session closes");
}

/// Testable Property 4: subscribers of the same kind fire in subscription order.
#[test]
fn handlers_fire_in_subscription_order() {
    let start = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 1, 2, 10, 0, 0).unwrap();
    let event_manager = kernel(start, end);

    let order = Rc::new(RefCell::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let order = order.clone();
        event_manager.subscribe(
            EventKind::PreMarketOpen,
            Box::new(move |_: &Event| -> SimResult<()> {
                order.borrow_mut().push(tag);
                Ok(())
            }),
        );
    }

    assert!(event_manager.step_until(EventKind::PreMarketOpen).unwrap().is_some());
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
}

/// Testable Property 1: the virtual clock never runs backwards across
/// dispatched events, market-driven or endogenously scheduled alike.
#[test]
fn clock_is_monotonically_non_decreasing() {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap();
    let event_manager = kernel(start, end);

    let weak: Weak<EventManager> = Rc::downgrade(&event_manager);
    event_manager.subscribe(
        EventKind::MarketOpen,
        Box::new(move |event: &Event| -> SimResult<()> {
            let Some(em) = weak.upgrade() else { return Ok(()) };
            let order = Order::new(Symbol::from("AAPL"), 1.0, event.time)?;
            em.schedule_order_placed(order, Duration::zero())
        }),
    );

    let mut previous = event_manager.current_time();
    loop {
        match event_manager.step().unwrap() {
            simkernel::event_manager::StepOutcome::Dispatched(event) => {
                assert!(event.time >= previous, "clock moved backwards");
                previous = event.time;
            }
            simkernel::event_manager::StepOutcome::Done => break,
        }
    }
}
