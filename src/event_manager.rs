//! The simulation kernel (§4.3): virtual clock, subscription table, and the
//! priority queue merging scheduled events with market-generator output.
//!
//! Grounded in the teacher's `gym/flow/scheduler.rs` `Scheduler::step`, which
//! merges a market cursor peek with a `BinaryHeap<Reverse<ScheduledEvent>>`
//! peek the same way: compare the two candidate times, consume whichever is
//! earlier, and only actually advance the loser's side once chosen. The
//! teacher's heap carries a "queue wins ties" rule this kernel keeps, because
//! zero-delay schedules issued while handling an event at time `t` must
//! dispatch before the next market event at or beyond `t` (§4.3 Testable
//! Property 3).
//!
//! Unlike the teacher, whose `Scheduler::step` takes the queue as a borrowed
//! parameter from a caller that owns it, this kernel's handlers are
//! `Rc`-shared closures that must themselves call back into the manager
//! mid-dispatch to schedule further events (§4.3: "Handlers may schedule
//! further events"). A single outer `RefCell<EventManager>` borrowed for the
//! whole `step`/`publish` call would make that reentrant call panic. Each
//! mutable field is therefore its own `Cell`/`RefCell`, borrowed only for the
//! narrow operation that touches it, so `EventManager`'s methods take `&self`
//! throughout and a handler's `schedule_*` call never conflicts with the
//! dispatch loop that invoked it.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use crate::error::{EngineError, SimResult};
use crate::event::{Event, EventId, EventIdGenerator, EventKind, ScheduledEntry};
use crate::market_generator::MarketEventGenerator;

/// A subscriber invoked synchronously during [`EventManager::publish`].
///
/// Boxed `FnMut` rather than a trait object over a named `Handler` trait: the
/// teacher's closures-over-services pattern (handlers close over `Rc`-owned
/// services, e.g. a `Broker` or `Portfolio`) composes directly with `FnMut`,
/// and keeps subscription sites (`broker.rs`, `portfolio.rs`) free of an extra
/// trait to implement per service. Returns `SimResult<()>` so a handler's
/// failure can propagate out of `publish`/`step` rather than being swallowed
/// at the call site (§7 "the kernel does not swallow errors from handlers").
pub type Handler = Box<dyn FnMut(&Event) -> SimResult<()>>;

/// What one [`EventManager::step`] call produced.
///
/// `StopIteration` from §7 is deliberately not an error: it is the expected
/// way the loop ends, matching the teacher's `SchedulerOutcome::Done` /
/// `EnvStatus` pattern of modeling termination as a variant rather than an
/// exception.
#[derive(Debug)]
pub enum StepOutcome {
    /// An event was dispatched; the clock now reads its `time`.
    Dispatched(Event),
    /// The queue is empty and the next market event falls after `end_time`.
    Done,
}

/// Owns the virtual clock, subscription table, and event queue (§4.3 State).
///
/// Every field that mutates during a `step` is independently interior-mutable
/// so dispatch can re-enter `schedule_*`/`subscribe` without a held borrow
/// spanning the whole call — see the module doc comment.
pub struct EventManager {
    current_time: Cell<DateTime<Utc>>,
    end_time: DateTime<Utc>,
    subscribers: RefCell<HashMap<EventKind, Vec<Handler>>>,
    queue: RefCell<BinaryHeap<Reverse<ScheduledEntry>>>,
    market_generator: MarketEventGenerator,
    id_generator: RefCell<EventIdGenerator>,
}

impl EventManager {
    /// Builds a kernel starting at `start` and running through `end`
    /// (exclusive, per §8 S1's `[start, end)` framing). `start < end` is
    /// required (§7 `ConfigurationError`).
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        market_generator: MarketEventGenerator,
        id_generator: EventIdGenerator,
    ) -> SimResult<Self> {
        if start >= end {
            return Err(EngineError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            }
            .into());
        }
        Ok(Self {
            current_time: Cell::new(start),
            end_time: end,
            subscribers: RefCell::new(HashMap::new()),
            queue: RefCell::new(BinaryHeap::new()),
            market_generator,
            id_generator: RefCell::new(id_generator),
        })
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time.get()
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Appends `handler` to `kind`'s subscriber list (FIFO, §3 Subscription table).
    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        self.subscribers.borrow_mut().entry(kind).or_default().push(handler);
    }

    /// Builds and enqueues an event of `kind` with the given `payload`-bearing
    /// constructor, `delay` after `current_time` (§4.3 `schedule`). A zero
    /// delay is the idiomatic way to emit "right now, after the current
    /// handler returns" (§4.3).
    fn enqueue(&self, kind: EventKind, time: DateTime<Utc>, make_payload: impl FnOnce(EventId) -> Event) {
        let id = self.id_generator.borrow_mut().next_id();
        let event = make_payload(id);
        debug_assert_eq!(event.kind, kind);
        debug_assert_eq!(event.time, time);
        self.queue.borrow_mut().push(Reverse(ScheduledEntry::new(event)));
    }

    /// Schedules a payload-less event of `kind` `delay` after `current_time`.
    /// Subscribers use this to re-raise `PORTFOLIO_UPDATE`; `Event::market`
    /// is reserved for the four session-boundary kinds (its own
    /// `debug_assert` enforces that), so this dispatches to
    /// `Event::portfolio_update` for that kind instead of abusing it.
    pub fn schedule_kind(&self, kind: EventKind, delay: Duration) -> SimResult<()> {
        let time = self.scheduled_time(delay)?;
        let id = self.id_generator.borrow_mut().next_id();
        let event = match kind {
            EventKind::PortfolioUpdate => Event::portfolio_update(id, time),
            _ => Event::market(id, kind, time),
        };
        self.queue.borrow_mut().push(Reverse(ScheduledEntry::new(event)));
        Ok(())
    }

    pub fn schedule_order_placed(&self, order: crate::order::Order, delay: Duration) -> SimResult<()> {
        let time = self.scheduled_time(delay)?;
        self.enqueue(EventKind::OrderPlaced, time, |id| Event::order_placed(id, time, order));
        Ok(())
    }

    pub fn schedule_order_fulfilled(&self, tx: crate::transaction::Transaction, delay: Duration) -> SimResult<()> {
        let time = self.scheduled_time(delay)?;
        self.enqueue(EventKind::OrderFulfilled, time, |id| Event::order_fulfilled(id, time, tx));
        Ok(())
    }

    pub fn schedule_price_change(
        &self,
        prices: HashMap<crate::asset::Symbol, f64>,
        delay: Duration,
    ) -> SimResult<()> {
        let time = self.scheduled_time(delay)?;
        self.enqueue(EventKind::PriceChange, time, |id| Event::price_change(id, time, prices));
        Ok(())
    }

    fn scheduled_time(&self, delay: Duration) -> SimResult<DateTime<Utc>> {
        if delay < Duration::zero() {
            return Err(EngineError::NegativeDelay(delay.to_string()).into());
        }
        Ok(self.current_time.get() + delay)
    }

    /// The heart of the engine (§4.3 Iterator step): merges the market
    /// generator's next candidate with the queue's head, advances the clock
    /// to whichever is earlier (queue wins ties), and dispatches it.
    #[instrument(skip(self), fields(simulation_time = %self.current_time.get()))]
    pub fn step(&self) -> SimResult<StepOutcome> {
        let market = self.market_generator.next(self.current_time.get())?;
        let queue_head_time = self.queue.borrow().peek().map(|Reverse(entry)| entry.time);

        let dispatch_from_queue = match queue_head_time {
            Some(t) => t <= market.time,
            None => false,
        };

        if dispatch_from_queue {
            let Reverse(entry) = self.queue.borrow_mut().pop().expect("just peeked");
            self.current_time.set(entry.time);
            let event = entry.event;
            self.publish(&event)?;
            return Ok(StepOutcome::Dispatched(event));
        }

        if market.time > self.end_time {
            return Ok(StepOutcome::Done);
        }

        self.current_time.set(market.time);
        let id = self.id_generator.borrow_mut().next_id();
        let event = Event::market(id, market.kind, market.time);
        self.publish(&event)?;
        Ok(StepOutcome::Dispatched(event))
    }

    /// Invokes every subscriber of `event.kind` in subscription order
    /// (§4.3 `publish`, Testable Property 4). Aborts at the first handler
    /// that returns `Err`, surfacing it to the caller of `step`/`run`/
    /// `step_until` without running the remaining subscribers for this event
    /// (§7 Propagation policy). Handlers that do run to completion may have
    /// scheduled further events; those land in the queue and are only
    /// considered from the *next* `step` call onward.
    ///
    /// Borrows `subscribers` only for the duration of this call; a handler
    /// scheduling new events touches `queue`/`id_generator` instead, so no
    /// reentrant borrow of this field is possible. A handler that tried to
    /// `subscribe` a new callback mid-dispatch would panic on the nested
    /// `borrow_mut` — subscriptions are expected to be wired once at setup,
    /// before `run`/`step` is ever called.
    #[instrument(skip(self, event), fields(simulation_time = %event.time, kind = %event.kind))]
    fn publish(&self, event: &Event) -> SimResult<()> {
        if let Some(handlers) = self.subscribers.borrow_mut().get_mut(&event.kind) {
            for handler in handlers.iter_mut() {
                handler(event)?;
            }
        }
        Ok(())
    }

    /// Runs the kernel to exhaustion (§4.9 `run`).
    pub fn run(&self) -> SimResult<()> {
        loop {
            match self.step()? {
                StepOutcome::Dispatched(_) => continue,
                StepOutcome::Done => return Ok(()),
            }
        }
    }

    /// Iterates until the next dispatched event matches `kind`, returning it
    /// (§4.9 `step_until`). Returns `Ok(None)` if the loop ends first.
    pub fn step_until(&self, kind: EventKind) -> SimResult<Option<Event>> {
        loop {
            match self.step()? {
                StepOutcome::Dispatched(event) if event.kind == kind => return Ok(Some(event)),
                StepOutcome::Dispatched(_) => continue,
                StepOutcome::Done => return Ok(None),
            }
        }
    }
}

/// A reference-counted handle to an [`EventManager`], shared between services
/// (`Broker`, `Portfolio`, `Strategy`) that need to subscribe and schedule.
/// `EventManager`'s own fields carry whatever interior mutability they need
/// (see the struct doc comment), so this is a plain `Rc` rather than
/// `Rc<RefCell<..>>` — wrapping it in a second `RefCell` would reintroduce
/// the reentrancy hazard `EventManager` itself was split apart to avoid.
/// Services hold this `Rc`; the manager itself holds only `Weak` references
/// back to them via their handler closures, breaking the cycle §9 calls out.
pub type SharedEventManager = Rc<EventManager>;
