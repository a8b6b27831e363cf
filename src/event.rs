//! Closed event-type taxonomy and tagged payloads (§3, §4.1).
//!
//! Grounded in the teacher's `gym/flow/scheduler.rs` `RfqEvent` / `ScheduledEvent`
//! pair: a variant enum for the event's data, a separate queue-entry wrapper
//! whose `Ord` implementation is what the priority queue actually sorts by.
//! Here the queue entry sorts by `(time, id)` rather than `time` alone, per
//! §3's tie-break rule.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::asset::Symbol;
use crate::order::Order;
use crate::transaction::Transaction;
use std::collections::HashMap;

/// Random event identifier, also used as the deterministic tie-breaker
/// between two events scheduled for the same instant (§3, §4.3).
///
/// Plain `Uuid::new_v4()` is non-reproducible; [`EventIdGenerator`] wraps a
/// seedable RNG so a whole run's id sequence can be replayed bit-for-bit
/// (§4.3 Determinism, Testable Property 7), following the original's
/// `Order.make_id()` hex-uuid convention (kept here as a typed `Uuid` rather
/// than a bare hex string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces [`EventId`]s from a seeded RNG so a run can be replayed exactly
/// (§4.3 Determinism). Construct with [`EventIdGenerator::seeded`] for
/// reproducible runs, or [`EventIdGenerator::from_entropy`] otherwise.
pub struct EventIdGenerator {
    rng: rand::rngs::StdRng,
}

impl EventIdGenerator {
    pub fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self { rng: rand::rngs::StdRng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        use rand::SeedableRng;
        Self { rng: rand::rngs::StdRng::from_os_rng() }
    }

    pub fn next_id(&mut self) -> EventId {
        let mut bytes = [0u8; 16];
        self.rng.fill(&mut bytes);
        EventId(Uuid::from_bytes(bytes))
    }
}

/// The closed event-kind enumeration (§4.1). Used both as the subscription
/// key and as the discriminant carried on every dispatched [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PreMarketOpen,
    MarketOpen,
    MarketClose,
    PostMarketClose,
    OrderPlaced,
    OrderFulfilled,
    PortfolioUpdate,
    PriceChange,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::PreMarketOpen => "PRE_MARKET_OPEN",
            EventKind::MarketOpen => "MARKET_OPEN",
            EventKind::MarketClose => "MARKET_CLOSE",
            EventKind::PostMarketClose => "POST_MARKET_CLOSE",
            EventKind::OrderPlaced => "ORDER_PLACED",
            EventKind::OrderFulfilled => "ORDER_FULFILLED",
            EventKind::PortfolioUpdate => "PORTFOLIO_UPDATE",
            EventKind::PriceChange => "PRICE_CHANGE",
        };
        write!(f, "{s}")
    }
}

/// The per-kind payload shape (§4.1's table). The binding from [`EventKind`]
/// to payload shape is closed: every [`Event`] carries exactly the variant its
/// `kind` implies, enforced by the constructors below rather than by a
/// generic `Event<T>` (Rust's payload-carrying enum already gives a checked,
/// closed union without needing the host-language escape hatch §9 mentions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    None,
    Order(Order),
    Transaction(Transaction),
    PriceChange(HashMap<Symbol, f64>),
}

/// A timestamped, typed notification dispatched by the [`crate::event_manager::EventManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    pub time: DateTime<Utc>,
    pub payload: Payload,
}

impl Event {
    pub fn market(id: EventId, kind: EventKind, time: DateTime<Utc>) -> Self {
        debug_assert!(matches!(
            kind,
            EventKind::PreMarketOpen | EventKind::MarketOpen | EventKind::MarketClose | EventKind::PostMarketClose
        ));
        Self { id, kind, time, payload: Payload::None }
    }

    pub fn order_placed(id: EventId, time: DateTime<Utc>, order: Order) -> Self {
        Self { id, kind: EventKind::OrderPlaced, time, payload: Payload::Order(order) }
    }

    pub fn order_fulfilled(id: EventId, time: DateTime<Utc>, tx: Transaction) -> Self {
        Self { id, kind: EventKind::OrderFulfilled, time, payload: Payload::Transaction(tx) }
    }

    pub fn portfolio_update(id: EventId, time: DateTime<Utc>) -> Self {
        Self { id, kind: EventKind::PortfolioUpdate, time, payload: Payload::None }
    }

    pub fn price_change(id: EventId, time: DateTime<Utc>, prices: HashMap<Symbol, f64>) -> Self {
        Self { id, kind: EventKind::PriceChange, time, payload: Payload::PriceChange(prices) }
    }
}

/// A queue entry: what the event manager's priority queue actually orders by.
///
/// `Ord` compares `(time, id)` rather than `time` alone (mirroring the
/// teacher's `ScheduledEvent::cmp`, extended with the tie-break §3 requires),
/// so the `BinaryHeap<Reverse<ScheduledEntry>>` it backs yields a total,
/// deterministic order across co-timed events.
#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    pub time: DateTime<Utc>,
    pub event: Event,
}

impl ScheduledEntry {
    pub fn new(event: Event) -> Self {
        Self { time: event.time, event }
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.event.id == other.event.id
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then_with(|| self.event.id.cmp(&other.event.id))
    }
}
