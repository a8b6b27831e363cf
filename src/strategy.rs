//! Strategy harness (§4.7), grounded in the original `strategy.py`'s
//! function-plus-data-bindings assembly and the teacher's builder-then-build
//! convention for wiring a user callback into the event graph.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::instrument;

use crate::asset::Symbol;
use crate::broker::Broker;
use crate::data::prices::PricesView;
use crate::data::source::{FetchMode, OhlcvRow, OhlcvSource};
use crate::error::SimResult;
use crate::event::{Event, EventKind};
use crate::event_manager::SharedEventManager;
use crate::portfolio::PortfolioManager;

/// A data binding a strategy declares at build time (§4.7 step (b)):
/// either the live current price or a historical window of length `L`.
#[derive(Debug, Clone, Copy)]
pub enum DataBinding {
    CurrentPrices,
    HistoricalWindow { len: usize },
}

/// The per-kind fetched views a strategy's user function receives at call
/// time (§4.7 step 1-2). Built fresh for every invocation; the harness must
/// not retain references to it across calls (§4.7's closing sentence).
#[derive(Debug, Clone, Default)]
pub struct StrategyData {
    pub current_prices: HashMap<Symbol, f64>,
    pub historical_windows: HashMap<Symbol, Vec<OhlcvRow>>,
}

/// What the user function is handed alongside [`StrategyData`] (§4.7 step 2).
pub struct StrategyContext<'a> {
    pub portfolio: &'a PortfolioManager,
    pub time: DateTime<Utc>,
    pub event_kind: EventKind,
    pub broker: &'a Broker,
}

/// The user-supplied decision function (§6 "Strategy function").
pub type StrategyFn = dyn FnMut(&StrategyContext<'_>, &StrategyData);

/// Builds a [`TradingStrategy`] by declaring which event kinds it fires on
/// and which data bindings it needs (§4.7 step (a)).
#[derive(Default)]
pub struct StrategyBuilder {
    kinds: Vec<EventKind>,
    bindings: HashMap<Symbol, Vec<DataBinding>>,
}

impl StrategyBuilder {
    pub fn new() -> Self {
        Self { kinds: Vec::new(), bindings: HashMap::new() }
    }

    pub fn on(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_binding(mut self, symbol: Symbol, binding: DataBinding) -> Self {
        self.bindings.entry(symbol).or_default().push(binding);
        self
    }

    /// Assembles a [`TradingStrategy`] that, on each subscribed event, fetches
    /// its declared data bindings and invokes `f` (§4.7 `build`).
    pub fn build(
        self,
        f: Box<StrategyFn>,
        prices: Rc<PricesView>,
        source: Rc<OhlcvSource>,
        broker: Rc<Broker>,
        portfolio: Rc<PortfolioManager>,
    ) -> TradingStrategy {
        TradingStrategy {
            kinds: self.kinds,
            bindings: self.bindings,
            f: std::cell::RefCell::new(f),
            prices,
            source,
            broker,
            portfolio,
        }
    }
}

/// A fully-wired strategy, ready to be [`TradingStrategy::install`]ed on an
/// [`crate::event_manager::EventManager`] (§4.7).
pub struct TradingStrategy {
    kinds: Vec<EventKind>,
    bindings: HashMap<Symbol, Vec<DataBinding>>,
    f: std::cell::RefCell<Box<StrategyFn>>,
    prices: Rc<PricesView>,
    source: Rc<OhlcvSource>,
    broker: Rc<Broker>,
    portfolio: Rc<PortfolioManager>,
}

impl TradingStrategy {
    #[instrument(skip(self, event))]
    fn execute(&self, event: &Event) -> SimResult<()> {
        let data = self.fetch_data(event.time);
        let context = StrategyContext {
            portfolio: &self.portfolio,
            time: event.time,
            event_kind: event.kind,
            broker: &self.broker,
        };
        (self.f.borrow_mut())(&context, &data);
        Ok(())
    }

    fn fetch_data(&self, at: DateTime<Utc>) -> StrategyData {
        let mut data = StrategyData::default();
        let date: NaiveDate = at.date_naive();
        for (symbol, bindings) in &self.bindings {
            for binding in bindings {
                match binding {
                    DataBinding::CurrentPrices => {
                        if let Ok(price) = self.prices.price_at(symbol, at) {
                            data.current_prices.insert(symbol.clone(), price);
                        }
                    }
                    DataBinding::HistoricalWindow { len } => {
                        if let Ok(rows) = self.source.fetch(symbol, date, FetchMode::Slice { len: *len }) {
                            data.historical_windows.insert(symbol.clone(), rows);
                        }
                    }
                }
            }
        }
        data
    }

    /// Subscribes this strategy's handler on every declared event kind,
    /// holding only a `Weak` back-reference from the closures (§9
    /// cycle-breaking). Each closure returns the handler's `Result` directly
    /// so a failure propagates per §7.
    pub fn install(strategy: &Rc<TradingStrategy>, event_manager: &SharedEventManager) {
        for kind in strategy.kinds.clone() {
            let weak: Weak<TradingStrategy> = Rc::downgrade(strategy);
            event_manager.subscribe(
                kind,
                Box::new(move |event: &Event| match weak.upgrade() {
                    Some(strategy) => strategy.execute(event),
                    None => Ok(()),
                }),
            );
        }
    }
}
