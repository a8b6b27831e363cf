//! Composition root (§4.9), grounded in the teacher's `Environment`
//! construction in `gym/trading/env.rs`: one place that wires the kernel and
//! its services together and registers each in the
//! [`crate::service_locator`].

use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::calendar::TradingCalendar;
use crate::commission::{CommissionModel, ZeroCommission};
use crate::data::prices::PricesView;
use crate::data::source::OhlcvSource;
use crate::error::{EngineError, SimResult};
use crate::event::{EventIdGenerator, EventKind};
use crate::event_manager::{EventManager, StepOutcome};
use crate::market_generator::MarketEventGenerator;
use crate::order::Order;
use crate::performance::PerformanceTracker;
use crate::portfolio::PortfolioManager;
use crate::service_locator;
use crate::strategy::TradingStrategy;
use crate::{asset::Symbol, broker::Broker};

/// Construction-time configuration for an [`Engine`] (§A.3): exchange MIC,
/// simulation window, capital base, execution delay, commission model.
/// `Serialize`/`Deserialize` so a host application can load this from
/// whatever format it likes; this crate ships no loader (§1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub capital_base: f64,
    #[serde(with = "duration_millis")]
    pub execution_delay: Duration,
    /// Deterministic event-id seed (§4.3 Determinism). `None` draws entropy
    /// from the OS, making the run non-reproducible.
    pub event_id_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            end: Utc::now(),
            capital_base: 0.0,
            execution_delay: crate::broker::DEFAULT_EXECUTION_DELAY,
            event_id_seed: None,
        }
    }
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(delay.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(d)?;
        Ok(Duration::milliseconds(millis))
    }
}

/// Thin composition root exposing `run()` and `step_until()` (§4.9).
pub struct Engine {
    event_manager: crate::event_manager::SharedEventManager,
    portfolio: Rc<PortfolioManager>,
    broker: Rc<Broker>,
    performance: Rc<PerformanceTracker>,
    strategy: Option<Rc<TradingStrategy>>,
}

impl Engine {
    /// Wires the Event Manager, Broker, Portfolio Manager, Performance
    /// Tracker, and an optional Strategy; registers each in the
    /// [`crate::service_locator`] (§4.9 `new`).
    #[instrument(skip(config, calendar, source, commission_model))]
    pub fn new(
        config: EngineConfig,
        calendar: Rc<dyn TradingCalendar>,
        source: Rc<OhlcvSource>,
        commission_model: Option<Rc<dyn CommissionModel>>,
    ) -> SimResult<Self> {
        if config.start >= config.end {
            return Err(EngineError::InvalidWindow {
                start: config.start.to_rfc3339(),
                end: config.end.to_rfc3339(),
            }
            .into());
        }
        if config.execution_delay < Duration::zero() {
            return Err(EngineError::NegativeDelay(config.execution_delay.to_string()).into());
        }

        let id_generator = match config.event_id_seed {
            Some(seed) => EventIdGenerator::seeded(seed),
            None => EventIdGenerator::from_entropy(),
        };
        let market_generator = MarketEventGenerator::new(calendar.clone());
        let event_manager = Rc::new(EventManager::new(
            config.start,
            config.end,
            market_generator,
            id_generator,
        )?);

        let prices = Rc::new(PricesView::new(source.clone(), calendar));
        let commission_model = commission_model.unwrap_or_else(|| Rc::new(ZeroCommission) as Rc<dyn CommissionModel>);

        let broker = Rc::new(Broker::new(
            event_manager.clone(),
            prices.clone(),
            commission_model,
            config.execution_delay,
        ));
        Broker::install(&broker, &event_manager);

        let portfolio = Rc::new(PortfolioManager::new(config.capital_base, prices, event_manager.clone()));
        PortfolioManager::install(&portfolio, &event_manager);

        let performance = Rc::new(PerformanceTracker::new(portfolio.clone()));
        PerformanceTracker::install(&performance, &event_manager);

        service_locator::register("event_manager", event_manager.clone());
        service_locator::register("broker", broker.clone());
        service_locator::register("portfolio", portfolio.clone());
        service_locator::register("performance", performance.clone());

        Ok(Self { event_manager, portfolio, broker, performance, strategy: None })
    }

    /// Attaches a [`TradingStrategy`] built against this engine's broker and
    /// portfolio (§4.9 `new`'s optional `strategy` argument).
    pub fn with_strategy(mut self, strategy: Rc<TradingStrategy>) -> Self {
        TradingStrategy::install(&strategy, &self.event_manager);
        service_locator::register("strategy", strategy.clone());
        self.strategy = Some(strategy);
        self
    }

    pub fn place_order(&self, symbol: Symbol, amount: f64) -> SimResult<Order> {
        self.broker.place_order(symbol, amount)
    }

    /// Registers an asset's static identity (symbol, name, price multiplier)
    /// with the Portfolio Manager (§3 supplemented `Asset.price_multiplier`).
    pub fn register_asset(&self, asset: crate::asset::Asset) {
        self.portfolio.register_asset(asset);
    }

    pub fn portfolio(&self) -> &Rc<PortfolioManager> {
        &self.portfolio
    }

    pub fn performance(&self) -> &Rc<PerformanceTracker> {
        &self.performance
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.event_manager.current_time()
    }

    /// Runs the kernel to exhaustion (§4.9 `run`).
    pub fn run(&self) -> SimResult<()> {
        self.event_manager.run()
    }

    /// Iterates until the next dispatched event matches `kind` (§4.9 `step_until`).
    pub fn step_until(&self, kind: EventKind) -> SimResult<Option<crate::event::Event>> {
        self.event_manager.step_until(kind)
    }

    /// Runs a single kernel step, exposing the raw [`StepOutcome`] for callers
    /// that need finer control than `run`/`step_until`.
    pub fn step(&self) -> SimResult<StepOutcome> {
        self.event_manager.step()
    }
}
