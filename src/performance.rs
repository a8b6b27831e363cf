//! Daily position/return recorder (§4.6). Out of scope are tear-sheets and
//! risk stats (§1 Non-goals); this module only keeps the daily-return series
//! they would be built from.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::NaiveDate;
use tracing::instrument;

use crate::asset::Symbol;
use crate::error::SimResult;
use crate::event::{Event, EventKind};
use crate::event_manager::SharedEventManager;
use crate::portfolio::PortfolioManager;

/// One day's snapshot: net position per symbol, and the day's return once a
/// prior observation exists to compare against.
#[derive(Debug, Clone, Default)]
pub struct DailyRecord {
    pub positions: HashMap<Symbol, f64>,
    pub return_pct: Option<f64>,
}

/// Subscribes to `MARKET_CLOSE` and appends one [`DailyRecord`] per session
/// (§4.6). Snapshots the portfolio by value-copy so later mutation of the
/// live portfolio cannot alias a recorded day.
pub struct PerformanceTracker {
    portfolio: Rc<PortfolioManager>,
    records: RefCell<Vec<(NaiveDate, DailyRecord)>>,
    previous_value: RefCell<Option<f64>>,
}

impl PerformanceTracker {
    pub fn new(portfolio: Rc<PortfolioManager>) -> Self {
        Self {
            portfolio,
            records: RefCell::new(Vec::new()),
            previous_value: RefCell::new(None),
        }
    }

    pub fn records(&self) -> Vec<(NaiveDate, DailyRecord)> {
        self.records.borrow().clone()
    }

    #[instrument(skip(self, event))]
    fn on_market_close(&self, event: &Event) -> SimResult<()> {
        let snapshot = self.portfolio.snapshot();
        let date = event.time.date_naive();
        let current_value = snapshot.portfolio_value();

        let mut previous_value = self.previous_value.borrow_mut();
        let return_pct = previous_value.map(|previous| {
            if previous.abs() < f64::EPSILON {
                0.0
            } else {
                (current_value - previous) / previous
            }
        });
        *previous_value = Some(current_value);

        let positions = snapshot
            .positions
            .iter()
            .map(|(symbol, position)| (symbol.clone(), position.quantity()))
            .collect();

        self.records.borrow_mut().push((date, DailyRecord { positions, return_pct }));
        Ok(())
    }

    /// Subscribes on `MARKET_CLOSE`, holding only a `Weak` back-reference
    /// from the closure (§9 cycle-breaking). The closure returns the
    /// handler's `Result` directly so a failure propagates per §7.
    pub fn install(tracker: &Rc<PerformanceTracker>, event_manager: &SharedEventManager) {
        let weak: Weak<PerformanceTracker> = Rc::downgrade(tracker);
        event_manager.subscribe(
            EventKind::MarketClose,
            Box::new(move |event: &Event| match weak.upgrade() {
                Some(tracker) => tracker.on_market_close(event),
                None => Ok(()),
            }),
        );
    }
}
