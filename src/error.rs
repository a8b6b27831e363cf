use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

/// Crate-wide error type, grouped by subsystem.
///
/// `StopIteration` from the original design is deliberately absent here: running
/// out of events is an expected outcome of [`crate::event_manager::EventManager::step`],
/// not a failure, and is modeled in that function's return type instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    ServiceLocator(#[from] ServiceLocatorError),
}

/// Errors raised by a [`crate::calendar::TradingCalendar`] implementation.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("unknown exchange MIC: '{0}'")]
    UnknownExchange(String),

    #[error("date {0} is outside the calendar's covered range")]
    OutOfRange(String),
}

/// Errors raised while loading or querying tabular market data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("symbol not found: '{0}'")]
    SymbolNotFound(String),

    #[error("requested row is outside the data source's covered range: {0}")]
    OutOfRange(String),

    #[error("underlying data frame operation failed: {0}")]
    Frame(String),
}

/// Errors raised specifically by the Prices View contract (kept distinct from
/// [`DataError`] because §4.4 of the spec names `PriceUnavailable` explicitly
/// as the error the Broker must propagate).
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("no price available for '{symbol}' at {at}")]
    Unavailable { symbol: String, at: String },

    #[error("symbol not found: '{0}'")]
    SymbolNotFound(String),

    #[error("timestamp {0} is outside the calendar's covered range")]
    OutOfRange(String),
}

/// Errors raised by the Broker when placing or rejecting an order.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order: amount must be non-zero")]
    ZeroAmount,

    #[error("order {0} is not open and cannot be transitioned")]
    NotOpen(uuid::Uuid),
}

/// Errors raised at Engine construction time or by kernel invariant checks.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid simulation window: start ({start}) must be strictly before end ({end})")]
    InvalidWindow { start: String, end: String },

    #[error("schedule delay must be non-negative, got {0}")]
    NegativeDelay(String),

    #[error("kernel invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors raised by the [`crate::service_locator::ServiceLocator`].
#[derive(Debug, Error)]
pub enum ServiceLocatorError {
    #[error("service not registered: '{0}'")]
    NotFound(&'static str),
}
