use thiserror::Error;

/// Fatal, pre-run configuration problem. Detected by `RunConfig::validate`
/// before any bar is processed; never produces a partial result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("fast EMA period ({fast}) must be smaller than slow EMA period ({slow})")]
    PeriodOrder { fast: usize, slow: usize },
    #[error("{name} must be positive (value: {value})")]
    NonPositive { name: &'static str, value: f64 },
    #[error("{name} must be within (0, 1] (value: {value})")]
    RatioOutOfRange { name: &'static str, value: f64 },
    #[error("max_open_positions must be at least 1")]
    ZeroPositionCap,
}

/// Malformed or non-monotonic bar input. Fatal for the affected run only;
/// sibling parameter-search runs continue.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("row {row}: could not parse {field} (value: {value})")]
    BadField {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("row {row}: timestamp {current} does not advance past {previous}")]
    NonMonotonic {
        row: usize,
        previous: String,
        current: String,
    },
    #[error("no bars in input")]
    Empty,
}

/// Order placement, cancellation, or connectivity failure against the venue.
/// Transient variants are retried with backoff before being escalated.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("venue rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("order {0} not found on venue")]
    UnknownOrder(String),
    #[error("retries exhausted for {context}: {source}")]
    RetriesExhausted {
        context: String,
        #[source]
        source: Box<VenueError>,
    },
    #[error("venue operation interrupted by shutdown")]
    Interrupted,
}

impl VenueError {
    /// Transport problems and server-side errors are worth retrying;
    /// explicit API rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            VenueError::Transport(_) => true,
            VenueError::Rejected { status, .. } => *status >= 500,
            VenueError::UnknownOrder(_) => false,
            VenueError::RetriesExhausted { .. } => false,
            VenueError::Interrupted => false,
        }
    }
}

/// Why the risk manager declined a proposed entry. These are expected
/// outcomes of a run, reported to the caller and logged, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TradingHalted,
    MaxOpenPositions,
    DailyLossLimit,
    ZeroSize,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TradingHalted => "trading halted by drawdown circuit breaker",
            RejectReason::MaxOpenPositions => "open position cap reached",
            RejectReason::DailyLossLimit => "daily loss limit reached",
            RejectReason::ZeroSize => "computed position size is zero",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ledger refused to open a position because the cap was already
/// reached. Callers consult the risk manager first; this is the defensive
/// second check.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("position capacity {0} already reached")]
pub struct CapacityError(pub usize);
