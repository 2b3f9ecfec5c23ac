use thiserror::Error;

/// Failure talking to a single exchange. Absence of an instrument is not an
/// error; adapters report that as `Ok(None)`.
///
/// Clone is required because a single upstream failure can be handed to
/// several cache waiters at once.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("{exchange} did not respond within {timeout_ms}ms")]
    Timeout { exchange: String, timeout_ms: u64 },

    #[error("{exchange} unavailable: {reason}")]
    Unavailable { exchange: String, reason: String },
}

impl ExchangeError {
    pub fn timeout(exchange: &str, timeout_ms: u64) -> Self {
        Self::Timeout {
            exchange: exchange.to_string(),
            timeout_ms,
        }
    }

    pub fn unavailable(exchange: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            exchange: exchange.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn exchange(&self) -> &str {
        match self {
            Self::Timeout { exchange, .. } => exchange,
            Self::Unavailable { exchange, .. } => exchange,
        }
    }

    /// Short outcome tag for log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AggregatorError {
    #[error("all {attempted} exchanges failed, no funding data this cycle")]
    AllExchangesFailed { attempted: usize },
}
