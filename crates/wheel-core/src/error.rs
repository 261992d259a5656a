use thiserror::Error;

/// Failure of a single market-data request.
///
/// Batch operations never return this for the whole batch; each ticker carries
/// its own outcome instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("budget exceeded: daily request budget of {limit} exhausted")]
    BudgetExceeded { limit: u32 },

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("request queue closed")]
    QueueClosed,
}

impl DataError {
    /// True when the daily request budget, not the ticker, caused the failure.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, DataError::BudgetExceeded { .. })
    }
}
