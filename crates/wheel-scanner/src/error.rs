use std::time::Duration;

use scan_store::StoreError;
use thiserror::Error;
use wheel_core::OwnerId;

/// Whole-run failures. Per-ticker problems never surface here; they are
/// recorded on that ticker's result instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("market data provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("result store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("a scan is already running for {0}")]
    AlreadyRunning(OwnerId),

    #[error("scan timed out after {0:?}")]
    TimedOut(Duration),

    #[error("watchlist is empty for {0}")]
    EmptyWatchlist(OwnerId),
}

impl From<StoreError> for ScanError {
    fn from(err: StoreError) -> Self {
        ScanError::StoreUnavailable(err.to_string())
    }
}
