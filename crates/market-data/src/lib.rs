pub mod mock;
pub mod polygon;
pub mod rate_limiter;
pub mod volatility;

pub use mock::{MockProvider, MockTicker};
pub use polygon::PolygonProvider;
pub use rate_limiter::{QueueSettings, QueueStats, RequestQueue};

use std::str::FromStr;
use std::sync::Arc;

use market_calendar::TradingCalendar;
use wheel_core::{DataError, ScanDataSource};

/// Which upstream backs the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    Polygon,
}

impl FromStr for ProviderKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(ProviderKind::Mock),
            "polygon" => Ok(ProviderKind::Polygon),
            other => Err(DataError::InvalidData(format!(
                "unknown market data provider '{}' (expected mock or polygon)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub queue: QueueSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Mock,
            api_key: None,
            queue: QueueSettings::default(),
        }
    }
}

/// Build the configured provider. Spawns the request queue, so call from inside a runtime.
pub fn build_provider(
    settings: &ProviderSettings,
    calendar: TradingCalendar,
) -> Result<Arc<dyn ScanDataSource>, DataError> {
    match settings.kind {
        ProviderKind::Mock => {
            tracing::info!("Using mock market data provider");
            Ok(Arc::new(MockProvider::new()))
        }
        ProviderKind::Polygon => {
            let api_key = settings
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .ok_or_else(|| DataError::InvalidData("POLYGON_API_KEY is required for the polygon provider".to_string()))?;

            tracing::info!(
                "Using Polygon market data provider ({} req/min, {} req/day)",
                settings.queue.requests_per_minute,
                settings.queue.daily_budget
            );
            Ok(Arc::new(PolygonProvider::new(
                api_key.to_string(),
                settings.queue.clone(),
                calendar,
            )))
        }
    }
}
