use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Bar, DataError, HealthStatus, IvStats, OptionCandidate, OwnerId, PortfolioExposure, Quote, QuoteResult};

/// Quote and price-history source
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Short identifier recorded as the quote source ("polygon", "mock")
    fn name(&self) -> &str;

    async fn get_quote(&self, ticker: &str) -> Result<Quote, DataError>;

    /// One result per requested ticker, in request order. A failing symbol never fails the batch.
    async fn get_batch_quotes(&self, tickers: &[String]) -> Vec<QuoteResult>;

    /// Daily bars in ascending date order, `start` and `end` inclusive.
    async fn get_historical_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataError>;

    async fn health_check(&self) -> HealthStatus;
}

/// Options chain lookup with greeks and liquidity
#[async_trait]
pub trait OptionsChainProvider: Send + Sync {
    /// Put contracts for the underlying, with DTE computed against `as_of`.
    async fn get_put_chain(&self, ticker: &str, as_of: NaiveDate) -> Result<Vec<OptionCandidate>, DataError>;

    async fn get_iv_stats(&self, ticker: &str) -> Result<IvStats, DataError>;
}

/// Everything the scan pipeline pulls from the outside world.
pub trait ScanDataSource: MarketDataProvider + OptionsChainProvider {}

impl<T: MarketDataProvider + OptionsChainProvider> ScanDataSource for T {}

/// Read-only view of the owner's existing wheel positions
#[async_trait]
pub trait PositionBook: Send + Sync {
    async fn exposure(&self, owner: &OwnerId, ticker: &str) -> Result<Option<PortfolioExposure>, DataError>;
}
