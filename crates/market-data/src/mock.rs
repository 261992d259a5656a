//! Deterministic market data for environments without live credentials.
//!
//! Every value is a pure function of the ticker symbol (plus any fixture
//! registered for it) and the mock clock, so two runs over the same watchlist
//! see identical data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use market_calendar::TradingCalendar;
use wheel_core::{
    Bar, DataError, HealthStatus, IvStats, MarketDataProvider, OptionCandidate, OptionsChainProvider, Quote,
    QuoteResult,
};

use crate::rate_limiter::RequestQueue;

const SOURCE: &str = "mock";

/// Synthetic profile for one ticker.
#[derive(Debug, Clone)]
pub struct MockTicker {
    pub price: f64,
    pub daily_volume: f64,
    /// Fractional close-to-close drift per session; positive means an uptrend
    pub daily_drift: f64,
    pub current_iv: f64,
    pub iv_low: f64,
    pub iv_high: f64,
    /// Explicit chain; `None` generates a strike/expiry ladder
    pub puts: Option<Vec<OptionCandidate>>,
    /// Every request for this ticker fails with this error
    pub fail_with: Option<DataError>,
}

impl MockTicker {
    /// Profile derived from the symbol alone
    pub fn from_symbol(symbol: &str) -> Self {
        let seed = seed(symbol);
        let price = 8.0 + (seed % 18_000) as f64 / 100.0; // $8 - $188
        let daily_volume = 400_000.0 + ((seed >> 8) % 8_000_000) as f64;
        let daily_drift = (((seed >> 16) % 200) as f64 - 60.0) / 100_000.0; // -0.06% .. +0.14%
        let iv_low = 0.12 + ((seed >> 24) % 15) as f64 / 100.0;
        let iv_high = iv_low + 0.20 + ((seed >> 28) % 30) as f64 / 100.0;
        let current_iv = iv_low + (iv_high - iv_low) * (((seed >> 32) % 100) as f64 / 100.0);

        Self {
            price,
            daily_volume,
            daily_drift,
            current_iv,
            iv_low,
            iv_high,
            puts: None,
            fail_with: None,
        }
    }

    pub fn failing(error: DataError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::from_symbol("FAIL")
        }
    }
}

/// FNV-1a over the symbol bytes; stable across runs and platforms.
fn seed(symbol: &str) -> u64 {
    symbol.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn is_known_symbol(symbol: &str) -> bool {
    (1..=5).contains(&symbol.len()) && symbol.chars().all(|c| c.is_ascii_uppercase())
}

pub struct MockProvider {
    calendar: TradingCalendar,
    now: Option<DateTime<Utc>>,
    fixtures: HashMap<String, MockTicker>,
    queue: Option<RequestQueue>,
    healthy: bool,
    requests: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            calendar: TradingCalendar::nyse(),
            now: None,
            fixtures: HashMap::new(),
            queue: None,
            healthy: true,
            requests: AtomicUsize::new(0),
        }
    }

    /// Pin the mock clock
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_ticker(mut self, symbol: &str, profile: MockTicker) -> Self {
        self.fixtures.insert(symbol.to_string(), profile);
        self
    }

    /// Route every request through a rate-limited queue, like the live provider
    pub fn with_queue(mut self, queue: RequestQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Requests served so far (including failed ones)
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    async fn profile(&self, symbol: &str) -> Result<MockTicker, DataError> {
        if let Some(queue) = &self.queue {
            queue.acquire().await?;
        }
        self.requests.fetch_add(1, Ordering::SeqCst);

        let profile = match self.fixtures.get(symbol) {
            Some(fixture) => fixture.clone(),
            None if is_known_symbol(symbol) => MockTicker::from_symbol(symbol),
            None => return Err(DataError::UnknownSymbol(symbol.to_string())),
        };

        match &profile.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(profile),
        }
    }

    fn quote_for(&self, symbol: &str, profile: &MockTicker) -> Quote {
        Quote {
            ticker: symbol.to_string(),
            price: profile.price,
            timestamp: self.now(),
            source: SOURCE.to_string(),
        }
    }

    /// Trading-day closes ending at `end`, compounding backwards from the profile price.
    fn bars_for(&self, symbol: &str, profile: &MockTicker, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        let mut days = Vec::new();
        let mut day = end;
        while day >= start {
            if self.calendar.is_trading_day(day) {
                days.push(day);
            }
            day = match day.pred_opt() {
                Some(d) => d,
                None => break,
            };
        }
        days.reverse();

        let n = days.len();
        let seed = seed(symbol);
        days.into_iter()
            .enumerate()
            .map(|(i, date)| {
                let back = (n - 1 - i) as i32;
                let trend = profile.price / (1.0 + profile.daily_drift).powi(back);
                // Small deterministic wobble so closes are not a perfect curve; zero on the last bar
                let wobble = if back == 0 {
                    0.0
                } else {
                    ((i as f64 * 0.7) + (seed % 97) as f64).sin() * 0.004
                };
                let close = trend * (1.0 + wobble);
                Bar {
                    ticker: symbol.to_string(),
                    date,
                    open: close * 0.998,
                    high: close * 1.006,
                    low: close * 0.992,
                    close,
                    volume: profile.daily_volume * (1.0 + ((i as f64) * 1.3).sin() * 0.1),
                }
            })
            .collect()
    }

    fn ladder_for(&self, symbol: &str, profile: &MockTicker, as_of: NaiveDate) -> Vec<OptionCandidate> {
        let seed = seed(symbol);
        let mut chain = Vec::new();

        for (e, dte) in [3i64, 10, 17, 24, 31, 38, 52].into_iter().enumerate() {
            let expiration = as_of + Duration::days(dte);
            for step in 0..10 {
                let strike = ((profile.price * (1.0 - 0.025 * step as f64)) * 2.0).round() / 2.0;
                if strike <= 0.0 {
                    continue;
                }
                let t = (dte as f64 / 365.0).sqrt();
                let distance = (profile.price - strike) / profile.price / (profile.current_iv * t).max(1e-6);
                let delta = -0.5 * (-1.4 * distance.max(0.0)).exp();
                let bid = (profile.price * profile.current_iv * t * 0.4 * (-1.8 * distance.max(0.0)).exp() * 100.0)
                    .round()
                    / 100.0;
                let liquidity = ((seed >> (step + e)) % 400) as i64;

                chain.push(OptionCandidate {
                    ticker: symbol.to_string(),
                    contract: format!("O:{}{}P{:08}", symbol, expiration.format("%y%m%d"), (strike * 1000.0) as i64),
                    strike,
                    expiration,
                    dte,
                    delta: (delta * 1000.0).round() / 1000.0,
                    theta: Some(-(bid / dte as f64 * 0.5 * 100.0).round() / 100.0),
                    bid,
                    implied_volatility: Some(profile.current_iv),
                    open_interest: 50 + liquidity * 2,
                    volume: 5 + liquidity / 4,
                });
            }
        }
        chain
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn get_quote(&self, ticker: &str) -> Result<Quote, DataError> {
        let profile = self.profile(ticker).await?;
        Ok(self.quote_for(ticker, &profile))
    }

    async fn get_batch_quotes(&self, tickers: &[String]) -> Vec<QuoteResult> {
        let mut results = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let result = match self.profile(ticker).await {
                Ok(profile) => QuoteResult::ok(self.quote_for(ticker, &profile)),
                Err(e) => QuoteResult::failed(ticker, e),
            };
            results.push(result);
        }
        results
    }

    async fn get_historical_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataError> {
        let profile = self.profile(ticker).await?;
        Ok(self.bars_for(ticker, &profile, start, end))
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            provider: SOURCE.to_string(),
            healthy: self.healthy,
            detail: (!self.healthy).then(|| "mock provider marked unhealthy".to_string()),
            checked_at: self.now(),
        }
    }
}

#[async_trait]
impl OptionsChainProvider for MockProvider {
    async fn get_put_chain(&self, ticker: &str, as_of: NaiveDate) -> Result<Vec<OptionCandidate>, DataError> {
        let profile = self.profile(ticker).await?;
        Ok(match &profile.puts {
            Some(puts) => puts.clone(),
            None => self.ladder_for(ticker, &profile, as_of),
        })
    }

    async fn get_iv_stats(&self, ticker: &str) -> Result<IvStats, DataError> {
        let profile = self.profile(ticker).await?;
        Ok(IvStats {
            ticker: ticker.to_string(),
            current_iv: profile.current_iv,
            low_52w: profile.iv_low,
            high_52w: profile.iv_high,
            as_of: self.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::QueueSettings;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 10, 21, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_quotes_are_deterministic() {
        let a = MockProvider::new().with_clock(fixed_now());
        let b = MockProvider::new().with_clock(fixed_now());

        let qa = a.get_quote("AAPL").await.unwrap();
        let qb = b.get_quote("AAPL").await.unwrap();
        assert_eq!(qa, qb);
        assert_eq!(qa.source, "mock");
        assert_eq!(qa.timestamp, fixed_now());
    }

    #[tokio::test]
    async fn test_batch_preserves_partial_failure() {
        let provider = MockProvider::new()
            .with_clock(fixed_now())
            .with_ticker("BAD", MockTicker::failing(DataError::Timeout("upstream".to_string())));

        let tickers = vec!["AAPL".to_string(), "NOT-A-TICKER1".to_string(), "BAD".to_string()];
        let results = provider.get_batch_quotes(&tickers).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success());
        assert!(!results[1].success());
        assert!(results[1].error_text().unwrap().contains("unknown symbol"));
        assert!(matches!(results[2].outcome, Err(DataError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_history_ends_at_quote_price() {
        let provider = MockProvider::new().with_clock(fixed_now());
        let end = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let start = end - Duration::days(400);

        let bars = provider.get_historical_prices("MSFT", start, end).await.unwrap();
        let quote = provider.get_quote("MSFT").await.unwrap();

        assert!(bars.len() > 250);
        assert!(bars.windows(2).all(|w| w[0].date < w[1].date));
        assert!((bars.last().unwrap().close - quote.price).abs() < 1e-9);
        // No weekend bars
        assert!(bars.iter().all(|b| TradingCalendar::nyse().is_trading_day(b.date)));
    }

    #[tokio::test]
    async fn test_generated_chain_is_puts_below_and_at_spot() {
        let provider = MockProvider::new();
        let as_of = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let quote = provider.get_quote("KO").await.unwrap();
        let chain = provider.get_put_chain("KO", as_of).await.unwrap();

        assert!(!chain.is_empty());
        for put in &chain {
            assert!(put.strike <= quote.price + 0.5);
            assert!(put.delta <= 0.0 && put.delta >= -0.5);
            assert_eq!((put.expiration - as_of).num_days(), put.dte);
        }
    }

    #[tokio::test]
    async fn test_fixture_overrides_generated_profile() {
        let fixture = MockTicker {
            price: 42.0,
            ..MockTicker::from_symbol("XYZ")
        };
        let provider = MockProvider::new().with_ticker("XYZ", fixture);
        assert_eq!(provider.get_quote("XYZ").await.unwrap().price, 42.0);
    }

    #[tokio::test]
    async fn test_iv_stats_within_range() {
        let provider = MockProvider::new();
        for symbol in ["AAPL", "MSFT", "KO", "F", "T"] {
            let iv = provider.get_iv_stats(symbol).await.unwrap();
            assert!(iv.low_52w < iv.high_52w);
            assert!(iv.current_iv >= iv.low_52w && iv.current_iv <= iv.high_52w);
        }
    }

    #[tokio::test]
    async fn test_unhealthy_flag() {
        let provider = MockProvider::new().unhealthy();
        let health = provider.health_check().await;
        assert!(!health.healthy);
        assert!(health.detail.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_budget_surfaces_per_ticker() {
        let queue = RequestQueue::spawn(
            QueueSettings {
                requests_per_minute: 60,
                daily_budget: 1,
            },
            TradingCalendar::nyse(),
        );
        let provider = MockProvider::new().with_queue(queue);

        let results = provider
            .get_batch_quotes(&["AAPL".to_string(), "MSFT".to_string()])
            .await;
        assert!(results[0].success());
        assert!(matches!(results[1].outcome, Err(DataError::BudgetExceeded { limit: 1 })));
        assert_eq!(provider.request_count(), 1);
    }
}
