use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use market_calendar::{FreshnessPolicy, RefreshEligibility};
use scan_store::{QuoteCache, StoreError};
use serde::Serialize;
use wheel_core::{Quote, ScanDataSource};

/// What happened to one ticker during a refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    #[serde(flatten)]
    pub eligibility: RefreshEligibility,
    pub refreshed: bool,
    pub price: Option<f64>,
    pub error: Option<String>,
}

/// Applies the freshness rules to the quote cache: only eligible tickers are
/// fetched, in a single batch call, and written back.
#[derive(Clone)]
pub struct PriceRefresher {
    provider: Arc<dyn ScanDataSource>,
    quotes: QuoteCache,
    policy: FreshnessPolicy,
}

impl PriceRefresher {
    pub fn new(provider: Arc<dyn ScanDataSource>, quotes: QuoteCache, policy: FreshnessPolicy) -> Self {
        Self {
            provider,
            quotes,
            policy,
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub async fn eligibility(&self, tickers: &[String], now: DateTime<Utc>) -> Result<Vec<RefreshEligibility>, StoreError> {
        let last_updated = self.quotes.last_updated_many(tickers).await?;
        Ok(self.policy.eligibility_many(&last_updated, now))
    }

    pub async fn refresh(&self, tickers: &[String], now: DateTime<Utc>) -> Result<Vec<RefreshOutcome>, StoreError> {
        Ok(self.refresh_with_cache(tickers, now).await?.0)
    }

    /// Price per ticker for a scan: fresh where eligible, cached otherwise.
    ///
    /// A failed fetch falls back to the cached price when there is one.
    pub async fn resolve_prices(
        &self,
        tickers: &[String],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Result<f64, String>>, StoreError> {
        let (outcomes, cached) = self.refresh_with_cache(tickers, now).await?;

        let prices = outcomes
            .into_iter()
            .map(|o| {
                let ticker = o.eligibility.ticker.clone();
                let price = match (o.price, o.error) {
                    (Some(p), _) => Ok(p),
                    (None, error) => match cached.get(&ticker) {
                        Some(q) => {
                            tracing::warn!(
                                "Quote refresh for {} failed ({}); using cached price from {}",
                                ticker,
                                error.as_deref().unwrap_or("unknown error"),
                                q.timestamp
                            );
                            Ok(q.price)
                        }
                        None => Err(error.unwrap_or_else(|| "no quote available".to_string())),
                    },
                };
                (ticker, price)
            })
            .collect();

        Ok(prices)
    }

    async fn refresh_with_cache(
        &self,
        tickers: &[String],
        now: DateTime<Utc>,
    ) -> Result<(Vec<RefreshOutcome>, HashMap<String, Quote>), StoreError> {
        let cached = self.quotes.latest_quotes(tickers).await?;
        let pairs: Vec<(String, Option<DateTime<Utc>>)> = tickers
            .iter()
            .map(|t| (t.clone(), cached.get(t).map(|q| q.timestamp)))
            .collect();
        let eligibility = self.policy.eligibility_many(&pairs, now);

        let to_fetch: Vec<String> = eligibility
            .iter()
            .filter(|e| e.can_refresh)
            .map(|e| e.ticker.clone())
            .collect();

        let mut fetched: HashMap<String, Result<Quote, String>> = HashMap::new();
        if !to_fetch.is_empty() {
            tracing::info!(
                "Refreshing {} of {} quotes via {}",
                to_fetch.len(),
                tickers.len(),
                self.provider.name()
            );
            for result in self.provider.get_batch_quotes(&to_fetch).await {
                let error = result.error_text();
                let outcome = match result.outcome {
                    Ok(quote) => {
                        // Cache stamps the fetch time; freshness is about when we last asked
                        let stamped = Quote { timestamp: now, ..quote };
                        if let Err(e) = self.quotes.save_quote(&stamped).await {
                            tracing::warn!("Failed to cache quote for {}: {}", stamped.ticker, e);
                        }
                        Ok(stamped)
                    }
                    Err(_) => Err(error.unwrap_or_default()),
                };
                fetched.insert(result.ticker, outcome);
            }
        }

        let outcomes = eligibility
            .into_iter()
            .map(|e| {
                if !e.can_refresh {
                    let price = cached.get(&e.ticker).map(|q| q.price);
                    return RefreshOutcome {
                        eligibility: e,
                        refreshed: false,
                        price,
                        error: None,
                    };
                }
                match fetched.remove(&e.ticker) {
                    Some(Ok(q)) => RefreshOutcome {
                        eligibility: e,
                        refreshed: true,
                        price: Some(q.price),
                        error: None,
                    },
                    Some(Err(err)) => RefreshOutcome {
                        eligibility: e,
                        refreshed: false,
                        price: None,
                        error: Some(err),
                    },
                    None => RefreshOutcome {
                        eligibility: e,
                        refreshed: false,
                        price: None,
                        error: Some("provider returned no result".to_string()),
                    },
                }
            })
            .collect();

        Ok((outcomes, cached))
    }
}
