use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use market_calendar::TradingCalendar;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use wheel_core::{
    Bar, DataError, HealthStatus, IvStats, MarketDataProvider, OptionCandidate, OptionsChainProvider, Quote,
    QuoteResult,
};

use crate::rate_limiter::{QueueSettings, RequestQueue};
use crate::volatility::realized_vol_range;

const BASE_URL: &str = "https://api.polygon.io";
const SOURCE: &str = "polygon";

/// Snapshot endpoint accepts a comma-separated ticker list; keep URLs reasonable.
const BATCH_CHUNK: usize = 100;
/// Chain snapshots look this far past the scan date
const CHAIN_HORIZON_DAYS: i64 = 60;
/// Calendar days of history pulled for the realized-volatility range
const IV_HISTORY_DAYS: i64 = 380;
/// Near-the-money band used for the current IV reading
const ATM_BAND: f64 = 0.10;

const CACHE_TTL_SECS: i64 = 300;

struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

impl<T: Clone> CacheEntry<T> {
    fn fresh(&self) -> Option<T> {
        ((Utc::now() - self.cached_at).num_seconds() < CACHE_TTL_SECS).then(|| self.data.clone())
    }
}

/// Live market data from the Polygon REST API.
///
/// Every HTTP call goes through the shared [`RequestQueue`]; chain and bar
/// responses are cached for five minutes because the IV screen and option
/// selection read the same data.
pub struct PolygonProvider {
    api_key: String,
    client: Client,
    queue: RequestQueue,
    calendar: TradingCalendar,
    bars_cache: DashMap<String, CacheEntry<Vec<Bar>>>,
    chain_cache: DashMap<String, CacheEntry<Vec<OptionsContractSnapshot>>>,
}

impl PolygonProvider {
    pub fn new(api_key: String, settings: QueueSettings, calendar: TradingCalendar) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            queue: RequestQueue::spawn(settings, calendar.clone()),
            calendar,
            bars_cache: DashMap::new(),
            chain_cache: DashMap::new(),
        }
    }

    /// Session date on the exchange calendar
    pub fn market_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.calendar.local_date(now)
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Send a request through the queue with automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, DataError> {
        let request = builder.build().map_err(|e| DataError::Api(e.to_string()))?;

        for attempt in 0..3u32 {
            self.queue.acquire().await?;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| DataError::Api("Cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await.map_err(map_reqwest_error)?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "Polygon 429 rate limited, waiting {}s before retry {}/3",
                wait_secs,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(DataError::RateLimited("Polygon returned 429 after 3 retries".to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        symbol: &str,
    ) -> Result<T, DataError> {
        let response = self.send_request(builder).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(DataError::UnknownSymbol(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(DataError::Api(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DataError::InvalidData(e.to_string()))
    }

    async fn options_snapshot(&self, underlying: &str, as_of: NaiveDate) -> Result<Vec<OptionsContractSnapshot>, DataError> {
        let key = format!("{}:{}", underlying, as_of);
        if let Some(hit) = self.chain_cache.get(&key).and_then(|e| e.fresh()) {
            return Ok(hit);
        }

        let from = as_of.to_string();
        let until = (as_of + chrono::Duration::days(CHAIN_HORIZON_DAYS)).to_string();
        let url = format!("{}/v3/snapshot/options/{}", BASE_URL, underlying);
        let body: OptionsSnapshotResponse = self
            .get_json(
                self.client.get(&url).query(&[
                    ("apiKey", self.api_key.as_str()),
                    ("contract_type", "put"),
                    ("expiration_date.gte", from.as_str()),
                    ("expiration_date.lte", until.as_str()),
                    ("limit", "250"),
                ]),
                underlying,
            )
            .await?;

        let contracts = body.results.unwrap_or_default();
        self.chain_cache.insert(
            key,
            CacheEntry {
                data: contracts.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(contracts)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> DataError {
    if e.is_timeout() {
        DataError::Timeout(e.to_string())
    } else {
        DataError::Api(e.to_string())
    }
}

/// First positive price among last trade, today's close and yesterday's close.
/// Before the open Polygon reports zeros for the day fields.
fn snapshot_price(snap: &SnapshotTicker) -> Option<f64> {
    let positive = |p: Option<f64>| p.filter(|p| p.is_finite() && *p > 0.0);

    positive(snap.last_trade.as_ref().and_then(|t| t.p))
        .or_else(|| positive(snap.day.as_ref().and_then(|d| d.c)))
        .or_else(|| positive(snap.prev_day.as_ref().and_then(|d| d.c)))
}

fn to_candidate(underlying: &str, snap: &OptionsContractSnapshot, as_of: NaiveDate) -> Option<OptionCandidate> {
    let details = snap.details.as_ref()?;
    if details.contract_type.as_deref() != Some("put") {
        return None;
    }
    let expiration = NaiveDate::parse_from_str(details.expiration_date.as_deref()?, "%Y-%m-%d").ok()?;
    let greeks = snap.greeks.as_ref();

    Some(OptionCandidate {
        ticker: underlying.to_string(),
        contract: details.ticker.clone().unwrap_or_default(),
        strike: details.strike_price?,
        expiration,
        dte: (expiration - as_of).num_days(),
        delta: greeks.and_then(|g| g.delta)?,
        theta: greeks.and_then(|g| g.theta),
        bid: snap.last_quote.as_ref().and_then(|q| q.bid).unwrap_or(0.0),
        implied_volatility: snap.implied_volatility,
        open_interest: snap.open_interest.unwrap_or(0),
        volume: snap.day.as_ref().and_then(|d| d.volume).unwrap_or(0),
    })
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn get_quote(&self, ticker: &str) -> Result<Quote, DataError> {
        let url = format!("{}/v2/snapshot/locale/us/markets/stocks/tickers/{}", BASE_URL, ticker);
        let body: SnapshotResponse = self
            .get_json(self.client.get(&url).query(&[("apiKey", &self.api_key)]), ticker)
            .await?;

        let price = snapshot_price(&body.ticker)
            .ok_or_else(|| DataError::InvalidData(format!("no price in snapshot for {}", ticker)))?;

        Ok(Quote {
            ticker: ticker.to_string(),
            price,
            timestamp: Utc::now(),
            source: SOURCE.to_string(),
        })
    }

    async fn get_batch_quotes(&self, tickers: &[String]) -> Vec<QuoteResult> {
        let mut results = Vec::with_capacity(tickers.len());
        let url = format!("{}/v2/snapshot/locale/us/markets/stocks/tickers", BASE_URL);

        for chunk in tickers.chunks(BATCH_CHUNK) {
            let joined = chunk.join(",");
            let response: Result<MultiSnapshotResponse, DataError> = self
                .get_json(
                    self.client
                        .get(&url)
                        .query(&[("apiKey", self.api_key.as_str()), ("tickers", joined.as_str())]),
                    &joined,
                )
                .await;

            match response {
                Ok(body) => {
                    let fetched_at = Utc::now();
                    for ticker in chunk {
                        let snap = body.tickers.iter().find(|s| s.ticker.as_deref() == Some(ticker.as_str()));
                        let result = match snap {
                            None => QuoteResult::failed(ticker, DataError::UnknownSymbol(ticker.clone())),
                            Some(snap) => match snapshot_price(snap) {
                                Some(price) => QuoteResult::ok(Quote {
                                    ticker: ticker.clone(),
                                    price,
                                    timestamp: fetched_at,
                                    source: SOURCE.to_string(),
                                }),
                                None => QuoteResult::failed(
                                    ticker,
                                    DataError::InvalidData(format!("no price in snapshot for {}", ticker)),
                                ),
                            },
                        };
                        results.push(result);
                    }
                }
                Err(e) => {
                    tracing::warn!("Batch snapshot for {} tickers failed: {}", chunk.len(), e);
                    results.extend(chunk.iter().map(|t| QuoteResult::failed(t, e.clone())));
                }
            }
        }

        results
    }

    async fn get_historical_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataError> {
        let key = format!("{}:{}:{}", ticker, start, end);
        if let Some(hit) = self.bars_cache.get(&key).and_then(|e| e.fresh()) {
            return Ok(hit);
        }

        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            BASE_URL,
            ticker,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        let body: AggregateResponse = self
            .get_json(
                self.client.get(&url).query(&[
                    ("apiKey", self.api_key.as_str()),
                    ("adjusted", "true"),
                    ("sort", "asc"),
                    ("limit", "50000"),
                ]),
                ticker,
            )
            .await?;

        let bars: Vec<Bar> = body
            .results
            .into_iter()
            .filter_map(|r| {
                let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
                Some(Bar {
                    ticker: ticker.to_string(),
                    date,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: r.v,
                })
            })
            .collect();

        self.bars_cache.insert(
            key,
            CacheEntry {
                data: bars.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(bars)
    }

    async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/v1/marketstatus/now", BASE_URL);
        let outcome = self
            .send_request(self.client.get(&url).query(&[("apiKey", &self.api_key)]))
            .await;

        let (healthy, detail) = match outcome {
            Ok(resp) if resp.status().is_success() => (true, None),
            Ok(resp) => (false, Some(format!("HTTP {}", resp.status()))),
            Err(e) => (false, Some(e.to_string())),
        };

        HealthStatus {
            provider: SOURCE.to_string(),
            healthy,
            detail,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl OptionsChainProvider for PolygonProvider {
    async fn get_put_chain(&self, ticker: &str, as_of: NaiveDate) -> Result<Vec<OptionCandidate>, DataError> {
        let contracts = self.options_snapshot(ticker, as_of).await?;
        Ok(contracts
            .iter()
            .filter_map(|c| to_candidate(ticker, c, as_of))
            .collect())
    }

    async fn get_iv_stats(&self, ticker: &str) -> Result<IvStats, DataError> {
        // Exchange-local date, so the chain cache key matches the one option selection uses
        let today = self.market_date(Utc::now());
        let contracts = self.options_snapshot(ticker, today).await?;

        let spot = match contracts
            .iter()
            .find_map(|c| c.underlying_asset.as_ref().and_then(|u| u.price))
        {
            Some(p) => p,
            None => self.get_quote(ticker).await?.price,
        };

        let near_money: Vec<f64> = contracts
            .iter()
            .filter_map(|c| to_candidate(ticker, c, today).map(|cand| (cand, c.implied_volatility)))
            .filter(|(cand, _)| (20..=60).contains(&cand.dte) && (cand.strike / spot - 1.0).abs() <= ATM_BAND)
            .filter_map(|(_, iv)| iv)
            .filter(|iv| *iv > 0.0)
            .collect();

        if near_money.is_empty() {
            return Err(DataError::InvalidData(format!(
                "no near-the-money implied volatility for {}",
                ticker
            )));
        }
        let current_iv = near_money.iter().sum::<f64>() / near_money.len() as f64;

        let bars = self
            .get_historical_prices(ticker, today - chrono::Duration::days(IV_HISTORY_DAYS), today)
            .await?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let (low, high) = realized_vol_range(&closes)
            .ok_or_else(|| DataError::InvalidData(format!("not enough history for IV range of {}", ticker)))?;

        // Today's implied reading belongs inside its own 52-week range
        Ok(IvStats {
            ticker: ticker.to_string(),
            current_iv,
            low_52w: low.min(current_iv),
            high_52w: high.max(current_iv),
            as_of: Utc::now(),
        })
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: SnapshotTicker,
}

#[derive(Debug, Deserialize)]
struct MultiSnapshotResponse {
    #[serde(default)]
    tickers: Vec<SnapshotTicker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTicker {
    #[serde(default)]
    pub ticker: Option<String>,
    pub day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    pub last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    pub prev_day: Option<SnapshotDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDay {
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLastTrade {
    pub p: Option<f64>,
    pub t: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OptionsSnapshotResponse {
    results: Option<Vec<OptionsContractSnapshot>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsContractSnapshot {
    #[serde(default)]
    pub details: Option<OptionsDetails>,
    #[serde(default)]
    pub greeks: Option<OptionsGreeks>,
    pub implied_volatility: Option<f64>,
    pub open_interest: Option<i64>,
    #[serde(default)]
    pub day: Option<OptionsDay>,
    #[serde(default)]
    pub last_quote: Option<OptionsLastQuote>,
    #[serde(default)]
    pub underlying_asset: Option<UnderlyingAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsDetails {
    pub contract_type: Option<String>,
    pub strike_price: Option<f64>,
    pub expiration_date: Option<String>,
    pub ticker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsGreeks {
    pub delta: Option<f64>,
    pub theta: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsDay {
    pub volume: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsLastQuote {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderlyingAsset {
    pub price: Option<f64>,
}
