//! Scan orchestration: watchlist in, ranked and persisted results out.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use market_calendar::RefreshEligibility;
use scan_store::{
    format_timestamp, PositionLookup, QuoteCache, ScanDb, ScanResultStore, ScanRun, WatchlistStore,
};
use serde::{Deserialize, Serialize};
use wheel_core::{OwnerId, PositionBook, ScanDataSource};

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::guard::ScanGuard;
use crate::phases::{self, StockMetrics};
use crate::progress::{Phase, PortfolioCheck, ScanProgress};
use crate::refresher::{PriceRefresher, RefreshOutcome};
use crate::scorer::{CompositeScorer, ScoreInputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTrigger {
    Manual,
    Scheduled,
}

impl ScanTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTrigger::Manual => "manual",
            ScanTrigger::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed run, in rank order
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub owner: OwnerId,
    pub scan_date: String,
    pub trigger: ScanTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ScanProgress>,
    pub persisted: usize,
    pub failed_to_persist: Vec<String>,
}

impl ScanSummary {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }
}

pub struct ScanOrchestrator {
    provider: Arc<dyn ScanDataSource>,
    positions: Arc<dyn PositionBook>,
    db: ScanDb,
    results: ScanResultStore,
    watchlist: WatchlistStore,
    refresher: PriceRefresher,
    scorer: CompositeScorer,
    guard: ScanGuard,
    config: ScannerConfig,
}

impl ScanOrchestrator {
    pub fn new(provider: Arc<dyn ScanDataSource>, db: ScanDb, config: ScannerConfig) -> Self {
        let refresher = PriceRefresher::new(
            Arc::clone(&provider),
            QuoteCache::new(db.clone()),
            config.freshness_policy(),
        );

        Self {
            positions: Arc::new(PositionLookup::new(db.clone())),
            results: ScanResultStore::new(db.clone()),
            watchlist: WatchlistStore::new(db.clone(), config.watchlist_max),
            scorer: CompositeScorer::with_weights(config.weights.clone()),
            guard: ScanGuard::new(config.effective_guard_ttl()),
            provider,
            db,
            refresher,
            config,
        }
    }

    /// Swap the phase-5 collaborator
    pub fn with_positions(mut self, positions: Arc<dyn PositionBook>) -> Self {
        self.positions = positions;
        self
    }

    pub fn provider(&self) -> &Arc<dyn ScanDataSource> {
        &self.provider
    }

    pub fn db(&self) -> &ScanDb {
        &self.db
    }

    pub fn results(&self) -> &ScanResultStore {
        &self.results
    }

    pub fn watchlist(&self) -> &WatchlistStore {
        &self.watchlist
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn is_running(&self, owner: &OwnerId) -> bool {
        self.guard.is_running(owner)
    }

    /// Scan the owner's whole watchlist and persist one row per ticker.
    ///
    /// Whole-run failures (provider or store down, duplicate run, timeout)
    /// return an error and persist nothing. Per-ticker failures are recorded
    /// on that ticker's row.
    pub async fn run_scan(
        &self,
        owner: &OwnerId,
        trigger: ScanTrigger,
        now: DateTime<Utc>,
    ) -> Result<ScanSummary, ScanError> {
        let _permit = self
            .guard
            .try_acquire(owner)
            .ok_or_else(|| ScanError::AlreadyRunning(owner.clone()))?;

        let health = self.provider.health_check().await;
        if !health.healthy {
            return Err(ScanError::ProviderUnavailable(
                health.detail.unwrap_or_else(|| health.provider.clone()),
            ));
        }

        self.db.ping().await?;

        let symbols = self.watchlist.symbols(owner).await?;
        if symbols.is_empty() {
            return Err(ScanError::EmptyWatchlist(owner.clone()));
        }

        tracing::info!(
            "Starting {} scan for {} ({} tickers, provider {})",
            trigger,
            owner,
            symbols.len(),
            self.provider.name()
        );
        let started = Utc::now();

        let mut results = tokio::time::timeout(self.config.timeout, self.evaluate_all(owner, &symbols, now))
            .await
            .map_err(|_| {
                tracing::warn!("Scan for {} timed out after {:?}; nothing persisted", owner, self.config.timeout);
                ScanError::TimedOut(self.config.timeout)
            })??;

        results.sort_by(|a, b| a.rank_cmp(b));

        let scan_date = format_timestamp(now);
        let rows: Vec<_> = results.iter().map(|p| p.to_row(owner, &scan_date)).collect();
        let finished = Utc::now();
        let run = ScanRun {
            id: None,
            owner: owner.to_string(),
            scan_date: scan_date.clone(),
            trigger_kind: trigger.as_str().to_string(),
            ticker_count: results.len() as i64,
            persisted_count: 0,
            failed_tickers: String::new(),
            started_at: format_timestamp(started),
            finished_at: format_timestamp(finished),
        };
        let run = self.results.save_run(&rows, run).await.map_err(|e| {
            tracing::error!("Scan for {} could not be saved: {}", owner, e);
            ScanError::from(e)
        })?;
        let persisted = run.persisted_count as usize;
        let failed_to_persist = run.failed_ticker_list();

        let summary = ScanSummary {
            owner: owner.clone(),
            scan_date,
            trigger,
            started_at: started,
            finished_at: finished,
            results,
            persisted,
            failed_to_persist,
        };

        if summary.failed_to_persist.is_empty() {
            tracing::info!(
                "Scan for {} finished: {} of {} tickers passed {:?}",
                owner,
                summary.passed_count(),
                summary.results.len(),
                stage_counts(&summary.results)
            );
        } else {
            tracing::warn!(
                "Scan for {} finished with {} unsaved results: {}",
                owner,
                summary.failed_to_persist.len(),
                summary.failed_to_persist.join(", ")
            );
        }

        Ok(summary)
    }

    /// Refresh eligible watchlist quotes and report every ticker's outcome.
    pub async fn refresh_prices(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<RefreshOutcome>, ScanError> {
        let symbols = self.watchlist.symbols(owner).await?;
        Ok(self.refresher.refresh(&symbols, now).await?)
    }

    pub async fn price_eligibility(
        &self,
        owner: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshEligibility>, ScanError> {
        let symbols = self.watchlist.symbols(owner).await?;
        Ok(self.refresher.eligibility(&symbols, now).await?)
    }

    async fn evaluate_all(
        &self,
        owner: &OwnerId,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<ScanProgress>, ScanError> {
        let mut prices = self.refresher.resolve_prices(symbols, now).await?;

        let jobs: Vec<(String, Result<f64, String>)> = symbols
            .iter()
            .map(|s| {
                let price = prices
                    .remove(s)
                    .unwrap_or_else(|| Err("no quote available".to_string()));
                (s.clone(), price)
            })
            .collect();

        let results = stream::iter(jobs)
            .map(|(ticker, price)| self.evaluate_ticker(owner, ticker, price, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn evaluate_ticker(
        &self,
        owner: &OwnerId,
        ticker: String,
        price: Result<f64, String>,
        now: DateTime<Utc>,
    ) -> ScanProgress {
        let criteria = &self.config.criteria;
        let as_of = self.config.calendar.local_date(now);

        // Phase 1
        let price = match price {
            Ok(p) => p,
            Err(error) => {
                return ScanProgress::DataUnavailable {
                    ticker,
                    phase: Phase::StockFilter,
                    stock: None,
                    iv: None,
                    error,
                }
            }
        };

        if let Some(reason) = phases::price_band_failure(price, criteria) {
            return ScanProgress::Phase1Failed {
                ticker,
                stock: StockMetrics::price_only(price, reason),
            };
        }

        let start = as_of - ChronoDuration::days(self.config.history_days);
        let bars = match self.provider.get_historical_prices(&ticker, start, as_of).await {
            Ok(bars) => bars,
            Err(e) => {
                tracing::warn!("History unavailable for {}: {}", ticker, e);
                return ScanProgress::DataUnavailable {
                    stock: Some(StockMetrics::price_only(price, "price history unavailable")),
                    ticker,
                    phase: Phase::StockFilter,
                    iv: None,
                    error: e.to_string(),
                };
            }
        };

        let stock = phases::evaluate_stock(price, &bars, criteria);
        if !stock.passed {
            return ScanProgress::Phase1Failed {
                ticker,
                stock: stock.data,
            };
        }
        let stock = stock.data;

        // Phase 2
        let iv_stats = match self.provider.get_iv_stats(&ticker).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("IV stats unavailable for {}: {}", ticker, e);
                return ScanProgress::DataUnavailable {
                    ticker,
                    phase: Phase::IvScreen,
                    stock: Some(stock),
                    iv: None,
                    error: e.to_string(),
                };
            }
        };

        let iv = phases::evaluate_iv(&iv_stats, criteria);
        if !iv.passed {
            return ScanProgress::Phase2Failed {
                ticker,
                stock,
                iv: iv.data,
            };
        }
        let iv = iv.data;

        // Phase 3
        let chain = match self.provider.get_put_chain(&ticker, as_of).await {
            Ok(chain) => chain,
            Err(e) => {
                tracing::warn!("Option chain unavailable for {}: {}", ticker, e);
                return ScanProgress::DataUnavailable {
                    ticker,
                    phase: Phase::OptionSelection,
                    stock: Some(stock),
                    iv: Some(iv),
                    error: e.to_string(),
                };
            }
        };

        let put = match phases::select_put(price, &chain, criteria) {
            Ok(put) => put,
            Err(reason) => {
                return ScanProgress::Phase3Failed {
                    ticker,
                    stock,
                    iv,
                    reason,
                }
            }
        };

        // Phase 4
        let score = self.scorer.score(&ScoreInputs {
            annualized_yield: put.annualized_yield,
            iv_rank: iv.iv_rank.unwrap_or(0.0),
            delta: put.put.delta,
            open_interest: put.put.open_interest,
            price,
            sma_200: stock.sma_200.unwrap_or(0.0),
        });

        // Phase 5
        let portfolio = match self.positions.exposure(owner, &ticker).await {
            Ok(exposure) => PortfolioCheck {
                exposure,
                error: None,
            },
            Err(e) => {
                tracing::warn!("Position check failed for {}: {}", ticker, e);
                PortfolioCheck {
                    exposure: None,
                    error: Some(e.to_string()),
                }
            }
        };

        ScanProgress::Qualified {
            ticker,
            stock,
            iv,
            put,
            score,
            portfolio,
        }
    }
}

/// Group results by stage, for log lines and the funnel view
pub fn stage_counts(results: &[ScanProgress]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for r in results {
        *counts.entry(r.stage()).or_insert(0) += 1;
    }
    counts
}
