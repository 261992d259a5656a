use std::time::Duration;

use chrono::Duration as ChronoDuration;
use market_calendar::{FreshnessPolicy, TradingCalendar, DEFAULT_COOLDOWN_HOURS};
use scan_store::DEFAULT_WATCHLIST_MAX;

use crate::criteria::ScanCriteria;
use crate::scorer::ScoringWeights;

/// Time allowed past the run timeout for saving results
const GUARD_SAVE_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub criteria: ScanCriteria,
    pub weights: ScoringWeights,
    pub calendar: TradingCalendar,
    /// Tickers evaluated at once; all provider calls still share one queue
    pub concurrency: usize,
    pub timeout: Duration,
    /// Age after which a running marker counts as stale; see `effective_guard_ttl`
    pub guard_ttl: Duration,
    pub watchlist_max: usize,
    pub price_cooldown: ChronoDuration,
    /// Calendar days of daily bars requested for phase 1
    pub history_days: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            criteria: ScanCriteria::default(),
            weights: ScoringWeights::default(),
            calendar: TradingCalendar::nyse(),
            concurrency: default_concurrency(),
            timeout: Duration::from_secs(30 * 60),
            guard_ttl: Duration::from_secs(35 * 60),
            watchlist_max: DEFAULT_WATCHLIST_MAX,
            price_cooldown: ChronoDuration::hours(DEFAULT_COOLDOWN_HOURS),
            // ~220 sessions plus holidays and slack
            history_days: 400,
        }
    }
}

impl ScannerConfig {
    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(self.calendar.clone(), self.price_cooldown)
    }

    /// Guard TTL actually applied. A marker must outlive a run that is still
    /// within its timeout, so the configured value is raised when it is shorter.
    pub fn effective_guard_ttl(&self) -> Duration {
        self.guard_ttl.max(self.timeout + GUARD_SAVE_MARGIN)
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
