use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use market_calendar::TradingCalendar;
use scan_store::parse_timestamp;
use tokio::sync::watch;
use tokio::time;
use wheel_core::OwnerId;
use wheel_scanner::{ScanError, ScanOrchestrator, ScanTrigger};

const TICK: Duration = Duration::from_secs(60);

/// Runs one scheduled scan per owner per trading session, a fixed delay
/// after the close.
pub struct AfterCloseScheduler {
    orchestrator: Arc<ScanOrchestrator>,
    calendar: TradingCalendar,
    delay: ChronoDuration,
    completed: HashMap<OwnerId, NaiveDate>,
}

impl AfterCloseScheduler {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, calendar: TradingCalendar, delay: ChronoDuration) -> Self {
        Self {
            orchestrator,
            calendar,
            delay,
            completed: HashMap::new(),
        }
    }

    /// Session whose scheduled scan is due at `now`, if any.
    pub fn due_session(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let today = self.calendar.local_date(now);
        if !self.calendar.is_trading_day(today) {
            return None;
        }
        (now >= self.calendar.session_close(today) + self.delay).then_some(today)
    }

    /// One scheduler step; returns how many scans ran.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let Some(session) = self.due_session(now) else {
            return 0;
        };

        let owners = match self.orchestrator.watchlist().owners_with_watchlist().await {
            Ok(owners) => owners,
            Err(e) => {
                tracing::warn!("Scheduler could not list watchlist owners: {}", e);
                return 0;
            }
        };

        let mut ran = 0;
        for owner in owners {
            if self.completed.get(&owner) == Some(&session) {
                continue;
            }
            if self.already_scanned(&owner, session).await {
                self.completed.insert(owner, session);
                continue;
            }

            tracing::info!("Running scheduled scan for {} (session {})", owner, session);
            match self.orchestrator.run_scan(&owner, ScanTrigger::Scheduled, now).await {
                Ok(summary) => {
                    ran += 1;
                    tracing::info!(
                        "Scheduled scan for {} done: {} of {} passed",
                        owner,
                        summary.passed_count(),
                        summary.results.len()
                    );
                    self.completed.insert(owner, session);
                }
                // Transient: try again on the next tick
                Err(e @ (ScanError::AlreadyRunning(_) | ScanError::ProviderUnavailable(_) | ScanError::StoreUnavailable(_))) => {
                    tracing::warn!("Scheduled scan for {} deferred: {}", owner, e);
                }
                Err(e) => {
                    tracing::error!("Scheduled scan for {} failed: {}", owner, e);
                    self.completed.insert(owner, session);
                }
            }
        }
        ran
    }

    /// A run stored after this session's close counts, so restarts do not rescan.
    async fn already_scanned(&self, owner: &OwnerId, session: NaiveDate) -> bool {
        let latest = match self.orchestrator.results().latest_scan_date(owner).await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::debug!("Could not read latest scan date for {}: {}", owner, e);
                return false;
            }
        };
        latest
            .and_then(|s| parse_timestamp(&s).ok())
            .is_some_and(|at| at >= self.calendar.session_close(session))
    }

    /// Tick every minute until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(TICK);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(
            "After-close scheduler started ({} minutes after the close)",
            self.delay.num_minutes()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("After-close scheduler stopping");
                    break;
                }
            }
        }
    }
}
