use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use market_calendar::TradingCalendar;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use wheel_core::DataError;

/// Upstream request budget.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub requests_per_minute: u32,
    pub daily_budget: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        // Free-tier limits: 5 requests/minute, 500/day
        Self {
            requests_per_minute: 5,
            daily_budget: 500,
        }
    }
}

impl QueueSettings {
    /// Spacing between grants, e.g. 12s at 5 requests/minute
    pub fn interval(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.requests_per_minute.max(1)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub granted_today: u32,
    pub rejected_today: u32,
    pub daily_budget: u32,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    granted_today: AtomicU32,
    rejected_today: AtomicU32,
}

struct Ticket {
    reply: oneshot::Sender<Result<(), DataError>>,
}

/// Fixed-interval request queue.
///
/// Any number of producers enqueue a ticket and wait for a grant; a single
/// consumer task drains the queue one ticket per tick, so the aggregate call
/// rate stays within budget no matter how many tickers ask at once. Producers
/// never share a lock. When the daily budget is gone, tickets are answered
/// immediately with [`DataError::BudgetExceeded`] instead of waiting.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<Ticket>,
    counters: Arc<Counters>,
    settings: QueueSettings,
}

impl RequestQueue {
    /// Start the consumer task. Must be called inside a tokio runtime.
    pub fn spawn(settings: QueueSettings, calendar: TradingCalendar) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(drain(rx, settings.clone(), Arc::clone(&counters), calendar));

        Self {
            tx,
            counters,
            settings,
        }
    }

    /// Wait for a request slot.
    pub async fn acquire(&self) -> Result<(), DataError> {
        let (reply, rx) = oneshot::channel();
        self.counters.queued.fetch_add(1, Ordering::SeqCst);

        if self.tx.send(Ticket { reply }).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(DataError::QueueClosed);
        }

        rx.await.map_err(|_| DataError::QueueClosed)?
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.counters.queued.load(Ordering::SeqCst),
            granted_today: self.counters.granted_today.load(Ordering::SeqCst),
            rejected_today: self.counters.rejected_today.load(Ordering::SeqCst),
            daily_budget: self.settings.daily_budget,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<Ticket>,
    settings: QueueSettings,
    counters: Arc<Counters>,
    calendar: TradingCalendar,
) {
    let mut ticker = tokio::time::interval(settings.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut budget_day = calendar.local_date(Utc::now());

    while let Some(ticket) = rx.recv().await {
        counters.queued.fetch_sub(1, Ordering::SeqCst);

        // Caller gave up (timeout or cancelled scan); don't spend a slot on it
        if ticket.reply.is_closed() {
            continue;
        }

        let today = calendar.local_date(Utc::now());
        if today != budget_day {
            budget_day = today;
            counters.granted_today.store(0, Ordering::SeqCst);
            counters.rejected_today.store(0, Ordering::SeqCst);
            tracing::info!("Request budget reset for {}", today);
        }

        if counters.granted_today.load(Ordering::SeqCst) >= settings.daily_budget {
            counters.rejected_today.fetch_add(1, Ordering::SeqCst);
            let _ = ticket.reply.send(Err(DataError::BudgetExceeded {
                limit: settings.daily_budget,
            }));
            continue;
        }

        ticker.tick().await;
        counters.granted_today.fetch_add(1, Ordering::SeqCst);
        if ticket.reply.send(Ok(())).is_err() {
            tracing::debug!("Request slot granted to a caller that already left");
        }
    }

    tracing::debug!("Request queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn queue(rpm: u32, budget: u32) -> RequestQueue {
        RequestQueue::spawn(
            QueueSettings {
                requests_per_minute: rpm,
                daily_budget: budget,
            },
            TradingCalendar::nyse(),
        )
    }

    #[test]
    fn test_interval_from_rate() {
        let settings = QueueSettings::default();
        assert_eq!(settings.interval(), Duration::from_secs(12));

        let zero = QueueSettings {
            requests_per_minute: 0,
            daily_budget: 1,
        };
        assert_eq!(zero.interval(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_are_spaced_by_interval() {
        let q = queue(5, 500);
        let start = Instant::now();

        q.acquire().await.unwrap();
        q.acquire().await.unwrap();
        q.acquire().await.unwrap();

        // First grant is immediate, the next two wait one tick each
        assert!(start.elapsed() >= Duration::from_secs(24));
        assert_eq!(q.stats().granted_today, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_producers_share_one_rate() {
        let q = queue(5, 500);
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.acquire().await }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert!(start.elapsed() >= Duration::from_secs(48));
        assert_eq!(q.stats().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_is_distinguishable() {
        let q = queue(60, 2);

        assert!(q.acquire().await.is_ok());
        assert!(q.acquire().await.is_ok());

        let err = q.acquire().await.unwrap_err();
        assert_eq!(err, DataError::BudgetExceeded { limit: 2 });
        assert!(err.is_budget_exceeded());

        let stats = q.stats();
        assert_eq!(stats.granted_today, 2);
        assert_eq!(stats.rejected_today, 1);
        assert_eq!(stats.daily_budget, 2);
    }
}
