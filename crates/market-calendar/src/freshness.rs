use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::TradingCalendar;

pub const DEFAULT_COOLDOWN_HOURS: i64 = 4;

/// Whether a ticker's cached quote may be refreshed right now. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshEligibility {
    pub ticker: String,
    pub can_refresh: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Refresh rules: one refresh per cooldown window while the market is open,
/// and one settle-price refresh per session once it has closed.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    calendar: TradingCalendar,
    cooldown: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(TradingCalendar::nyse(), Duration::hours(DEFAULT_COOLDOWN_HOURS))
    }
}

impl FreshnessPolicy {
    pub fn new(calendar: TradingCalendar, cooldown: Duration) -> Self {
        Self { calendar, cooldown }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Pure decision over (last_updated, now); no I/O and no clock reads.
    pub fn eligibility(
        &self,
        ticker: &str,
        last_updated: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RefreshEligibility {
        let Some(last) = last_updated else {
            return RefreshEligibility {
                ticker: ticker.to_string(),
                can_refresh: true,
                last_updated: None,
                next_refresh_at: None,
                reason: "no cached price".to_string(),
            };
        };

        let (can_refresh, next_refresh_at, reason) = if self.calendar.is_open(now) {
            let age = now - last;
            if age >= self.cooldown {
                (
                    true,
                    None,
                    format!(
                        "market open; last refresh {:.1}h ago, cooldown elapsed",
                        age.num_minutes() as f64 / 60.0
                    ),
                )
            } else {
                (
                    false,
                    Some(last + self.cooldown),
                    format!(
                        "market open; refresh cooldown of {}h still active",
                        self.cooldown.num_hours()
                    ),
                )
            }
        } else if last < self.calendar.last_close(now) {
            (true, None, "market closed; cached price predates last close".to_string())
        } else {
            (
                false,
                Some(self.calendar.next_open(now)),
                "market closed; cached price already reflects last close".to_string(),
            )
        };

        RefreshEligibility {
            ticker: ticker.to_string(),
            can_refresh,
            last_updated: Some(last),
            next_refresh_at,
            reason,
        }
    }

    /// Evaluate many tickers against one fixed `now`.
    pub fn eligibility_many(
        &self,
        entries: &[(String, Option<DateTime<Utc>>)],
        now: DateTime<Utc>,
    ) -> Vec<RefreshEligibility> {
        entries
            .iter()
            .map(|(ticker, last)| self.eligibility(ticker, *last, now))
            .collect()
    }
}
