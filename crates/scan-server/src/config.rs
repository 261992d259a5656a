use anyhow::{bail, Result};
use chrono::Duration as ChronoDuration;
use market_calendar::TradingCalendar;
use market_data::{ProviderKind, ProviderSettings, QueueSettings};
use std::env;
use std::time::Duration;
use wheel_scanner::config::default_concurrency;
use wheel_scanner::ScannerConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Storage and HTTP
    pub database_url: String,
    pub api_port: u16,

    // Market data
    pub provider: ProviderKind,
    pub polygon_api_key: Option<String>,
    pub rate_limit_per_minute: u32, // 5 on the free tier
    pub daily_request_budget: u32,  // 500 on the free tier

    // Scan run limits
    pub scan_timeout_secs: u64,   // 1800 (30 minutes)
    pub scan_guard_ttl_secs: u64, // 2100 (stale running marker, never below timeout)
    pub scan_concurrency: usize,
    pub watchlist_max: usize,
    pub price_cooldown_hours: i64,

    // After-close scheduler
    pub scheduled_scan_enabled: bool,
    pub scheduled_scan_delay_minutes: i64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:wheel_scanner.db".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,

            provider: env::var("MARKET_DATA_PROVIDER")
                .unwrap_or_else(|_| "mock".to_string())
                .parse()?,
            polygon_api_key: env::var("POLYGON_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            rate_limit_per_minute: env::var("RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            daily_request_budget: env::var("DAILY_REQUEST_BUDGET")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,

            scan_timeout_secs: env::var("SCAN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            scan_guard_ttl_secs: env::var("SCAN_GUARD_TTL_SECS")
                .unwrap_or_else(|_| "2100".to_string())
                .parse()?,
            scan_concurrency: env::var("SCAN_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_concurrency),
            watchlist_max: env::var("WATCHLIST_MAX")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            price_cooldown_hours: env::var("PRICE_COOLDOWN_HOURS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,

            scheduled_scan_enabled: env::var("SCHEDULED_SCAN_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            scheduled_scan_delay_minutes: env::var("SCHEDULED_SCAN_DELAY_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.provider == ProviderKind::Polygon && self.polygon_api_key.is_none() {
            bail!("MARKET_DATA_PROVIDER=polygon requires POLYGON_API_KEY");
        }
        if self.rate_limit_per_minute == 0 {
            bail!("RATE_LIMIT_PER_MINUTE must be at least 1");
        }
        if self.scan_concurrency == 0 {
            bail!("SCAN_CONCURRENCY must be at least 1");
        }
        if self.watchlist_max == 0 {
            bail!("WATCHLIST_MAX must be at least 1");
        }
        if self.price_cooldown_hours < 0 || self.scheduled_scan_delay_minutes < 0 {
            bail!("PRICE_COOLDOWN_HOURS and SCHEDULED_SCAN_DELAY_MINUTES cannot be negative");
        }
        Ok(())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            kind: self.provider,
            api_key: self.polygon_api_key.clone(),
            queue: QueueSettings {
                requests_per_minute: self.rate_limit_per_minute,
                daily_budget: self.daily_request_budget,
            },
        }
    }

    pub fn scanner_config(&self, calendar: TradingCalendar) -> ScannerConfig {
        ScannerConfig {
            calendar,
            concurrency: self.scan_concurrency,
            timeout: Duration::from_secs(self.scan_timeout_secs),
            guard_ttl: Duration::from_secs(self.scan_guard_ttl_secs),
            watchlist_max: self.watchlist_max,
            price_cooldown: ChronoDuration::hours(self.price_cooldown_hours),
            ..ScannerConfig::default()
        }
    }

    pub fn scheduled_scan_delay(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.scheduled_scan_delay_minutes)
    }
}
