use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Fixed-width RFC 3339 UTC with microseconds, so lexical order is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

/// One ticker's outcome for one scan run. Phase columns stay NULL when the
/// ticker never reached that phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanResultRow {
    pub id: Option<i64>,
    pub owner: String,
    pub ticker: String,
    pub scan_date: String,
    /// data_unavailable | phase1_failed | phase2_failed | phase3_failed | qualified
    pub stage: String,

    // Phase 1
    pub price: Option<f64>,
    pub avg_volume: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub sma_200_prior: Option<f64>,
    pub phase1_passed: bool,
    pub phase1_reason: Option<String>,

    // Phase 2
    pub current_iv: Option<f64>,
    pub iv_rank: Option<f64>,
    pub phase2_passed: Option<bool>,
    pub phase2_reason: Option<String>,

    // Phase 3
    pub contract: Option<String>,
    pub strike: Option<f64>,
    pub expiration: Option<String>,
    pub dte: Option<i64>,
    pub delta: Option<f64>,
    pub theta: Option<f64>,
    pub bid: Option<f64>,
    pub option_volume: Option<i64>,
    pub open_interest: Option<i64>,
    pub annualized_yield: Option<f64>,
    pub phase3_passed: Option<bool>,
    pub phase3_reason: Option<String>,

    // Phase 4
    pub yield_score: Option<f64>,
    pub iv_rank_score: Option<f64>,
    pub delta_score: Option<f64>,
    pub liquidity_score: Option<f64>,
    pub trend_score: Option<f64>,
    pub composite_score: Option<f64>,

    // Phase 5
    pub has_open_position: Option<bool>,
    pub position_note: Option<String>,

    pub passed: bool,
    pub data_error: Option<String>,
}

/// Per-phase funnel counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PhaseCounts {
    pub total: i64,
    pub phase1_passed: i64,
    pub phase2_passed: i64,
    pub phase3_passed: i64,
    pub scored: i64,
    pub passed: i64,
    pub avg_composite: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub owner: String,
    pub scan_date: String,
    #[serde(flatten)]
    pub counts: PhaseCounts,
    pub run: Option<ScanRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanHistoryEntry {
    pub scan_date: String,
    pub total: i64,
    pub passed: i64,
    pub best_composite: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanRun {
    pub id: Option<i64>,
    pub owner: String,
    pub scan_date: String,
    /// "manual" or "scheduled"
    pub trigger_kind: String,
    pub ticker_count: i64,
    pub persisted_count: i64,
    /// Comma-separated tickers whose rows could not be written
    pub failed_tickers: String,
    pub started_at: String,
    pub finished_at: String,
}

impl ScanRun {
    pub fn failed_ticker_list(&self) -> Vec<String> {
        self.failed_tickers
            .split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct WatchlistRow {
    pub owner: String,
    pub symbol: String,
    pub added_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct QuoteRow {
    pub ticker: String,
    pub price: f64,
    pub source: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct PositionRow {
    pub kind: String,
    pub contracts: Option<i64>,
    pub strike: Option<f64>,
    pub expiration: Option<String>,
    pub shares: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width_and_sortable() {
        let a = Utc.with_ymd_and_hms(2024, 7, 10, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = Utc.with_ymd_and_hms(2024, 7, 10, 21, 0, 0).unwrap();

        let (fa, fb, fc) = (format_timestamp(a), format_timestamp(b), format_timestamp(c));
        assert_eq!(fa, "2024-07-10T09:00:00.000000Z");
        assert_eq!(fa.len(), fc.len());
        assert!(fa < fb && fb < fc);
        assert_eq!(parse_timestamp(&fb).unwrap(), b);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_timestamp("yesterday"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_failed_ticker_list() {
        let run = ScanRun {
            id: None,
            owner: "u1".to_string(),
            scan_date: String::new(),
            trigger_kind: "manual".to_string(),
            ticker_count: 3,
            persisted_count: 1,
            failed_tickers: "AAPL,MSFT".to_string(),
            started_at: String::new(),
            finished_at: String::new(),
        };
        assert_eq!(run.failed_ticker_list(), vec!["AAPL", "MSFT"]);

        let clean = ScanRun {
            failed_tickers: String::new(),
            ..run
        };
        assert!(clean.failed_ticker_list().is_empty());
    }
}
