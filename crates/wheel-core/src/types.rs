use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DataError;

/// Explicit identity of the watchlist owner. Every pipeline and store call takes one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper-cases and validates a ticker symbol (1-10 chars of A-Z, 0-9, '.' or '-').
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 10
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
    valid.then_some(symbol)
}

/// Daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Point-in-time price for a ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Per-ticker outcome of a batch quote request.
#[derive(Debug, Clone)]
pub struct QuoteResult {
    pub ticker: String,
    pub outcome: Result<Quote, DataError>,
}

impl QuoteResult {
    pub fn ok(quote: Quote) -> Self {
        Self {
            ticker: quote.ticker.clone(),
            outcome: Ok(quote),
        }
    }

    pub fn failed(ticker: impl Into<String>, error: DataError) -> Self {
        Self {
            ticker: ticker.into(),
            outcome: Err(error),
        }
    }

    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error_text(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}

/// A put contract offered to the option-selection phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionCandidate {
    pub ticker: String,
    /// OCC-style contract identifier, e.g. `O:AAPL241220P00140000`
    pub contract: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub dte: i64,
    pub delta: f64,
    pub theta: Option<f64>,
    pub bid: f64,
    pub implied_volatility: Option<f64>,
    pub open_interest: i64,
    pub volume: i64,
}

impl OptionCandidate {
    /// Premium yield if held to expiry, annualized, in percent.
    pub fn annualized_yield(&self) -> f64 {
        if self.strike <= 0.0 || self.dte <= 0 {
            return 0.0;
        }
        (self.bid / self.strike) * (365.0 / self.dte as f64) * 100.0
    }
}

/// Current implied volatility and its trailing 52-week range, as decimals (0.32 = 32%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvStats {
    pub ticker: String,
    pub current_iv: f64,
    pub low_52w: f64,
    pub high_52w: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistTicker {
    pub owner: OwnerId,
    pub symbol: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub provider: String,
    pub healthy: bool,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Existing wheel position on a ticker, as reported by the portfolio side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortfolioExposure {
    CashSecuredPut {
        contracts: i64,
        strike: f64,
        expiration: NaiveDate,
    },
    AssignedShares {
        shares: f64,
    },
}

impl PortfolioExposure {
    pub fn advisory(&self) -> String {
        match self {
            PortfolioExposure::CashSecuredPut {
                contracts,
                strike,
                expiration,
            } => format!(
                "Open cash-secured put: {} contract(s) at ${:.2} expiring {}",
                contracts, strike, expiration
            ),
            PortfolioExposure::AssignedShares { shares } => {
                format!("Holding {:.0} assigned shares", shares)
            }
        }
    }
}
