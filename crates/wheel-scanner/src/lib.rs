//! Wheel Scanner
//!
//! Five-phase scan of a watchlist into ranked cash-secured-put candidates:
//! stock filter, IV screen, option selection, composite scoring and a
//! portfolio check. Results are persisted per run through `scan-store`.

pub mod config;
pub mod criteria;
pub mod error;
pub mod guard;
pub mod indicators;
pub mod phases;
pub mod pipeline;
pub mod progress;
pub mod refresher;
pub mod scorer;

pub use config::ScannerConfig;
pub use criteria::ScanCriteria;
pub use error::ScanError;
pub use guard::{ScanGuard, ScanPermit};
pub use pipeline::{stage_counts, ScanOrchestrator, ScanSummary, ScanTrigger};
pub use progress::{Phase, PortfolioCheck, ScanProgress};
pub use refresher::{PriceRefresher, RefreshOutcome};
pub use scorer::{CompositeScore, CompositeScorer, ScoringWeights};
