//! Exchange trading calendar and quote freshness rules.
//!
//! The calendar is the single source of truth for "is the market open",
//! "when did it last close" and "when does it next open". The freshness
//! policy builds on it to decide whether a cached quote may be refreshed.

pub mod calendar;
pub mod freshness;
pub mod holidays;

pub use calendar::TradingCalendar;
pub use freshness::{FreshnessPolicy, RefreshEligibility, DEFAULT_COOLDOWN_HOURS};
