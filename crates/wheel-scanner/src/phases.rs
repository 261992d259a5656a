//! Pure evaluators for the three gating phases.
//!
//! None of these touch the network or the clock; the orchestrator fetches the
//! inputs and hands them over. Every verdict carries a human-readable reason,
//! whether it passed or not.

use serde::{Deserialize, Serialize};
use wheel_core::{Bar, IvStats, OptionCandidate};

use crate::criteria::ScanCriteria;
use crate::indicators::{average_volume, closes, sma_at};

const EPSILON: f64 = 1e-9;

/// Outcome of one phase: the data it computed plus whether it let the ticker through.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult<T> {
    pub data: T,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMetrics {
    pub price: f64,
    pub avg_volume: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    /// SMA-200 as it stood `trend_lookback` sessions ago
    pub sma_200_prior: Option<f64>,
    pub reason: String,
}

impl StockMetrics {
    pub fn price_only(price: f64, reason: impl Into<String>) -> Self {
        Self {
            price,
            avg_volume: None,
            sma_50: None,
            sma_200: None,
            sma_200_prior: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvMetrics {
    pub current_iv: f64,
    pub low_52w: f64,
    pub high_52w: f64,
    /// `None` when the 52-week range is degenerate
    pub iv_rank: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedPut {
    pub put: OptionCandidate,
    pub annualized_yield: f64,
    pub reason: String,
}

/// Cheap pre-check on the quote alone, so history is only fetched for tickers in the band.
pub fn price_band_failure(price: f64, criteria: &ScanCriteria) -> Option<String> {
    if !price.is_finite() {
        Some(format!("price {} is not a usable quote", price))
    } else if price < criteria.min_price {
        Some(format!(
            "price ${:.2} below ${:.2} floor",
            price, criteria.min_price
        ))
    } else if price > criteria.max_price {
        Some(format!(
            "price ${:.2} above ${:.2} ceiling",
            price, criteria.max_price
        ))
    } else {
        None
    }
}

/// Phase 1: price band, liquidity and a rising long-term trend.
///
/// Sub-conditions are checked in a fixed order and the reason names the first
/// one that fails: price floor, price ceiling, average volume, history length,
/// price above SMA-200, SMA-200 rising.
pub fn evaluate_stock(price: f64, bars: &[Bar], criteria: &ScanCriteria) -> PhaseResult<StockMetrics> {
    let series = closes(bars);
    let avg_volume = average_volume(bars, criteria.avg_volume_window);
    let sma_50 = sma_at(&series, criteria.fast_sma_period, 0);
    let sma_200 = sma_at(&series, criteria.slow_sma_period, 0);
    let sma_200_prior = sma_at(&series, criteria.slow_sma_period, criteria.trend_lookback);

    let mut metrics = StockMetrics {
        price,
        avg_volume,
        sma_50,
        sma_200,
        sma_200_prior,
        reason: String::new(),
    };

    let failure = if let Some(reason) = price_band_failure(price, criteria) {
        Some(reason)
    } else if avg_volume.unwrap_or(0.0) <= criteria.min_avg_volume {
        Some(format!(
            "average volume {:.0} not above {:.0}",
            avg_volume.unwrap_or(0.0),
            criteria.min_avg_volume
        ))
    } else if bars.len() < criteria.min_history() {
        Some(format!(
            "insufficient price history: {} bars, need {}",
            bars.len(),
            criteria.min_history()
        ))
    } else {
        match (sma_200, sma_200_prior) {
            (Some(slow), _) if price <= slow => Some(format!(
                "price ${:.2} not above SMA-200 ${:.2}",
                price, slow
            )),
            (Some(slow), Some(prior)) if slow <= prior => Some(format!(
                "SMA-200 not rising ({:.2} vs {:.2} {} sessions ago)",
                slow, prior, criteria.trend_lookback
            )),
            (Some(_), Some(_)) => None,
            _ => Some("insufficient price history for SMA-200".to_string()),
        }
    };

    let passed = failure.is_none();
    metrics.reason = failure.unwrap_or_else(|| {
        format!(
            "price ${:.2} above rising SMA-200 ${:.2}, avg volume {:.0}",
            price,
            sma_200.unwrap_or_default(),
            avg_volume.unwrap_or_default()
        )
    });

    PhaseResult { data: metrics, passed }
}

/// IV rank in [0, 100], or `None` if the 52-week range has no width.
pub fn iv_rank(current: f64, low: f64, high: f64) -> Option<f64> {
    let width = high - low;
    if !current.is_finite() || !width.is_finite() || width <= EPSILON {
        return None;
    }
    Some(((current - low) / width * 100.0).clamp(0.0, 100.0))
}

/// Phase 2: IV rank at or above the minimum. A degenerate range fails closed.
pub fn evaluate_iv(stats: &IvStats, criteria: &ScanCriteria) -> PhaseResult<IvMetrics> {
    let rank = iv_rank(stats.current_iv, stats.low_52w, stats.high_52w);

    let (passed, reason) = match rank {
        None => (
            false,
            format!(
                "degenerate 52-week IV range ({:.1}% - {:.1}%)",
                stats.low_52w * 100.0,
                stats.high_52w * 100.0
            ),
        ),
        Some(r) if r < criteria.min_iv_rank => (
            false,
            format!("IV rank {:.1} below {:.0}", r, criteria.min_iv_rank),
        ),
        Some(r) => (
            true,
            format!("IV rank {:.1} (IV {:.1}%)", r, stats.current_iv * 100.0),
        ),
    };

    PhaseResult {
        data: IvMetrics {
            current_iv: stats.current_iv,
            low_52w: stats.low_52w,
            high_52w: stats.high_52w,
            iv_rank: rank,
            reason,
        },
        passed,
    }
}

/// Constraint failures of one contract, in reporting order: DTE, delta, volume, yield.
fn constraint_failures(put: &OptionCandidate, criteria: &ScanCriteria) -> Vec<String> {
    let mut failures = Vec::new();

    if put.dte < criteria.min_dte || put.dte > criteria.max_dte {
        failures.push(format!(
            "DTE {} outside {}-{}",
            put.dte, criteria.min_dte, criteria.max_dte
        ));
    }
    if !(criteria.min_delta..=criteria.max_delta).contains(&put.delta) {
        failures.push(format!(
            "delta {:.3} outside {:.2} to {:.2}",
            put.delta, criteria.min_delta, criteria.max_delta
        ));
    }
    if put.volume < criteria.min_option_volume {
        failures.push(format!(
            "option volume {} below {}",
            put.volume, criteria.min_option_volume
        ));
    }
    let annualized = put.annualized_yield();
    if annualized <= criteria.min_annualized_yield {
        failures.push(format!(
            "annualized yield {:.1}% not above {:.1}%",
            annualized, criteria.min_annualized_yield
        ));
    }

    failures
}

/// Phase 3: pick the best out-of-the-money put that clears every constraint.
///
/// Ties on yield go to the delta closest to the target, then to the contract
/// identifier so the pick is deterministic. On failure the reason describes
/// the nearest miss: the contract with the fewest failed constraints.
pub fn select_put(price: f64, chain: &[OptionCandidate], criteria: &ScanCriteria) -> Result<SelectedPut, String> {
    if chain.is_empty() {
        return Err("no option chain available".to_string());
    }

    let otm: Vec<&OptionCandidate> = chain.iter().filter(|p| p.strike < price).collect();
    if otm.is_empty() {
        return Err("no out-of-the-money puts".to_string());
    }

    let mut qualifying: Vec<&OptionCandidate> = otm
        .iter()
        .copied()
        .filter(|p| constraint_failures(p, criteria).is_empty())
        .collect();

    qualifying.sort_by(|a, b| {
        b.annualized_yield()
            .partial_cmp(&a.annualized_yield())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = (a.delta - criteria.target_delta).abs();
                let db = (b.delta - criteria.target_delta).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.contract.cmp(&b.contract))
    });

    if let Some(best) = qualifying.first() {
        let annualized_yield = best.annualized_yield();
        return Ok(SelectedPut {
            put: (*best).clone(),
            annualized_yield,
            reason: format!(
                "{} ${:.2} put, {} DTE, delta {:.3}, yield {:.1}%",
                best.expiration, best.strike, best.dte, best.delta, annualized_yield
            ),
        });
    }

    let nearest = otm
        .iter()
        .map(|p| (p, constraint_failures(p, criteria)))
        .min_by(|(a, fa), (b, fb)| {
            fa.len()
                .cmp(&fb.len())
                .then_with(|| {
                    b.annualized_yield()
                        .partial_cmp(&a.annualized_yield())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.contract.cmp(&b.contract))
        });

    match nearest {
        Some((put, failures)) => Err(format!(
            "no qualifying put; nearest miss {} ${:.2}: {}",
            put.expiration,
            put.strike,
            failures.first().map(String::as_str).unwrap_or("unknown constraint")
        )),
        None => Err("no out-of-the-money puts".to_string()),
    }
}
