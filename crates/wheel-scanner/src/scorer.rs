//! Composite scoring for phase-3 passers.
//!
//! Five sub-scores, each clamped to [0, 100], combined by weight into a single
//! ranking key.

use serde::{Deserialize, Serialize};

/// Weights for the composite score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub yield_weight: f64,
    pub iv_rank_weight: f64,
    pub delta_weight: f64,
    pub liquidity_weight: f64,
    pub trend_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            yield_weight: 0.30,
            iv_rank_weight: 0.25,
            delta_weight: 0.15,
            liquidity_weight: 0.15,
            trend_weight: 0.15,
        }
    }
}

/// Score inputs gathered from the earlier phases
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    /// Percent, e.g. 27.8
    pub annualized_yield: f64,
    pub iv_rank: f64,
    pub delta: f64,
    pub open_interest: i64,
    pub price: f64,
    pub sma_200: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub yield_score: f64,
    pub iv_rank_score: f64,
    pub delta_score: f64,
    pub liquidity_score: f64,
    pub trend_score: f64,
    pub composite: f64,
}

/// Linear ramp: `lo` maps to 0, `hi` to 100, clamped outside.
pub fn ramp(value: f64, lo: f64, hi: f64) -> f64 {
    if !value.is_finite() || hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}

pub fn yield_score(annualized_yield: f64) -> f64 {
    ramp(annualized_yield, 8.0, 24.0)
}

pub fn iv_rank_score(iv_rank: f64) -> f64 {
    ramp(iv_rank, 20.0, 70.0)
}

/// 100 at the -0.235 sweet spot, falling linearly to 0 at -0.02 and at -0.30.
pub fn delta_score(delta: f64) -> f64 {
    const PEAK: f64 = -0.235;
    const SHALLOW: f64 = -0.02;
    const DEEP: f64 = -0.30;

    if !delta.is_finite() {
        return 0.0;
    }
    if delta >= PEAK {
        ramp(-delta, -SHALLOW, -PEAK)
    } else {
        ramp(delta, DEEP, PEAK)
    }
}

pub fn liquidity_score(open_interest: i64) -> f64 {
    ramp(open_interest as f64, 0.0, 500.0)
}

/// Distance above SMA-200: 0% scores 0, 20% or more scores 100.
pub fn trend_score(price: f64, sma_200: f64) -> f64 {
    if sma_200 <= 0.0 {
        return 0.0;
    }
    ramp(price / sma_200 - 1.0, 0.0, 0.20)
}

/// Scores phase-3 passers
pub struct CompositeScorer {
    weights: ScoringWeights,
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeScorer {
    /// Create a new scorer with default weights
    pub fn new() -> Self {
        Self {
            weights: ScoringWeights::default(),
        }
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, inputs: &ScoreInputs) -> CompositeScore {
        let yield_score = yield_score(inputs.annualized_yield);
        let iv_rank_score = iv_rank_score(inputs.iv_rank);
        let delta_score = delta_score(inputs.delta);
        let liquidity_score = liquidity_score(inputs.open_interest);
        let trend_score = trend_score(inputs.price, inputs.sma_200);

        let composite = yield_score * self.weights.yield_weight
            + iv_rank_score * self.weights.iv_rank_weight
            + delta_score * self.weights.delta_weight
            + liquidity_score * self.weights.liquidity_weight
            + trend_score * self.weights.trend_weight;

        CompositeScore {
            yield_score,
            iv_rank_score,
            delta_score,
            liquidity_score,
            trend_score,
            composite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_decreasing(f: impl Fn(f64) -> f64, from: f64, to: f64) -> bool {
        let steps = 400;
        let mut prev = f(from);
        for i in 1..=steps {
            let x = from + (to - from) * i as f64 / steps as f64;
            let y = f(x);
            if y + 1e-12 < prev {
                return false;
            }
            prev = y;
        }
        true
    }

    #[test]
    fn test_ramp_endpoints_and_clamp() {
        assert_eq!(yield_score(8.0), 0.0);
        assert_eq!(yield_score(24.0), 100.0);
        assert_eq!(yield_score(40.0), 100.0);
        assert_eq!(yield_score(4.0), 0.0);
        assert_eq!(iv_rank_score(45.0), 50.0);
        assert_eq!(liquidity_score(250), 50.0);
        assert_eq!(liquidity_score(5_000), 100.0);
        assert_eq!(ramp(f64::NAN, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_delta_peak_and_edges() {
        assert!((delta_score(-0.235) - 100.0).abs() < 1e-9);
        assert!(delta_score(-0.02).abs() < 1e-9);
        assert!(delta_score(-0.30).abs() < 1e-9);
        assert_eq!(delta_score(-0.01), 0.0);
        assert_eq!(delta_score(-0.45), 0.0);
        assert!((delta_score(-0.22) - 93.023).abs() < 1e-2);
    }

    #[test]
    fn test_sub_scores_monotonic() {
        assert!(non_decreasing(yield_score, 0.0, 40.0));
        assert!(non_decreasing(iv_rank_score, 0.0, 100.0));
        assert!(non_decreasing(|oi| liquidity_score(oi as i64), 0.0, 1_000.0));
        assert!(non_decreasing(|p| trend_score(p, 100.0), 80.0, 140.0));
        // Delta rises toward the peak from each side
        assert!(non_decreasing(delta_score, -0.40, -0.235));
        assert!(non_decreasing(|d| delta_score(-d), 0.0, 0.235));
    }

    #[test]
    fn test_trend_score() {
        assert_eq!(trend_score(100.0, 100.0), 0.0);
        assert!((trend_score(110.0, 100.0) - 50.0).abs() < 1e-9);
        assert_eq!(trend_score(130.0, 100.0), 100.0);
        assert_eq!(trend_score(130.0, 0.0), 0.0);
    }

    #[test]
    fn test_composite_example() {
        let scorer = CompositeScorer::new();
        let score = scorer.score(&ScoreInputs {
            annualized_yield: 27.8,
            iv_rank: 45.0,
            delta: -0.22,
            open_interest: 100,
            price: 145.0,
            sma_200: 130.0,
        });

        assert_eq!(score.yield_score, 100.0);
        assert_eq!(score.iv_rank_score, 50.0);
        assert!((score.liquidity_score - 20.0).abs() < 1e-9);
        let expected = 100.0 * 0.30 + 50.0 * 0.25 + score.delta_score * 0.15 + 20.0 * 0.15 + score.trend_score * 0.15;
        assert!((score.composite - expected).abs() < 1e-9);
        assert!(score.composite > 0.0 && score.composite <= 100.0);
    }

    #[test]
    fn test_custom_weights() {
        let scorer = CompositeScorer::with_weights(ScoringWeights {
            yield_weight: 1.0,
            iv_rank_weight: 0.0,
            delta_weight: 0.0,
            liquidity_weight: 0.0,
            trend_weight: 0.0,
        });
        let score = scorer.score(&ScoreInputs {
            annualized_yield: 16.0,
            iv_rank: 90.0,
            delta: -0.235,
            open_interest: 900,
            price: 150.0,
            sma_200: 100.0,
        });
        assert!((score.composite - 50.0).abs() < 1e-9);
    }
}
