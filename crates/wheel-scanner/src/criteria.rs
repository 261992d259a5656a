use serde::{Deserialize, Serialize};

/// Thresholds for the three gating phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCriteria {
    /// Inclusive price band
    pub min_price: f64,
    pub max_price: f64,
    /// Average daily volume must be strictly above this
    pub min_avg_volume: f64,
    pub avg_volume_window: usize,
    pub fast_sma_period: usize,
    pub slow_sma_period: usize,
    /// Sessions back to compare SMA-200 against for the "rising" test
    pub trend_lookback: usize,

    pub min_iv_rank: f64,

    pub min_dte: i64,
    pub max_dte: i64,
    /// Delta window for short puts, both ends inclusive
    pub min_delta: f64,
    pub max_delta: f64,
    pub target_delta: f64,
    pub min_option_volume: i64,
    /// Annualized yield (percent) must be strictly above this
    pub min_annualized_yield: f64,
}

impl Default for ScanCriteria {
    fn default() -> Self {
        Self {
            min_price: 13.0,
            max_price: 150.0,
            min_avg_volume: 1_000_000.0,
            avg_volume_window: 50,
            fast_sma_period: 50,
            slow_sma_period: 200,
            trend_lookback: 20,
            min_iv_rank: 20.0,
            min_dte: 5,
            max_dte: 45,
            min_delta: -0.30,
            max_delta: -0.02,
            target_delta: -0.235,
            min_option_volume: 20,
            min_annualized_yield: 8.0,
        }
    }
}

impl ScanCriteria {
    /// Bars needed for the slow SMA plus its lookback
    pub fn min_history(&self) -> usize {
        self.slow_sma_period + self.trend_lookback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_history() {
        assert_eq!(ScanCriteria::default().min_history(), 220);
    }
}
