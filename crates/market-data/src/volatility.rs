//! Realized-volatility helpers used to approximate a 52-week IV range when the
//! upstream API has no implied-volatility history.

pub const REALIZED_VOL_WINDOW: usize = 20;
pub const TRADING_DAYS_PER_YEAR: usize = 252;

/// Annualized close-to-close volatility for every `window`-bar slice, as decimals.
pub fn rolling_realized_vol(closes: &[f64], window: usize) -> Vec<f64> {
    if window < 2 || closes.len() < window {
        return Vec::new();
    }

    let mut vols = Vec::with_capacity(closes.len() - window + 1);
    for end in window..=closes.len() {
        let slice = &closes[end - window..end];
        let returns: Vec<f64> = slice
            .windows(2)
            .map(|w| if w[0] > 0.0 { (w[1] / w[0]).ln() } else { 0.0 })
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        vols.push(var.sqrt() * (TRADING_DAYS_PER_YEAR as f64).sqrt());
    }
    vols
}

/// (low, high) of rolling realized volatility over the trailing year of closes.
pub fn realized_vol_range(closes: &[f64]) -> Option<(f64, f64)> {
    let start = closes.len().saturating_sub(TRADING_DAYS_PER_YEAR);
    let vols = rolling_realized_vol(&closes[start..], REALIZED_VOL_WINDOW);
    if vols.is_empty() {
        return None;
    }
    let low = vols.iter().copied().fold(f64::INFINITY, f64::min);
    let high = vols.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((low, high))
}
