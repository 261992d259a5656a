use wheel_core::Bar;

/// SMA over the last `period` values, ending `offset` values before the end
pub fn sma_at(data: &[f64], period: usize, offset: usize) -> Option<f64> {
    if period == 0 || data.len() < period + offset {
        return None;
    }
    let end = data.len() - offset;
    Some(data[end - period..end].iter().sum::<f64>() / period as f64)
}

/// Mean daily volume over the trailing `window` sessions (fewer if history is short)
pub fn average_volume(bars: &[Bar], window: usize) -> Option<f64> {
    if bars.is_empty() || window == 0 {
        return None;
    }
    let start = bars.len().saturating_sub(window);
    let slice = &bars[start..];
    Some(slice.iter().map(|b| b.volume).sum::<f64>() / slice.len() as f64)
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(close: f64, volume: f64) -> Bar {
        Bar {
            ticker: "T".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn test_sma_at_offsets() {
        let data: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert_eq!(sma_at(&data, 10, 0), Some(25.5));
        assert_eq!(sma_at(&data, 10, 5), Some(20.5));
        assert_eq!(sma_at(&data, 10, 20), Some(5.5));
        assert_eq!(sma_at(&data, 10, 21), None);
        assert_eq!(sma_at(&data, 0, 0), None);
        assert_eq!(sma_at(&data[..5], 6, 0), None);
    }

    #[test]
    fn test_average_volume_window() {
        let mut bars: Vec<Bar> = (0..10).map(|_| bar(10.0, 100.0)).collect();
        bars.extend((0..5).map(|_| bar(10.0, 400.0)));

        assert_eq!(average_volume(&bars, 5), Some(400.0));
        assert_eq!(average_volume(&bars, 50), Some(200.0));
        assert_eq!(average_volume(&[], 50), None);
    }
}
