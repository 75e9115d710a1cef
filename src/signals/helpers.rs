//! Shared statistics for the signal detectors
//!
//! Trailing windows always end *before* the bar under evaluation.

use crate::{DetectorError, Result, OHLCV};

/// Minimum number of observations for a sample standard deviation
pub const MIN_STD_DEV_SAMPLE: usize = 2;

/// The `period` items immediately preceding index `end` (fewer if the slice is shorter).
#[inline]
pub fn trailing_window<T>(items: &[T], end: usize, period: usize) -> &[T] {
    let end = end.min(items.len());
    &items[end.saturating_sub(period)..end]
}

/// Arithmetic mean. Returns None for an empty slice
#[inline]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). Returns None below two values
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < MIN_STD_DEV_SAMPLE {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Close-to-close fractional returns. `offset` is the index of `bars[0]`
/// in the full series and is only used for error reporting.
pub fn daily_returns<T: OHLCV>(bars: &[T], offset: usize) -> Result<Vec<f64>> {
    bars.windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let prev = pair[0].close();
            if prev <= 0.0 {
                return Err(DetectorError::DegeneratePrice { index: offset + i });
            }
            Ok((pair[1].close() - prev) / prev)
        })
        .collect()
}
