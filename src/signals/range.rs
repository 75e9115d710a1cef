//! Wide trading range detection

use super::helpers::{mean, trailing_window};
use crate::{
    config::RangeConfig, DetectorError, OHLCVExt, Period, Result, Signal, SignalDetails,
    SignalId, SignalResult, Threshold, OHLCV,
};

/// Diagnostics for a range evaluation
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RangeDetails {
    /// Latest (high - low) / close * 100
    pub range_pct_last: f64,
    /// Mean range percent over the trailing window
    pub mean_range_pct: f64,
    /// mean_range_pct * (1 + threshold_percent / 100)
    pub threshold: f64,
    /// range_pct_last / mean_range_pct, None when the baseline range is zero
    pub excess_ratio: Option<f64>,
    pub window: usize,
}

/// Abnormally wide high-low range relative to its trailing average
#[derive(Debug, Clone)]
pub struct RangeSignal {
    /// Allowed excess over the average range, in percent
    pub threshold_percent: Threshold,
    pub lookback_period: Period,
}

impl Default for RangeSignal {
    fn default() -> Self {
        Self {
            threshold_percent: Threshold::new_const(50.0),
            lookback_period: Period::new_const(20),
        }
    }
}

impl RangeSignal {
    pub fn with_defaults() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RangeConfig) -> Self {
        Self {
            threshold_percent: config.threshold_percent,
            lookback_period: config.lookback_period,
        }
    }
}

fn range_pct_at<T: OHLCV>(bar: &T, index: usize) -> Result<f64> {
    bar.range_pct()
        .ok_or(DetectorError::DegeneratePrice { index })
}

impl Signal for RangeSignal {
    fn id(&self) -> SignalId {
        SignalId::WIDE_RANGE
    }

    fn min_bars(&self) -> usize {
        self.lookback_period.get().saturating_add(1)
    }

    fn evaluate<T: OHLCV>(&self, bars: &[T]) -> Result<SignalResult> {
        let n = bars.len();
        if n < self.min_bars() {
            return Err(DetectorError::InsufficientData {
                signal: self.id(),
                need: self.min_bars(),
                got: n,
            });
        }

        let last = n - 1;
        let window = trailing_window(bars, last, self.lookback_period.get());
        let window_start = last - window.len();

        let ranges = window
            .iter()
            .enumerate()
            .map(|(i, bar)| range_pct_at(bar, window_start + i))
            .collect::<Result<Vec<f64>>>()?;
        let range_pct_last = range_pct_at(&bars[last], last)?;

        let mean_range_pct = mean(&ranges).unwrap_or(0.0);
        let threshold = mean_range_pct * (1.0 + self.threshold_percent.get() / 100.0);
        let excess_ratio = (mean_range_pct > 0.0).then(|| range_pct_last / mean_range_pct);

        Ok(SignalResult {
            signal: self.id(),
            detected: range_pct_last > threshold,
            details: SignalDetails::Range(RangeDetails {
                range_pct_last,
                mean_range_pct,
                threshold,
                excess_ratio,
                window: ranges.len(),
            }),
        })
    }
}
