//! Overnight gap detection

use crate::{
    config::GapConfig, DetectorError, Direction, Result, Signal, SignalDetails, SignalId,
    SignalResult, Threshold, OHLCV,
};

/// Diagnostics for a gap evaluation
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GapDetails {
    /// |open - prior close| / prior close * 100
    pub gap_percent: f64,
    pub signed_gap_percent: f64,
    /// open - prior close, in price units
    pub absolute_gap: f64,
    pub direction: Direction,
    pub threshold_percent: f64,
}

/// Abnormal displacement between the prior close and today's open.
///
/// Only the latest two bars are read, so no lookback applies.
#[derive(Debug, Clone)]
pub struct GapSignal {
    pub threshold_percent: Threshold,
}

impl Default for GapSignal {
    fn default() -> Self {
        Self {
            threshold_percent: Threshold::new_const(2.0),
        }
    }
}

impl GapSignal {
    pub fn with_defaults() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GapConfig) -> Self {
        Self {
            threshold_percent: config.threshold_percent,
        }
    }
}

impl Signal for GapSignal {
    fn id(&self) -> SignalId {
        SignalId::GAP
    }

    fn min_bars(&self) -> usize {
        2
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

        let prev_close = bars[n - 2].close();
        if prev_close <= 0.0 {
            return Err(DetectorError::DegeneratePrice { index: n - 2 });
        }
        let open = bars[n - 1].open();

        let absolute_gap = open - prev_close;
        let gap_percent = absolute_gap.abs() / prev_close * 100.0;
        let threshold_percent = self.threshold_percent.get();

        Ok(SignalResult {
            signal: self.id(),
            detected: gap_percent > threshold_percent,
            details: SignalDetails::Gap(GapDetails {
                gap_percent,
                signed_gap_percent: absolute_gap / prev_close * 100.0,
                absolute_gap,
                direction: Direction::from_delta(absolute_gap),
                threshold_percent,
            }),
        })
    }
}
