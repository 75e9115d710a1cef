//! Volatility spike detection
//!
//! Compares the magnitude of the latest close-to-close return with the
//! sample standard deviation of the returns that precede it.

use super::helpers::{daily_returns, sample_std_dev, MIN_STD_DEV_SAMPLE};
use crate::{
    config::VolatilityConfig, DetectorError, Period, Result, Signal, SignalDetails, SignalId,
    SignalResult, Threshold, OHLCV,
};

/// Diagnostics for a volatility evaluation
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct VolatilityDetails {
    /// Latest fractional return
    pub recent_return: f64,
    /// Sample std-dev of the trailing returns
    pub historical_volatility: f64,
    pub threshold: f64,
    /// |recent_return| / historical_volatility, None when the window is flat
    pub ratio: Option<f64>,
    /// Number of trailing returns in the baseline
    pub window: usize,
}

/// Abnormal single-day return relative to trailing volatility
#[derive(Debug, Clone)]
pub struct VolatilitySignal {
    pub threshold_multiplier: Threshold,
    pub lookback_period: Period,
}

impl Default for VolatilitySignal {
    fn default() -> Self {
        Self {
            threshold_multiplier: Threshold::new_const(2.0),
            lookback_period: Period::new_const(20),
        }
    }
}

impl VolatilitySignal {
    pub fn with_defaults() -> Self {
        Self::default()
    }

    pub fn from_config(config: &VolatilityConfig) -> Self {
        Self {
            threshold_multiplier: config.threshold_multiplier,
            lookback_period: config.lookback_period,
        }
    }
}

impl Signal for VolatilitySignal {
    fn id(&self) -> SignalId {
        SignalId::VOLATILITY_SPIKE
    }

    fn min_bars(&self) -> usize {
        self.lookback_period.get().saturating_add(1).max(MIN_STD_DEV_SAMPLE + 2)
    }

    fn validate_config(&self) -> Result<()> {
        if self.lookback_period.get() < MIN_STD_DEV_SAMPLE {
            return Err(DetectorError::InvalidConfig(format!(
                "volatility.lookback_period must be at least {MIN_STD_DEV_SAMPLE}, got {}",
                self.lookback_period.get()
            )));
        }
        Ok(())
    }

    fn evaluate<T: OHLCV>(&self, bars: &[T]) -> Result<SignalResult> {
        let insufficient = || DetectorError::InsufficientData {
            signal: self.id(),
            need: self.min_bars(),
            got: bars.len(),
        };
        if bars.len() < self.min_bars() {
            return Err(insufficient());
        }

        // lookback returns before the latest one need lookback + 2 closes
        let start = bars.len().saturating_sub(self.lookback_period.get().saturating_add(2));
        let returns = daily_returns(&bars[start..], start)?;
        let Some((&recent_return, historical)) = returns.split_last() else {
            return Err(insufficient());
        };
        let sigma = sample_std_dev(historical).ok_or_else(insufficient)?;

        let threshold = self.threshold_multiplier.get() * sigma;
        let magnitude = recent_return.abs();

        // Flat baseline: any movement at all is anomalous, no movement never is.
        let (detected, ratio) = if sigma == 0.0 {
            (recent_return != 0.0, None)
        } else {
            (magnitude > threshold, Some(magnitude / sigma))
        };

        Ok(SignalResult {
            signal: self.id(),
            detected,
            details: SignalDetails::Volatility(VolatilityDetails {
                recent_return,
                historical_volatility: sigma,
                threshold,
                ratio,
                window: historical.len(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use approx::assert_relative_eq;

    fn closes(values: &[f64]) -> Vec<Bar> {
        values.iter().map(|&c| Bar::new(c, c, c, c)).collect()
    }

    fn details(result: &SignalResult) -> VolatilityDetails {
        match result.details {
            SignalDetails::Volatility(d) => d,
            _ => panic!("expected volatility details"),
        }
    }

    #[test]
    fn test_flat_window_no_move_is_not_detected() {
        let bars = closes(&[100.0; 25]);
        let result = VolatilitySignal::default().evaluate(&bars).unwrap();
        assert!(!result.detected);
        let d = details(&result);
        assert_eq!(d.historical_volatility, 0.0);
        assert_eq!(d.recent_return, 0.0);
        assert_eq!(d.ratio, None);
    }

    #[test]
    fn test_flat_window_any_move_is_detected() {
        let mut values = vec![100.0; 24];
        values.push(100.01);
        let result = VolatilitySignal::default().evaluate(&closes(&values)).unwrap();
        assert!(result.detected);
        assert_eq!(details(&result).ratio, None);
    }

    #[test]
    fn test_uses_only_trailing_lookback() {
        // Wild early history outside the 20-return window must not matter
        let mut values = vec![50.0, 150.0, 50.0, 150.0];
        values.extend(std::iter::repeat(100.0).take(22));
        let result = VolatilitySignal::default().evaluate(&closes(&values)).unwrap();
        let d = details(&result);
        assert_eq!(d.window, 20);
        assert_eq!(d.historical_volatility, 0.0);
        assert!(!result.detected);
    }

    #[test]
    fn test_spike_against_noisy_baseline() {
        let mut values: Vec<f64> = (0..25).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        values.push(110.0);
        let result = VolatilitySignal::default().evaluate(&closes(&values)).unwrap();
        let d = details(&result);
        assert!(result.detected);
        assert!(d.ratio.unwrap() > 2.0);
        assert_relative_eq!(d.threshold, 2.0 * d.historical_volatility);
    }

    #[test]
    fn test_normal_move_against_noisy_baseline() {
        let mut values: Vec<f64> = (0..25).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        values.push(100.0);
        let result = VolatilitySignal::default().evaluate(&closes(&values)).unwrap();
        assert!(!result.detected);
        assert!(details(&result).ratio.unwrap() < 2.0);
    }

    #[test]
    fn test_insufficient_data() {
        let bars = closes(&[100.0; 20]);
        let err = VolatilitySignal::default().evaluate(&bars).unwrap_err();
        assert_eq!(
            err,
            DetectorError::InsufficientData {
                signal: SignalId::VOLATILITY_SPIKE,
                need: 21,
                got: 20
            }
        );
    }

    #[test]
    fn test_exact_min_bars_uses_available_returns() {
        let bars = closes(&[100.0; 21]);
        let result = VolatilitySignal::default().evaluate(&bars).unwrap();
        assert_eq!(details(&result).window, 19);
    }

    #[test]
    fn test_lookback_too_small_for_std_dev() {
        let signal = VolatilitySignal {
            lookback_period: Period::new(1).unwrap(),
            ..VolatilitySignal::default()
        };
        assert!(signal.validate_config().is_err());
        assert!(VolatilitySignal::default().validate_config().is_ok());
    }

    #[test]
    fn test_huge_lookback_is_insufficient() {
        let signal = VolatilitySignal {
            lookback_period: Period::new(usize::MAX).unwrap(),
            ..VolatilitySignal::default()
        };
        let err = signal.evaluate(&closes(&[100.0; 25])).unwrap_err();
        assert!(err.is_insufficient_data());
        assert_eq!(err.signal(), Some(SignalId::VOLATILITY_SPIKE));
    }
}
