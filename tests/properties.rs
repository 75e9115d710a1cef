//! Property tests over randomly generated valid series.

use market_state_detector::prelude::*;
use proptest::prelude::*;

/// A valid bar derived from a close and non-negative offsets
fn bar_strategy() -> impl Strategy<Value = Bar> {
    (1.0f64..1000.0, 0.0f64..1.0, 0.0f64..0.05, 0.0f64..0.05).prop_map(
        |(close, open_frac, up, down)| {
            let high = close * (1.0 + up);
            let low = close * (1.0 - down);
            let open = (low + (high - low) * open_frac).clamp(low, high);
            Bar::new(open, high, low, close)
        },
    )
}

fn series_strategy() -> impl Strategy<Value = PriceSeries> {
    prop::collection::vec(bar_strategy(), 21..80)
        .prop_map(|bars| PriceSeries::new(bars).expect("generated bars are valid"))
}

proptest! {
    #[test]
    fn stage_1_equals_any_signal(series in series_strategy()) {
        let result = analyze(&series, None).unwrap();
        let any = result.signals.iter().any(|s| s.detected);
        prop_assert_eq!(result.stage_1_detected, any);
        prop_assert_eq!(result.flags.is_empty(), !any);
        prop_assert_eq!(result.signals.len(), 3);
    }

    #[test]
    fn analysis_is_deterministic(series in series_strategy()) {
        let detector = RegimeDetector::default();
        prop_assert_eq!(detector.analyze(&series).unwrap(), detector.analyze(&series).unwrap());
    }

    #[test]
    fn raising_thresholds_never_adds_flags(series in series_strategy(), factor in 1.0f64..5.0) {
        let base = DetectorConfig::default();
        let mut strict = base.clone();
        strict.volatility.threshold_multiplier =
            Threshold::new(base.volatility.threshold_multiplier.get() * factor).unwrap();
        strict.gaps.threshold_percent =
            Threshold::new(base.gaps.threshold_percent.get() * factor).unwrap();
        strict.ranges.threshold_percent =
            Threshold::new(base.ranges.threshold_percent.get() * factor).unwrap();

        let loose = analyze(&series, Some(&base)).unwrap();
        let tight = analyze(&series, Some(&strict)).unwrap();
        for flag in &tight.flags {
            prop_assert!(loose.is_flagged(*flag), "{} flagged only under stricter config", flag);
        }
    }

    #[test]
    fn scope_is_monotonic_in_triggered(evaluated in 1usize..20) {
        let rank = |s: Scope| match s {
            Scope::InstrumentSpecific => 0,
            Scope::Sector => 1,
            Scope::BroadMarket => 2,
        };
        let ranks: Vec<_> = (0..=evaluated).map(|t| rank(Scope::from_votes(t, evaluated))).collect();
        prop_assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(ranks[0], 0);
        prop_assert_eq!(ranks[evaluated], 2);
    }
}
