//! Integration tests for benchmark-based market context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use market_state_detector::prelude::*;

type FetchResult = std::result::Result<PriceSeries, FetchError>;

/// 24 calm days, then a 30% jump
fn spiking(n: usize) -> PriceSeries {
    let mut bars: Vec<Bar> = (0..n - 1)
        .map(|_| Bar::new(100.0, 101.0, 99.0, 100.0))
        .collect();
    bars.push(Bar::new(100.0, 131.0, 99.0, 130.0));
    PriceSeries::new(bars).unwrap()
}

fn calm(n: usize) -> PriceSeries {
    PriceSeries::new(vec![Bar::new(100.0, 101.0, 99.0, 100.0); n]).unwrap()
}

/// In-memory benchmark source: ON benchmarks spike, OFF ones stay calm,
/// missing ones fail.
struct MapFetcher {
    states: HashMap<String, bool>,
    calls: Arc<AtomicUsize>,
}

impl MapFetcher {
    fn new(states: &[(&str, bool)]) -> Self {
        Self {
            states: states.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BenchmarkFetcher for MapFetcher {
    fn fetch(&self, benchmark: &str, bars: usize) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.states.get(benchmark) {
            Some(true) => Ok(spiking(bars)),
            Some(false) => Ok(calm(bars)),
            None => Err(FetchError::NotFound(benchmark.to_string())),
        }
    }
}

fn classify(states: &[(&str, bool)], benchmarks: &[&str]) -> ContextOutcome {
    let classifier = ContextClassifier::new(MapFetcher::new(states))
        .with_benchmarks(benchmarks.iter().copied());
    let result = RegimeDetector::default()
        .analyze_with_context(&spiking(25), Some(&classifier))
        .unwrap();
    result.market_context.expect("ON result with classifier carries context")
}

// ============================================================
// VOTING
// ============================================================

#[test]
fn test_no_benchmarks_on_is_instrument_specific() {
    let outcome = classify(
        &[("SPY", false), ("QQQ", false), ("DIA", false)],
        &DEFAULT_BENCHMARKS,
    );
    let ctx = outcome.context().unwrap();
    assert_eq!(ctx.scope, Scope::InstrumentSpecific);
    assert_eq!(ctx.triggered, 0);
    assert_eq!(ctx.evaluated, 3);
    assert_eq!(ctx.correlation_score, 0.0);
    assert_eq!(
        ctx.explanation,
        "Instrument-specific volatility: none of 3 benchmarks in Stage 1"
    );
}

#[test]
fn test_minority_on_is_sector() {
    let outcome = classify(
        &[("SPY", false), ("QQQ", true), ("DIA", false)],
        &DEFAULT_BENCHMARKS,
    );
    let ctx = outcome.context().unwrap();
    assert_eq!(ctx.scope, Scope::Sector);
    assert_eq!(ctx.affected().collect::<Vec<_>>(), vec!["QQQ"]);
    assert_eq!(ctx.vote("QQQ"), Some(true));
    assert_eq!(ctx.vote("SPY"), Some(false));
}

#[test]
fn test_majority_on_is_broad_market() {
    let outcome = classify(
        &[("SPY", true), ("QQQ", true), ("DIA", false)],
        &DEFAULT_BENCHMARKS,
    );
    let ctx = outcome.context().unwrap();
    assert_eq!(ctx.scope, Scope::BroadMarket);
    assert_eq!(
        ctx.explanation,
        "Broad market volatility: 2 of 3 benchmarks also in Stage 1 (SPY, QQQ)"
    );
    assert!((ctx.correlation_score - 2.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_scope_is_monotonic_in_votes() {
    let rank = |s: Scope| match s {
        Scope::InstrumentSpecific => 0,
        Scope::Sector => 1,
        Scope::BroadMarket => 2,
    };
    let ladder = [
        [("SPY", false), ("QQQ", false), ("DIA", false)],
        [("SPY", true), ("QQQ", false), ("DIA", false)],
        [("SPY", true), ("QQQ", true), ("DIA", false)],
        [("SPY", true), ("QQQ", true), ("DIA", true)],
    ];
    let ranks: Vec<_> = ladder
        .iter()
        .map(|states| rank(classify(states, &DEFAULT_BENCHMARKS).scope().unwrap()))
        .collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
}

#[test]
fn test_exact_half_is_sector() {
    let outcome = classify(
        &[("SPY", true), ("QQQ", true), ("DIA", false), ("IWM", false)],
        &["SPY", "QQQ", "DIA", "IWM"],
    );
    assert_eq!(outcome.scope(), Some(Scope::Sector));
}

// ============================================================
// FAILURES
// ============================================================

#[test]
fn test_failed_fetch_is_excluded_from_vote() {
    // DIA is unknown to the fetcher: 1 of 2 evaluated is a tie
    let outcome = classify(&[("SPY", true), ("QQQ", false)], &DEFAULT_BENCHMARKS);
    let ctx = outcome.context().unwrap();
    assert_eq!(ctx.evaluated, 2);
    assert_eq!(ctx.scope, Scope::Sector);
    assert_eq!(ctx.vote("DIA"), None);
    assert_eq!(ctx.failures.len(), 1);
    assert_eq!(ctx.failures[0].benchmark, "DIA");
}

#[test]
fn test_all_fetches_failed_is_unavailable() {
    let outcome = classify(&[], &DEFAULT_BENCHMARKS);
    match outcome {
        ContextOutcome::Unavailable { reason, failures } => {
            assert_eq!(reason, "no benchmark could be evaluated (3 failed)");
            assert_eq!(failures.len(), 3);
        }
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn test_primary_result_survives_context_failure() {
    let classifier = ContextClassifier::new(|b: &str, _: usize| -> FetchResult {
        Err(FetchError::Source(format!("timeout fetching {b}")))
    });
    let result = RegimeDetector::default()
        .analyze_with_context(&spiking(25), Some(&classifier))
        .unwrap();

    assert!(result.stage_1_detected);
    assert!(result.is_flagged(SignalId::VOLATILITY_SPIKE));
    assert!(matches!(
        result.market_context,
        Some(ContextOutcome::Unavailable { .. })
    ));
}

#[test]
fn test_short_benchmark_history_is_a_failure() {
    let classifier = ContextClassifier::new(|b: &str, _: usize| -> FetchResult {
        if b == "SPY" {
            Ok(calm(5))
        } else {
            Ok(spiking(25))
        }
    });
    let outcome = RegimeDetector::default()
        .analyze_with_context(&spiking(25), Some(&classifier))
        .unwrap()
        .market_context
        .unwrap();

    let ctx = outcome.context().unwrap();
    assert_eq!(ctx.evaluated, 2);
    assert_eq!(ctx.scope, Scope::BroadMarket);
    assert_eq!(ctx.failures[0].benchmark, "SPY");
}

#[test]
fn test_all_benchmarks_too_short_is_unavailable() {
    let classifier = ContextClassifier::new(|_: &str, _: usize| -> FetchResult { Ok(calm(5)) });
    let outcome = RegimeDetector::default()
        .analyze_with_context(&spiking(25), Some(&classifier))
        .unwrap()
        .market_context
        .unwrap();

    match outcome {
        ContextOutcome::Unavailable { reason, failures } => {
            assert_eq!(reason, "no benchmark could be evaluated (3 failed)");
            assert!(failures.iter().all(|f| f.error.contains("Series too short")));
        }
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn test_longer_benchmark_history_is_trimmed() {
    // The spike sits just before the requested window once trimmed
    let classifier = ContextClassifier::new(|_: &str, bars: usize| -> FetchResult {
        let mut all: Vec<Bar> = spiking(bars).bars().to_vec();
        all.extend(std::iter::repeat(Bar::new(130.0, 131.0, 129.0, 130.0)).take(bars));
        Ok(PriceSeries::new(all)?)
    })
    .with_benchmarks(["SPY"]);

    let outcome = RegimeDetector::default()
        .analyze_with_context(&spiking(25), Some(&classifier))
        .unwrap()
        .market_context
        .unwrap();
    assert_eq!(outcome.scope(), Some(Scope::InstrumentSpecific));
}

// ============================================================
// WHEN CONTEXT RUNS
// ============================================================

#[test]
fn test_off_result_skips_benchmarks() {
    let fetcher = MapFetcher::new(&[("SPY", true), ("QQQ", true), ("DIA", true)]);
    let calls = Arc::clone(&fetcher.calls);
    let classifier = ContextClassifier::new(fetcher);

    let result = RegimeDetector::default()
        .analyze_with_context(&calm(25), Some(&classifier))
        .unwrap();
    assert!(!result.stage_1_detected);
    assert!(result.market_context.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_no_classifier_means_no_context() {
    let result = analyze_with_context(&spiking(25), None, None).unwrap();
    assert!(result.stage_1_detected);
    assert!(result.market_context.is_none());
}

#[test]
fn test_each_benchmark_fetched_once() {
    let fetcher = MapFetcher::new(&[("SPY", true), ("QQQ", false), ("DIA", false)]);
    let calls = Arc::clone(&fetcher.calls);
    let classifier = ContextClassifier::new(fetcher);

    analyze_with_context(&spiking(25), None, Some(&classifier)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ============================================================
// PRESENTATION
// ============================================================

#[test]
fn test_context_display_includes_advice() {
    let outcome = classify(
        &[("SPY", true), ("QQQ", true), ("DIA", true)],
        &DEFAULT_BENCHMARKS,
    );
    let text = outcome.context().unwrap().to_string();
    assert!(text.starts_with("Market context: Broad market volatility: 3 of 3"));
    assert!(text.ends_with(Scope::BroadMarket.advice()));
}

#[test]
fn test_context_json_shape() {
    let classifier = ContextClassifier::new(MapFetcher::new(&[
        ("SPY", true),
        ("QQQ", false),
        ("DIA", false),
    ]));
    let result = analyze_with_context(&spiking(25), None, Some(&classifier)).unwrap();

    let json = serde_json::to_value(&result).unwrap();
    let ctx = &json["market_context"];
    assert_eq!(ctx["status"], "classified");
    assert_eq!(ctx["scope"], "sector");
    assert_eq!(ctx["triggered"], 1);
    assert_eq!(ctx["votes"][0]["benchmark"], "SPY");
    assert_eq!(ctx["votes"][0]["flags"][0], "volatility_spike");
}
