//! Market context classification
//!
//! When a series is Stage-1 ON, the same detector is run against a set of
//! broad-market benchmarks. How many of them are also ON decides whether the
//! event looks market-wide, partial (sector), or local to the instrument.
//!
//! Benchmark data comes from an injected [`BenchmarkFetcher`]. Fetches run
//! concurrently on the rayon pool and a failed fetch only removes that
//! benchmark from the vote.

use std::fmt;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{AnalysisResult, DetectorError, PriceSeries, RegimeDetector, SignalId};

/// Broad-market proxies: S&P 500, Nasdaq-100, Dow Jones Industrial Average
pub const DEFAULT_BENCHMARKS: [&str; 3] = ["SPY", "QQQ", "DIA"];

// ============================================================
// FETCHER
// ============================================================

/// Failure to obtain a benchmark series
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("benchmark {0} is not available")]
    NotFound(String),

    #[error("benchmark source failed: {0}")]
    Source(String),

    #[error(transparent)]
    Data(#[from] DetectorError),
}

/// Supplies daily series for benchmark identifiers.
///
/// `bars` is the requested lookback length, matching the analyzed series.
/// Timeouts and retries are the implementor's business; the classifier
/// treats every error the same way.
pub trait BenchmarkFetcher: Send + Sync {
    fn fetch(&self, benchmark: &str, bars: usize) -> Result<PriceSeries, FetchError>;
}

impl<F> BenchmarkFetcher for F
where
    F: Fn(&str, usize) -> Result<PriceSeries, FetchError> + Send + Sync,
{
    fn fetch(&self, benchmark: &str, bars: usize) -> Result<PriceSeries, FetchError> {
        self(benchmark, bars)
    }
}

// ============================================================
// SCOPE
// ============================================================

/// Attribution of a Stage-1 detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// A strict majority of benchmarks are also ON
    BroadMarket,
    /// Some benchmarks are ON, but not a strict majority (exact ties land here)
    Sector,
    /// No benchmark is ON
    InstrumentSpecific,
}

impl Scope {
    /// Vote rule over successfully evaluated benchmarks.
    ///
    /// `evaluated` counts only benchmarks that were fetched and analyzed.
    pub fn from_votes(triggered: usize, evaluated: usize) -> Self {
        if triggered == 0 {
            Scope::InstrumentSpecific
        } else if triggered * 2 > evaluated {
            Scope::BroadMarket
        } else {
            Scope::Sector
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::BroadMarket => "broad_market",
            Scope::Sector => "sector",
            Scope::InstrumentSpecific => "instrument_specific",
        }
    }

    /// One-line reading of what the scope implies
    pub fn advice(&self) -> &'static str {
        match self {
            Scope::BroadMarket => {
                "This appears to be a market-wide event affecting multiple indices."
            }
            Scope::Sector => "This appears to be sector-specific or partial volatility.",
            Scope::InstrumentSpecific => {
                "This appears to be isolated to this instrument (higher individual risk)."
            }
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// CONTEXT
// ============================================================

/// How one benchmark voted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkVote {
    pub benchmark: String,
    pub stage_1_detected: bool,
    pub flags: Vec<SignalId>,
}

/// A benchmark excluded from the vote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkFailure {
    pub benchmark: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketContext {
    pub scope: Scope,
    /// Benchmarks that are also Stage-1 ON
    pub triggered: usize,
    /// Benchmarks that were fetched and analyzed
    pub evaluated: usize,
    /// Votes in request order
    pub votes: Vec<BenchmarkVote>,
    pub failures: Vec<BenchmarkFailure>,
    /// triggered / evaluated
    pub correlation_score: f64,
    pub explanation: String,
}

impl MarketContext {
    /// Names of the benchmarks that are also ON, in request order
    pub fn affected(&self) -> impl Iterator<Item = &str> {
        self.votes
            .iter()
            .filter(|v| v.stage_1_detected)
            .map(|v| v.benchmark.as_str())
    }

    /// A benchmark's vote, None if it was not evaluated
    pub fn vote(&self, benchmark: &str) -> Option<bool> {
        self.votes
            .iter()
            .find(|v| v.benchmark == benchmark)
            .map(|v| v.stage_1_detected)
    }
}

impl fmt::Display for MarketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Market context: {}", self.explanation)?;
        write!(f, "{}", self.scope.advice())
    }
}

fn explain(scope: Scope, triggered: usize, evaluated: usize, affected: &[&str]) -> String {
    match scope {
        Scope::BroadMarket => format!(
            "Broad market volatility: {triggered} of {evaluated} benchmarks also in Stage 1 ({})",
            affected.join(", ")
        ),
        Scope::Sector => format!(
            "Sector or partial volatility: {triggered} of {evaluated} benchmarks also in Stage 1 ({})",
            affected.join(", ")
        ),
        Scope::InstrumentSpecific => {
            format!("Instrument-specific volatility: none of {evaluated} benchmarks in Stage 1")
        }
    }
}

/// Result of a context request: a classification, or why there is none
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextOutcome {
    Classified(MarketContext),
    Unavailable {
        reason: String,
        failures: Vec<BenchmarkFailure>,
    },
}

impl ContextOutcome {
    pub fn context(&self) -> Option<&MarketContext> {
        match self {
            ContextOutcome::Classified(ctx) => Some(ctx),
            ContextOutcome::Unavailable { .. } => None,
        }
    }

    pub fn scope(&self) -> Option<Scope> {
        self.context().map(|ctx| ctx.scope)
    }
}

// ============================================================
// CLASSIFIER
// ============================================================

/// Attributes a Stage-1 detection using benchmark co-occurrence
pub struct ContextClassifier {
    fetcher: Box<dyn BenchmarkFetcher>,
    benchmarks: Vec<String>,
}

impl fmt::Debug for ContextClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextClassifier")
            .field("benchmarks", &self.benchmarks)
            .finish_non_exhaustive()
    }
}

impl ContextClassifier {
    /// Classifier over [`DEFAULT_BENCHMARKS`]
    pub fn new(fetcher: impl BenchmarkFetcher + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            benchmarks: DEFAULT_BENCHMARKS.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn with_benchmarks<I, S>(mut self, benchmarks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.benchmarks = benchmarks.into_iter().map(Into::into).collect();
        self
    }

    pub fn benchmarks(&self) -> &[String] {
        &self.benchmarks
    }

    /// Run `detector` over every benchmark and vote.
    ///
    /// Never fails: if no benchmark could be evaluated the outcome is
    /// `Unavailable` with the collected failures.
    pub fn classify(&self, detector: &RegimeDetector, bars: usize) -> ContextOutcome {
        if self.benchmarks.is_empty() {
            return ContextOutcome::Unavailable {
                reason: "no benchmarks configured".to_string(),
                failures: Vec::new(),
            };
        }

        let outcomes: Vec<(&String, Result<AnalysisResult, FetchError>)> = self
            .benchmarks
            .par_iter()
            .map(|benchmark| (benchmark, self.evaluate(detector, benchmark, bars)))
            .collect();

        let mut votes = Vec::new();
        let mut failures = Vec::new();
        for (benchmark, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    debug!(%benchmark, stage_1_detected = result.stage_1_detected, "benchmark evaluated");
                    votes.push(BenchmarkVote {
                        benchmark: benchmark.clone(),
                        stage_1_detected: result.stage_1_detected,
                        flags: result.flags,
                    });
                }
                Err(error) => {
                    warn!(%benchmark, %error, "benchmark excluded from context vote");
                    failures.push(BenchmarkFailure {
                        benchmark: benchmark.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        if votes.is_empty() {
            return ContextOutcome::Unavailable {
                reason: format!("no benchmark could be evaluated ({} failed)", failures.len()),
                failures,
            };
        }

        let evaluated = votes.len();
        let affected: Vec<&str> = votes
            .iter()
            .filter(|v| v.stage_1_detected)
            .map(|v| v.benchmark.as_str())
            .collect();
        let triggered = affected.len();
        let scope = Scope::from_votes(triggered, evaluated);
        let explanation = explain(scope, triggered, evaluated, &affected);

        ContextOutcome::Classified(MarketContext {
            scope,
            triggered,
            evaluated,
            votes,
            failures,
            correlation_score: triggered as f64 / evaluated as f64,
            explanation,
        })
    }

    fn evaluate(
        &self,
        detector: &RegimeDetector,
        benchmark: &str,
        bars: usize,
    ) -> Result<AnalysisResult, FetchError> {
        let series = self.fetcher.fetch(benchmark, bars)?;
        // Align on the most recent bars if the source returned extra history
        let series = if series.len() > bars {
            series.tail(bars)
        } else {
            series
        };
        Ok(detector.analyze(&series)?)
    }
}
