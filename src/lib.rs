//! # market-state-detector
//!
//! Stage-1 regime detection for daily OHLC price series.
//!
//! Three independent checks run against the most recent bar of a series:
//! a volatility spike relative to trailing return volatility, an overnight
//! gap against the prior close, and an intraday range that is wide relative
//! to its trailing average. If any of them triggers, the series is classified
//! as Stage-1 ON (elevated uncertainty). An optional benchmark comparison then
//! attributes a positive result to the broad market, a sector, or the
//! instrument itself.
//!
//! ## Quick Start
//!
//! ```rust
//! use market_state_detector::prelude::*;
//!
//! // 24 quiet days followed by a 30% jump
//! let mut bars: Vec<Bar> = (0..24).map(|_| Bar::new(100.0, 101.0, 99.0, 100.0)).collect();
//! bars.push(Bar::new(100.0, 131.0, 99.0, 130.0));
//!
//! let series = PriceSeries::new(bars)?;
//! let result = analyze(&series, None)?;
//!
//! assert!(result.stage_1_detected);
//! assert!(result.flags.contains(&SignalId::VOLATILITY_SPIKE));
//! # Ok::<(), DetectorError>(())
//! ```

pub mod config;
pub mod context;
pub mod signals;

pub mod prelude {
    pub use crate::{
        // Configuration
        config::{ConfigLoader, DetectorConfig, GapConfig, RangeConfig, VolatilityConfig},
        // Market context
        context::{
            BenchmarkFailure, BenchmarkFetcher, BenchmarkVote, ContextClassifier,
            ContextOutcome, FetchError, MarketContext, Scope, DEFAULT_BENCHMARKS,
        },
        // Signals
        signals::*,
        // Entry points
        analyze,
        analyze_parallel,
        analyze_with_context,
        AnalysisResult,
        // Data
        Bar,
        BatchError,
        BatchResult,
        BuiltinSignal,
        // Errors
        DetectorError,
        Direction,
        OHLCVExt,
        Period,
        PriceSeries,
        RegimeDetector,
        Result,
        // Core traits
        Signal,
        SignalDetails,
        SignalId,
        SignalResult,
        Threshold,
        OHLCV,
    };
}

use serde::ser::SerializeMap;
use tracing::{debug, info};

use crate::{config::DetectorConfig, context::ContextClassifier};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, DetectorError>;

/// Errors raised by the detection path.
///
/// Every variant means "cannot classify". `InsufficientData` is the
/// per-signal flavour of a too-short series and names the signal that
/// could not evaluate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectorError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} must be greater than {min}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Series too short: need at least {need} bars, got {got}")]
    SeriesTooShort { need: usize, got: usize },

    #[error("Column {field} has {got} values, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("Degenerate price at index {index}: close must be positive")]
    DegeneratePrice { index: usize },

    #[error("Insufficient data for {signal}: need {need} bars, got {got}")]
    InsufficientData {
        signal: SignalId,
        need: usize,
        got: usize,
    },
}

impl DetectorError {
    /// True when a specific signal lacked the history it needs.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, DetectorError::InsufficientData { .. })
    }

    /// The signal that raised this error, if any.
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            DetectorError::InsufficientData { signal, .. } => Some(*signal),
            _ => None,
        }
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Strictly positive, finite threshold value
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f64);

impl Threshold {
    /// Create a new Threshold, validating the value is finite and > 0
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(DetectorError::InvalidValue(
                "Threshold cannot be NaN or infinite",
            ));
        }
        if value <= 0.0 {
            return Err(DetectorError::OutOfRange {
                field: "Threshold",
                value,
                min: 0.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Threshold from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Threshold {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Threshold {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Threshold::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period in bars (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(DetectorError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLC TRAITS
// ============================================================

/// Core daily bar trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
}

/// Extension trait with computed properties for bar data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// High-low range as a percentage of close. Returns None if close <= 0
    #[inline]
    fn range_pct(&self) -> Option<f64> {
        let close = self.close();
        (close > 0.0).then(|| self.range() / close * 100.0)
    }

    /// Validate bar consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(DetectorError::InvalidBar {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(DetectorError::InvalidBar {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if values.iter().any(|v| *v < 0.0) {
            return Err(DetectorError::InvalidBar {
                index: 0,
                reason: "negative price",
            });
        }
        if self.high() < self.low() {
            return Err(DetectorError::InvalidBar {
                index: 0,
                reason: "high < low",
            });
        }
        if self.open() < self.low() || self.open() > self.high() {
            return Err(DetectorError::InvalidBar {
                index: 0,
                reason: "open outside [low, high]",
            });
        }
        if self.close() < self.low() || self.close() > self.high() {
            return Err(DetectorError::InvalidBar {
                index: 0,
                reason: "close outside [low, high]",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// PRICE SERIES
// ============================================================

/// One daily bar
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub const fn new(open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
        }
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }
}

/// Ordered daily bars, oldest first.
///
/// Every bar is validated on construction, so a `PriceSeries` in hand is
/// always internally consistent. Length requirements are checked later by
/// the detector, which knows the configured minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                DetectorError::InvalidBar { reason, .. } => {
                    DetectorError::InvalidBar { index: i, reason }
                }
                other => other,
            })?;
        }
        Ok(Self { bars })
    }

    /// Build a series from four parallel columns. All columns must have the
    /// same length as `closes`.
    pub fn from_columns(
        opens: &[f64],
        highs: &[f64],
        lows: &[f64],
        closes: &[f64],
    ) -> Result<Self> {
        let expected = closes.len();
        for (field, column) in [("open", opens), ("high", highs), ("low", lows)] {
            if column.len() != expected {
                return Err(DetectorError::LengthMismatch {
                    field,
                    expected,
                    got: column.len(),
                });
            }
        }

        let bars = (0..expected)
            .map(|i| Bar::new(opens[i], highs[i], lows[i], closes[i]))
            .collect();
        Self::new(bars)
    }

    #[inline]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    #[inline]
    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }

    /// The most recent `n` bars (the whole series if shorter)
    pub fn tail(&self, n: usize) -> PriceSeries {
        let start = self.bars.len().saturating_sub(n);
        PriceSeries {
            bars: self.bars[start..].to_vec(),
        }
    }
}

impl serde::Serialize for PriceSeries {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.bars.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for PriceSeries {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let bars = Vec::<Bar>::deserialize(d)?;
        PriceSeries::new(bars).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// SIGNAL RESULT
// ============================================================

/// Unique identifier for a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub &'static str);

impl SignalId {
    pub const VOLATILITY_SPIKE: SignalId = SignalId("volatility_spike");
    pub const GAP: SignalId = SignalId("gap");
    pub const WIDE_RANGE: SignalId = SignalId("wide_range");

    /// Returns the string identifier
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Human-readable label, e.g. "VOLATILITY SPIKE"
    pub fn label(&self) -> String {
        self.0.to_ascii_uppercase().replace('_', " ")
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl serde::Serialize for SignalId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.0)
    }
}

/// Direction of an overnight move
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Flat,
    Down,
}

impl Direction {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Up
        } else if delta < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }
}

/// Diagnostic facts a signal reports alongside its verdict
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SignalDetails {
    Volatility(signals::VolatilityDetails),
    Gap(signals::GapDetails),
    Range(signals::RangeDetails),
}

/// Outcome of one signal evaluation
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SignalResult {
    #[serde(skip_serializing)]
    pub signal: SignalId,
    pub detected: bool,
    pub details: SignalDetails,
}

// ============================================================
// SIGNAL TRAIT
// ============================================================

/// A single detector evaluated against the most recent bar of a series
pub trait Signal: Send + Sync {
    fn id(&self) -> SignalId;
    /// Bars required before the signal can evaluate
    fn min_bars(&self) -> usize;
    fn evaluate<T: OHLCV>(&self, bars: &[T]) -> Result<SignalResult>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

use signals::*;

/// Macro to generate BuiltinSignal enum without boilerplate
macro_rules! define_builtin_signals {
    (
        $(
            $variant:ident($signal:ty)
        ),* $(,)?
    ) => {
        /// All builtin signals - enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinSignal {
            $($variant($signal)),*
        }

        impl BuiltinSignal {
            #[inline]
            pub fn evaluate<T: OHLCV>(&self, bars: &[T]) -> Result<SignalResult> {
                match self {
                    $(Self::$variant(s) => Signal::evaluate(s, bars)),*
                }
            }

            #[inline]
            pub fn id(&self) -> SignalId {
                match self {
                    $(Self::$variant(s) => Signal::id(s)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(s) => Signal::min_bars(s)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(s) => Signal::validate_config(s)),*
                }
            }
        }
    };
}

define_builtin_signals! {
    Volatility(VolatilitySignal),
    Gap(GapSignal),
    Range(RangeSignal),
}

// ============================================================
// ANALYSIS RESULT
// ============================================================

const SUMMARY_ON_PREFIX: &str = "HIGH UNCERTAINTY DETECTED - Stage 1 regime likely.";
const SUMMARY_ON_SUFFIX: &str = "Consider avoiding new positions until conditions stabilize.";
const SUMMARY_OFF: &str =
    "No Stage 1 signals detected. Market behavior appears within normal parameters.";

/// Aggregate classification of one series
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AnalysisResult {
    pub stage_1_detected: bool,
    /// Per-signal results in evaluation order
    #[serde(serialize_with = "serialize_signals")]
    pub signals: Vec<SignalResult>,
    /// Triggered signals in evaluation order
    pub flags: Vec<SignalId>,
    pub summary: String,
    /// Benchmark attribution; only present for a Stage-1 ON result when a
    /// classifier was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_context: Option<context::ContextOutcome>,
}

impl AnalysisResult {
    pub fn signal(&self, id: SignalId) -> Option<&SignalResult> {
        self.signals.iter().find(|r| r.signal == id)
    }

    pub fn is_flagged(&self, id: SignalId) -> bool {
        self.flags.contains(&id)
    }

    /// Process exit status for this classification: 0 = OFF, 1 = ON
    pub fn exit_code(&self) -> u8 {
        u8::from(self.stage_1_detected)
    }
}

fn serialize_signals<S: serde::Serializer>(
    signals: &[SignalResult],
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = s.serialize_map(Some(signals.len()))?;
    for result in signals {
        map.serialize_entry(result.signal.as_str(), result)?;
    }
    map.end()
}

fn summarize(flags: &[SignalId]) -> String {
    if flags.is_empty() {
        return SUMMARY_OFF.to_string();
    }
    let names: Vec<&str> = flags.iter().map(|f| f.as_str()).collect();
    format!(
        "{SUMMARY_ON_PREFIX} Signals: {}. {SUMMARY_ON_SUFFIX}",
        names.join(", ")
    )
}

// ============================================================
// REGIME DETECTOR
// ============================================================

/// Runs the three signals against a series and combines their verdicts.
///
/// Holds only the immutable configuration, so one detector can be shared
/// across threads and reused for any number of series.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    config: DetectorConfig,
    signals: [BuiltinSignal; 3],
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::from_validated(DetectorConfig::default())
    }
}

impl RegimeDetector {
    /// Create a detector, validating the configuration first
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let detector = Self::from_validated(config);
        for signal in &detector.signals {
            signal.validate_config()?;
        }
        Ok(detector)
    }

    fn from_validated(config: DetectorConfig) -> Self {
        // Evaluation order is fixed; it determines the order of `signals` and `flags`.
        let signals = [
            BuiltinSignal::Volatility(VolatilitySignal::from_config(&config.volatility)),
            BuiltinSignal::Gap(GapSignal::from_config(&config.gaps)),
            BuiltinSignal::Range(RangeSignal::from_config(&config.ranges)),
        ];
        Self { config, signals }
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[inline]
    pub fn signals(&self) -> &[BuiltinSignal] {
        &self.signals
    }

    /// Classify a series. Fails before any signal runs if the series is too
    /// short or carries a non-positive close.
    pub fn analyze(&self, series: &PriceSeries) -> Result<AnalysisResult> {
        let bars = series.bars();
        self.prevalidate(bars)?;

        let mut signals = Vec::with_capacity(self.signals.len());
        let mut flags = Vec::new();

        for signal in &self.signals {
            let result = signal.evaluate(bars)?;
            debug!(signal = %result.signal, detected = result.detected, "signal evaluated");
            if result.detected {
                flags.push(result.signal);
            }
            signals.push(result);
        }

        let stage_1_detected = !flags.is_empty();
        let summary = summarize(&flags);
        info!(stage_1_detected, flagged = flags.len(), bars = bars.len(), "analysis complete");

        Ok(AnalysisResult {
            stage_1_detected,
            signals,
            flags,
            summary,
            market_context: None,
        })
    }

    /// Classify a series and, when it is Stage-1 ON and a classifier is
    /// supplied, attribute the detection against the classifier's benchmarks.
    ///
    /// Benchmark failures never fail this call; they surface inside
    /// `market_context` instead.
    pub fn analyze_with_context(
        &self,
        series: &PriceSeries,
        classifier: Option<&ContextClassifier>,
    ) -> Result<AnalysisResult> {
        let mut result = self.analyze(series)?;
        if let (true, Some(classifier)) = (result.stage_1_detected, classifier) {
            result.market_context = Some(classifier.classify(self, series.len()));
        }
        Ok(result)
    }

    fn prevalidate(&self, bars: &[Bar]) -> Result<()> {
        let need = self.config.min_data_points.get();
        if bars.len() < need {
            return Err(DetectorError::SeriesTooShort {
                need,
                got: bars.len(),
            });
        }
        if let Some(index) = bars.iter().position(|b| b.close <= 0.0) {
            return Err(DetectorError::DegeneratePrice { index });
        }
        for signal in &self.signals {
            if bars.len() < signal.min_bars() {
                return Err(DetectorError::InsufficientData {
                    signal: signal.id(),
                    need: signal.min_bars(),
                    got: bars.len(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================
// ENTRY POINTS
// ============================================================

fn detector_for(config: Option<&DetectorConfig>) -> Result<RegimeDetector> {
    match config {
        Some(config) => RegimeDetector::new(config.clone()),
        None => Ok(RegimeDetector::default()),
    }
}

/// Classify a series with the given configuration (defaults if None)
pub fn analyze(series: &PriceSeries, config: Option<&DetectorConfig>) -> Result<AnalysisResult> {
    detector_for(config)?.analyze(series)
}

/// Classify a series and attribute a Stage-1 ON result against benchmarks
pub fn analyze_with_context(
    series: &PriceSeries,
    config: Option<&DetectorConfig>,
    classifier: Option<&ContextClassifier>,
) -> Result<AnalysisResult> {
    detector_for(config)?.analyze_with_context(series, classifier)
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

use rayon::prelude::*;

/// Result of analyzing a single instrument
#[derive(Debug)]
pub struct BatchResult {
    pub symbol: String,
    pub result: AnalysisResult,
}

/// Error from analyzing a single instrument
#[derive(Debug)]
pub struct BatchError {
    pub symbol: String,
    pub error: DetectorError,
}

/// Parallel analysis of multiple instruments
pub fn analyze_parallel<'a, I>(
    detector: &RegimeDetector,
    instruments: I,
) -> (Vec<BatchResult>, Vec<BatchError>)
where
    I: IntoParallelIterator<Item = (&'a str, &'a PriceSeries)>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, series)| {
            detector
                .analyze(series)
                .map(|result| BatchResult {
                    symbol: symbol.to_string(),
                    result,
                })
                .map_err(|error| BatchError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TESTS
// ============================================================
