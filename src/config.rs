//! Detector configuration
//!
//! A [`DetectorConfig`] is an immutable bundle of thresholds and lookback
//! lengths. Every field has a default; partial documents fill the rest from
//! defaults and unknown fields are rejected.
//!
//! # Example
//!
//! ```rust
//! use market_state_detector::config::ConfigLoader;
//!
//! let config = ConfigLoader::from_toml_str(
//!   r#"
//!   min_data_points = 30
//!
//!   [volatility]
//!   threshold_multiplier = 2.5
//!   "#,
//! )?;
//! assert_eq!(config.volatility.threshold_multiplier.get(), 2.5);
//! assert_eq!(config.volatility.lookback_period.get(), 20);
//! assert_eq!(config.min_data_points.get(), 30);
//! # Ok::<(), market_state_detector::DetectorError>(())
//! ```

use std::path::{Path, PathBuf};

use figment::{
  providers::{Env, Format, Json, Serialized, Toml},
  Figment,
};
use serde::{Deserialize, Serialize};

use crate::{signals::helpers::MIN_STD_DEV_SAMPLE, DetectorError, Period, Result, Threshold};

/// Prefix for environment overrides, e.g. `MSD_VOLATILITY__LOOKBACK_PERIOD=15`
pub const ENV_PREFIX: &str = "MSD_";

// ============================================================
// SECTIONS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolatilityConfig {
  /// Trigger multiple of the trailing return std-dev
  pub threshold_multiplier: Threshold,
  /// Trailing window length in days
  pub lookback_period: Period,
}

impl Default for VolatilityConfig {
  fn default() -> Self {
    Self { threshold_multiplier: Threshold::new_const(2.0), lookback_period: Period::new_const(20) }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GapConfig {
  /// Minimum |open - prior close| / prior close * 100 to trigger
  pub threshold_percent: Threshold,
}

impl Default for GapConfig {
  fn default() -> Self {
    Self { threshold_percent: Threshold::new_const(2.0) }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeConfig {
  /// How far the latest range may exceed the trailing average, in percent
  pub threshold_percent: Threshold,
  pub lookback_period: Period,
}

impl Default for RangeConfig {
  fn default() -> Self {
    Self { threshold_percent: Threshold::new_const(50.0), lookback_period: Period::new_const(20) }
  }
}

// ============================================================
// DETECTOR CONFIG
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
  pub volatility: VolatilityConfig,
  pub gaps: GapConfig,
  pub ranges: RangeConfig,
  /// Shortest series accepted for analysis
  pub min_data_points: Period,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      volatility: VolatilityConfig::default(),
      gaps: GapConfig::default(),
      ranges: RangeConfig::default(),
      min_data_points: Period::new_const(21),
    }
  }
}

impl DetectorConfig {
  /// Cross-field rules the scalar types cannot express on their own
  pub fn validate(&self) -> Result<()> {
    if self.volatility.lookback_period.get() < MIN_STD_DEV_SAMPLE {
      return Err(DetectorError::InvalidConfig(format!(
        "volatility.lookback_period must be at least {MIN_STD_DEV_SAMPLE}, got {}",
        self.volatility.lookback_period.get()
      )));
    }
    if self.min_data_points.get() < 2 {
      return Err(DetectorError::InvalidConfig(format!(
        "min_data_points must be at least 2, got {}",
        self.min_data_points.get()
      )));
    }
    Ok(())
  }

  /// Preset overrides for instruments known to run hotter than the defaults
  pub fn symbol_preset(symbol: &str) -> Option<Self> {
    match symbol.trim().to_ascii_uppercase().as_str() {
      "TSM" => Some(Self {
        volatility: VolatilityConfig {
          threshold_multiplier: Threshold::new_const(3.0),
          lookback_period: Period::new_const(15),
        },
        gaps: GapConfig { threshold_percent: Threshold::new_const(3.0) },
        ranges: RangeConfig {
          threshold_percent: Threshold::new_const(70.0),
          lookback_period: Period::new_const(15),
        },
        ..Self::default()
      }),
      _ => None,
    }
  }

  /// Defaults with the symbol's preset applied, if one exists
  pub fn for_symbol(symbol: &str) -> Self {
    Self::symbol_preset(symbol).unwrap_or_default()
  }
}

// ============================================================
// LOADER
// ============================================================

/// Layered configuration loader.
///
/// Layers, lowest precedence first: defaults, symbol preset, config file
/// (`.json` by extension, TOML otherwise), environment variables.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
  symbol: Option<String>,
  file: Option<PathBuf>,
  env_prefix: Option<String>,
}

impl Default for ConfigLoader {
  fn default() -> Self {
    Self::new()
  }
}

impl ConfigLoader {
  pub fn new() -> Self {
    Self { symbol: None, file: None, env_prefix: Some(ENV_PREFIX.to_string()) }
  }

  pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
    self.symbol = Some(symbol.into());
    self
  }

  pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
    self.file = Some(path.into());
    self
  }

  /// Override the environment prefix; `None` disables environment overrides
  pub fn env_prefix(mut self, prefix: Option<&str>) -> Self {
    self.env_prefix = prefix.map(str::to_string);
    self
  }

  /// The merged provider stack, before extraction
  pub fn figment(&self) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(DetectorConfig::default()));

    if let Some(preset) = self.symbol.as_deref().and_then(DetectorConfig::symbol_preset) {
      figment = figment.merge(Serialized::defaults(preset));
    }

    if let Some(path) = &self.file {
      if !path.is_file() {
        return Err(DetectorError::InvalidConfig(format!(
          "config file not found: {}",
          path.display()
        )));
      }
      figment = if is_json(path) {
        figment.merge(Json::file_exact(path))
      } else {
        figment.merge(Toml::file_exact(path))
      };
    }

    if let Some(prefix) = &self.env_prefix {
      figment = figment.merge(Env::prefixed(prefix).split("__"));
    }

    Ok(figment)
  }

  pub fn load(&self) -> Result<DetectorConfig> {
    extract(self.figment()?)
  }

  /// Parse a TOML document over the defaults
  pub fn from_toml_str(toml: &str) -> Result<DetectorConfig> {
    extract(Figment::from(Serialized::defaults(DetectorConfig::default())).merge(Toml::string(toml)))
  }

  /// Parse a JSON document over the defaults
  pub fn from_json_str(json: &str) -> Result<DetectorConfig> {
    extract(Figment::from(Serialized::defaults(DetectorConfig::default())).merge(Json::string(json)))
  }
}

fn is_json(path: &Path) -> bool {
  path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn extract(figment: Figment) -> Result<DetectorConfig> {
  let config: DetectorConfig =
    figment.extract().map_err(|e| DetectorError::InvalidConfig(e.to_string()))?;
  config.validate()?;
  Ok(config)
}

// ============================================================
// TESTS
// ============================================================
