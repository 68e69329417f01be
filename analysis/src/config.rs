//! Per-symbol analysis configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AnalysisError, AnalysisResult};

/// Analysis parameters for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Fast EMA period of the trend classifier
    #[serde(default = "default_short_period")]
    pub short_period: usize,

    /// Slow EMA period of the trend classifier
    #[serde(default = "default_long_period")]
    pub long_period: usize,

    /// Relative MA separation counted as a trend
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,

    /// Relative MA separation counted as a strong trend
    #[serde(default = "default_strong_trend_threshold")]
    pub strong_trend_threshold: f64,

    /// Number of candles used for volatility and range measurements
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,

    /// Absolute price range below which the market is a tight range.
    /// When absent the threshold is derived from volatility.
    #[serde(default)]
    pub range_threshold: Option<f64>,

    /// Close above which the ATR period shrinks proportionally.
    /// When absent the ATR period is fixed.
    #[serde(default)]
    pub adaptive_volatility_threshold: Option<f64>,
}

fn default_short_period() -> usize {
    10
}

fn default_long_period() -> usize {
    30
}

fn default_trend_threshold() -> f64 {
    0.0005
}

fn default_strong_trend_threshold() -> f64 {
    0.0015
}

fn default_volatility_window() -> usize {
    20
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            short_period: default_short_period(),
            long_period: default_long_period(),
            trend_threshold: default_trend_threshold(),
            strong_trend_threshold: default_strong_trend_threshold(),
            volatility_window: default_volatility_window(),
            range_threshold: None,
            adaptive_volatility_threshold: None,
        }
    }
}

impl SymbolConfig {
    /// Validate internal consistency
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.short_period == 0 || self.short_period >= self.long_period {
            return Err(AnalysisError::ConfigError(format!(
                "short_period ({}) must be positive and below long_period ({})",
                self.short_period, self.long_period
            )));
        }
        if self.trend_threshold <= 0.0 || self.strong_trend_threshold < self.trend_threshold {
            return Err(AnalysisError::ConfigError(format!(
                "thresholds must satisfy 0 < trend ({}) <= strong ({})",
                self.trend_threshold, self.strong_trend_threshold
            )));
        }
        if self.volatility_window < 2 {
            return Err(AnalysisError::ConfigError(
                "volatility_window must be at least 2".to_string(),
            ));
        }
        if let Some(threshold) = self.range_threshold {
            if threshold <= 0.0 {
                return Err(AnalysisError::ConfigError(
                    "range_threshold must be positive".to_string(),
                ));
            }
        }
        if let Some(threshold) = self.adaptive_volatility_threshold {
            if threshold <= 0.0 {
                return Err(AnalysisError::ConfigError(
                    "adaptive_volatility_threshold must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Default configuration plus per-symbol overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfigTable {
    #[serde(default)]
    pub default: SymbolConfig,

    #[serde(default)]
    pub overrides: HashMap<String, SymbolConfig>,
}

impl SymbolConfigTable {
    pub fn new(default: SymbolConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Load the table from YAML
    pub fn from_yaml(yaml: &str) -> AnalysisResult<Self> {
        let table: SymbolConfigTable = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    pub fn with_override(mut self, symbol: impl Into<String>, config: SymbolConfig) -> Self {
        self.overrides.insert(symbol.into(), config);
        self
    }

    /// Configuration for `symbol`, falling back to the default
    pub fn get(&self, symbol: &str) -> &SymbolConfig {
        self.overrides.get(symbol).unwrap_or(&self.default)
    }

    pub fn validate(&self) -> AnalysisResult<()> {
        self.default.validate()?;
        for (symbol, config) in &self.overrides {
            config
                .validate()
                .map_err(|e| AnalysisError::ConfigError(format!("{}: {}", symbol, e)))?;
        }
        Ok(())
    }
}
