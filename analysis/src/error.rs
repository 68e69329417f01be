//! Error types for the analysis engine

use thiserror::Error;

/// Main error type for analysis operations
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Price value that cannot be used (non-finite or non-positive)
    #[error("Invalid price for {symbol}: {value}")]
    InvalidPrice {
        symbol: String,
        value: f64,
    },

    /// Timestamp that cannot be mapped to a minute bucket
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl AnalysisError {
    /// Whether the error only affects the current cycle for one symbol
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidPrice { .. } | AnalysisError::InvalidTimestamp(_)
        )
    }
}

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;
