//! Feed configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::error::{FeedError, FeedResult};

/// Public Deriv endpoint with the demo application id
pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3?app_id=1089";

/// Market-data session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Tracked symbols
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Candles requested per history call
    #[serde(default = "default_history_count")]
    pub history_count: usize,

    /// Candle granularity in seconds
    #[serde(default = "default_granularity_secs")]
    pub granularity_secs: u32,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Time before an unanswered history request (or a connect) times out
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries of a timed-out history request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Period of the full history refresh
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Minimum spacing of tick-triggered history requests per symbol
    #[serde(default = "default_history_throttle_ms")]
    pub history_throttle_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_history_count() -> usize {
    50
}

fn default_granularity_secs() -> u32 {
    60
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_refresh_interval_ms() -> u64 {
    60_000
}

fn default_history_throttle_ms() -> u64 {
    60_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            symbols: Vec::new(),
            history_count: default_history_count(),
            granularity_secs: default_granularity_secs(),
            reconnect: ReconnectPolicy::default(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            refresh_interval_ms: default_refresh_interval_ms(),
            history_throttle_ms: default_history_throttle_ms(),
        }
    }
}

impl FeedConfig {
    /// Defaults for `endpoint` tracking `symbols`
    pub fn new(endpoint: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            symbols,
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn history_throttle(&self) -> Duration {
        Duration::from_millis(self.history_throttle_ms)
    }

    /// Check the endpoint, symbol list and timings
    pub fn validate(&self) -> FeedResult<()> {
        let url = Url::parse(&self.endpoint).map_err(|e| FeedError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(FeedError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                message: format!("unsupported scheme {}", url.scheme()),
            });
        }

        if self.symbols.is_empty() {
            return Err(FeedError::ConfigError("no symbols configured".to_string()));
        }
        if self.history_count == 0 || self.granularity_secs == 0 {
            return Err(FeedError::ConfigError(
                "history_count and granularity_secs must be positive".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 || self.refresh_interval_ms == 0 {
            return Err(FeedError::ConfigError(
                "request_timeout_ms and refresh_interval_ms must be positive".to_string(),
            ));
        }
        self.reconnect.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.history_count, 50);
        assert_eq!(config.granularity_secs, 60);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_from_yaml_with_defaults() {
        let yaml = r#"
endpoint: "ws://127.0.0.1:9000"
symbols: ["R_100", "R_50"]
reconnect:
  base_delay_ms: 1000
"#;
        let config: FeedConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.reconnect.factor, 1.5);
        assert_eq!(config.history_throttle_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = FeedConfig::new("https://example.com", vec!["R_100".to_string()]);
        assert!(matches!(config.validate(), Err(FeedError::InvalidEndpoint { .. })));

        let config = FeedConfig::new("wss://example.com/ws", vec![]);
        assert!(matches!(config.validate(), Err(FeedError::ConfigError(_))));

        let config = FeedConfig::new("not a url", vec!["R_100".to_string()]);
        assert!(config.validate().is_err());
    }
}
