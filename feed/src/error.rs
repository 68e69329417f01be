//! Error types for the market-data feed

use thiserror::Error;

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Feed error types
#[derive(Debug, Error)]
pub enum FeedError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint is not a usable ws:// or wss:// URL
    #[error("Invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint {
        /// Configured endpoint
        endpoint: String,
        /// Reason
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Reconnect ceiling reached
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Event consumer dropped its receiver
    #[error("Event channel closed")]
    ChannelClosed,
}

impl FeedError {
    /// Check if the error ends the session but allows a reconnect
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::WebSocket(_) | FeedError::Timeout(_))
    }

    /// Check if the error stops the connection manager for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeedError::ReconnectExhausted { .. } | FeedError::ChannelClosed
        )
    }
}
