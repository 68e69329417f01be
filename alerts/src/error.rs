//! Error types for alert delivery

use thiserror::Error;

/// Result type for alert operations
pub type AlertResult<T> = Result<T, AlertError>;

/// Alert delivery error types
#[derive(Debug, Error)]
pub enum AlertError {
    /// Sink rejected the message
    #[error("Sink {sink} rejected message: {message}")]
    SinkRejected {
        /// Sink name
        sink: String,
        /// Error message
        message: String,
        /// HTTP status or API error code, when known
        code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Dispatcher task is gone
    #[error("Dispatcher closed")]
    DispatcherClosed,

    /// Dispatcher inbox is full
    #[error("Dispatcher queue full")]
    QueueFull,

    /// HTTP client error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AlertError {
    /// Check if a later attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AlertError::QueueFull | AlertError::HttpError(_) => true,
            AlertError::SinkRejected { code, .. } => matches!(code, Some(429) | Some(500..=599)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(AlertError::QueueFull.is_retryable());

        let throttled = AlertError::SinkRejected {
            sink: "telegram".to_string(),
            message: "Too Many Requests".to_string(),
            code: Some(429),
        };
        assert!(throttled.is_retryable());

        let bad_chat = AlertError::SinkRejected {
            sink: "telegram".to_string(),
            message: "chat not found".to_string(),
            code: Some(400),
        };
        assert!(!bad_chat.is_retryable());
        assert!(!AlertError::DispatcherClosed.is_retryable());
    }
}
