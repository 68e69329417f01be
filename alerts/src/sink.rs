//! Notification sink trait
//!
//! A sink delivers one already-formatted message. Pacing is the caller's
//! job; sinks never retry on their own.

use async_trait::async_trait;
use tracing::info;

use crate::error::AlertResult;

/// Destination for alert messages
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Deliver one message
    async fn send(&self, text: &str) -> AlertResult<()>;
}

/// Sink that writes messages to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> AlertResult<()> {
        info!(target: "sentinel::alert", "{}", text);
        Ok(())
    }
}
