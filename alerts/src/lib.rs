//! # sentinel-alerts: Paced Alert Delivery
//!
//! This library delivers alert text to notification sinks without ever
//! sending two messages closer together than a configured interval.
//!
//! ## Core Components
//!
//! - **AlertDispatcher**: Single task owning the queue; drains ready items in order
//! - **DispatcherHandle**: Cloneable sender used by producers
//! - **AlertGate**: Global minimum-spacing gate backed by governor
//! - **NotificationSink**: Trait for delivery targets (Telegram, log)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sentinel_alerts::{AlertDispatcher, DispatcherConfig, LogSink};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (dispatcher, handle) =
//!         AlertDispatcher::new(DispatcherConfig::default(), Arc::new(LogSink)).unwrap();
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let task = tokio::spawn(dispatcher.run(shutdown_rx));
//!
//!     handle.notify("R_100 UPTREND BUY (confidence 0.82)").await.unwrap();
//!     handle.notify("R_100 SMA19 crossed above SMA50").await.unwrap();
//!
//!     // Dropping the last handle drains the queue and stops the task
//!     drop(handle);
//!     task.await.unwrap();
//! }
//! ```

// Public modules
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod sink;

// Sink implementations
pub mod sinks {
    pub mod telegram;

    pub use telegram::{TelegramConfig, TelegramSink};
}

// Re-export main types
pub use dispatcher::{
    truncate_message, AlertDispatcher, AlertQueue, DispatcherConfig, DispatcherHandle,
    DispatcherSnapshot, DispatcherStats, MAX_MESSAGE_LEN,
};
pub use error::{AlertError, AlertResult};
pub use gate::AlertGate;
pub use sink::{LogSink, NotificationSink};
pub use sinks::{TelegramConfig, TelegramSink};
