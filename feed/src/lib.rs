//! # sentinel-feed: Market-Data Session
//!
//! WebSocket client for a Deriv-style market-data API. A single
//! [`ConnectionManager`] keeps the session alive with capped exponential
//! backoff, requests candle history and tick subscriptions for every
//! tracked symbol, retries unanswered history requests, and publishes
//! everything it receives as [`FeedEvent`]s on an mpsc channel.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sentinel_feed::{ConnectionManager, FeedConfig, FeedEvent};
//! use tokio::sync::{mpsc, watch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FeedConfig::new(sentinel_feed::DEFAULT_ENDPOINT, vec!["R_100".to_string()]);
//! let manager = ConnectionManager::new(config)?;
//!
//! let (events_tx, mut events_rx) = mpsc::channel(1024);
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(async move { manager.run(events_tx, shutdown_rx).await });
//!
//! while let Some(event) = events_rx.recv().await {
//!     if let FeedEvent::Tick { symbol, price, .. } = event {
//!         println!("{symbol}: {price}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod pending;
pub mod protocol;

// Re-export main types
pub use backoff::{Backoff, BackoffStep, ReconnectPolicy};
pub use config::{FeedConfig, DEFAULT_ENDPOINT};
pub use connection::{ConnectionManager, ConnectionState, FeedEvent};
pub use error::{FeedError, FeedResult};
pub use pending::{Expiry, PendingRequest, PendingRequests};
pub use protocol::{HistoryRequest, InboundMessage, SubscribeRequest};
