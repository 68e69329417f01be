//! Alert dispatcher
//!
//! Owns the outbound queue. Every message gets a send time no earlier than
//! `rate_limit_ms` after the previously scheduled one; a single task drains
//! ready items in arrival order through the [`AlertGate`] and hands them to
//! the sink. Failed sends are logged and counted, never retried.
//!
//! The inbox is only read while fewer than `max_queue_len` alerts are
//! scheduled, so a slow sink pushes back on producers through the bounded
//! channel.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::{AlertError, AlertResult};
use crate::gate::AlertGate;
use crate::sink::NotificationSink;

/// Maximum message length accepted by chat sinks
pub const MAX_MESSAGE_LEN: usize = 4000;

const ELLIPSIS: &str = "...";

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Minimum spacing between two sends
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Messages longer than this are truncated
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Capacity of the handle -> dispatcher channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Scheduled alerts held before the inbox stops being read
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
}

fn default_rate_limit_ms() -> u64 {
    1000
}

fn default_max_message_len() -> usize {
    MAX_MESSAGE_LEN
}

fn default_channel_capacity() -> usize {
    256
}

fn default_max_queue_len() -> usize {
    256
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: default_rate_limit_ms(),
            max_message_len: default_max_message_len(),
            channel_capacity: default_channel_capacity(),
            max_queue_len: default_max_queue_len(),
        }
    }
}

impl DispatcherConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn validate(&self) -> AlertResult<()> {
        if self.rate_limit_ms == 0 {
            return Err(AlertError::ConfigError(
                "rate_limit_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_message_len <= ELLIPSIS.len() {
            return Err(AlertError::ConfigError(format!(
                "max_message_len must exceed {}",
                ELLIPSIS.len()
            )));
        }
        if self.channel_capacity == 0 || self.max_queue_len == 0 {
            return Err(AlertError::ConfigError(
                "channel_capacity and max_queue_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cut `text` to at most `max_len` characters, marking the cut with "..."
pub fn truncate_message(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let keep = max_len.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    if max_len > ELLIPSIS.len() {
        out.push_str(ELLIPSIS);
    }
    out
}

/// A message waiting for its send time
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAlert {
    pub text: String,
    pub send_at: Instant,
}

/// FIFO of alerts with globally spaced send times
#[derive(Debug)]
pub struct AlertQueue {
    rate: Duration,
    last_scheduled: Option<Instant>,
    items: VecDeque<QueuedAlert>,
}

impl AlertQueue {
    pub fn new(rate: Duration) -> Self {
        Self {
            rate,
            last_scheduled: None,
            items: VecDeque::new(),
        }
    }

    /// Enqueue `text` and return its send time
    ///
    /// The send time is `now` unless that would fall inside the window of
    /// the previously scheduled item.
    pub fn schedule(&mut self, text: String, now: Instant) -> Instant {
        let send_at = match self.last_scheduled {
            Some(last) => (last + self.rate).max(now),
            None => now,
        };
        self.last_scheduled = Some(send_at);
        self.items.push_back(QueuedAlert { text, send_at });
        send_at
    }

    /// Remove the head if its send time has come
    pub fn pop_ready(&mut self, now: Instant) -> Option<QueuedAlert> {
        match self.items.front() {
            Some(head) if head.send_at <= now => self.items.pop_front(),
            _ => None,
        }
    }

    /// Send time of the head
    pub fn next_due(&self) -> Option<Instant> {
        self.items.front().map(|item| item.send_at)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Shared delivery counters
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    inner: Arc<Counters>,
}

/// Point-in-time copy of [`DispatcherStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherSnapshot {
    pub enqueued: u64,
    pub sent: u64,
    pub failed: u64,
}

impl DispatcherSnapshot {
    /// Messages accepted but not yet attempted
    pub fn pending(&self) -> u64 {
        self.enqueued.saturating_sub(self.sent + self.failed)
    }
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            enqueued: self.inner.enqueued.load(Ordering::Relaxed),
            sent: self.inner.sent.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    fn record_enqueued(&self) {
        self.inner.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sent(&self) {
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cloneable sender side of the dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<String>,
    stats: DispatcherStats,
}

impl DispatcherHandle {
    /// Queue a message, waiting for inbox capacity
    pub async fn notify(&self, text: impl Into<String>) -> AlertResult<()> {
        self.tx
            .send(text.into())
            .await
            .map_err(|_| AlertError::DispatcherClosed)
    }

    /// Queue a message without waiting
    pub fn try_notify(&self, text: impl Into<String>) -> AlertResult<()> {
        self.tx.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AlertError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => AlertError::DispatcherClosed,
        })
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats.clone()
    }
}

/// Single consumer that paces alerts to one sink
pub struct AlertDispatcher {
    config: DispatcherConfig,
    sink: Arc<dyn NotificationSink>,
    gate: AlertGate,
    queue: AlertQueue,
    inbox: mpsc::Receiver<String>,
    stats: DispatcherStats,
}

impl AlertDispatcher {
    /// Create a dispatcher and the handle used to feed it
    pub fn new(
        config: DispatcherConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> AlertResult<(Self, DispatcherHandle)> {
        config.validate()?;

        let (tx, inbox) = mpsc::channel(config.channel_capacity);
        let stats = DispatcherStats::default();
        let dispatcher = Self {
            gate: AlertGate::new(config.rate_limit())?,
            queue: AlertQueue::new(config.rate_limit()),
            sink,
            inbox,
            stats: stats.clone(),
            config,
        };

        Ok((dispatcher, DispatcherHandle { tx, stats }))
    }

    /// Run until shutdown, or until every handle is dropped and the queue
    /// has drained
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sink = self.sink.name(),
            rate_limit_ms = self.config.rate_limit_ms,
            "Alert dispatcher started"
        );

        let mut inbox_open = true;
        loop {
            if !inbox_open && self.queue.is_empty() {
                break;
            }

            let next_due = self.queue.next_due();
            let accepting = inbox_open && self.queue.len() < self.config.max_queue_len;
            tokio::select! {
                received = self.inbox.recv(), if accepting => match received {
                    Some(text) => self.enqueue(text),
                    None => {
                        debug!(remaining = self.queue.len(), "All handles dropped, draining queue");
                        inbox_open = false;
                    }
                },
                _ = wait_until(next_due) => {
                    if let Some(item) = self.queue.pop_ready(Instant::now()) {
                        self.deliver(item).await;
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    if !self.queue.is_empty() {
                        warn!(dropped = self.queue.len(), "Shutdown with undelivered alerts");
                    }
                    break;
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(sent = stats.sent, failed = stats.failed, "Alert dispatcher stopped");
    }

    fn enqueue(&mut self, text: String) {
        let now = Instant::now();
        let send_at = self.queue.schedule(text, now);
        self.stats.record_enqueued();
        debug!(
            queued = self.queue.len(),
            delay_ms = send_at.saturating_duration_since(now).as_millis() as u64,
            "Alert queued"
        );
    }

    async fn deliver(&self, item: QueuedAlert) {
        self.gate.until_ready().await;

        let text = truncate_message(&item.text, self.config.max_message_len);
        match self.sink.send(&text).await {
            Ok(()) => {
                self.stats.record_sent();
                debug!(sink = self.sink.name(), "Alert delivered");
            }
            Err(e) => {
                self.stats.record_failed();
                warn!(
                    sink = self.sink.name(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Alert delivery failed"
                );
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
