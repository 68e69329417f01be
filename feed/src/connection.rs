//! Connection manager
//!
//! Owns the WebSocket session to the market-data provider. On every open
//! it requests history and subscribes to ticks for each tracked symbol,
//! then forwards parsed frames as [`FeedEvent`]s on an mpsc channel. The
//! refresh and request-timeout timers live inside the session loop and are
//! dropped with it, so a reconnect or shutdown never leaves stale timers.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use sentinel_analysis::Candle;

use crate::backoff::{Backoff, BackoffStep};
use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::pending::{Expiry, PendingRequests};
use crate::protocol::{HistoryRequest, InboundMessage, SubscribeRequest};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Upper bound on the pending-request check period
const MAX_TIMEOUT_CHECK: Duration = Duration::from_secs(1);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Closed by the server or the stream ended
    Closed,
    /// Transport or handshake failure
    Error,
    /// Waiting before reconnect `attempt`
    Reconnecting { attempt: u32 },
    /// Reconnect ceiling reached
    GaveUp,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Open => write!(f, "OPEN"),
            ConnectionState::Closed => write!(f, "CLOSED"),
            ConnectionState::Error => write!(f, "ERROR"),
            ConnectionState::Reconnecting { attempt } => write!(f, "RECONNECTING({})", attempt),
            ConnectionState::GaveUp => write!(f, "GAVE_UP"),
        }
    }
}

/// Event published to the analysis consumer
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected,
    Disconnected { reason: String },
    Tick { symbol: String, price: f64, epoch: i64 },
    History { symbol: String, candles: Vec<Candle> },
    GaveUp { attempts: u32 },
}

enum SessionEnd {
    Closed(String),
    Shutdown,
}

/// Reconnecting market-data session
pub struct ConnectionManager {
    config: FeedConfig,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Create a manager after validating `config`
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Current session state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Run sessions until shutdown or until reconnection is abandoned
    ///
    /// Returns `Ok(())` on shutdown, [`FeedError::ReconnectExhausted`] once
    /// the reconnect ceiling is hit and [`FeedError::ChannelClosed`] if the
    /// event receiver goes away.
    pub async fn run(
        &self,
        events: mpsc::Sender<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> FeedResult<()> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let reason = match self.session(&events, &mut shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed(reason)) => {
                    self.set_state(ConnectionState::Closed);
                    reason
                }
                Err(FeedError::ChannelClosed) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(FeedError::ChannelClosed);
                }
                Err(e) => {
                    warn!(error = %e, "Session failed");
                    self.set_state(ConnectionState::Error);
                    e.to_string()
                }
            };
            emit(&events, FeedEvent::Disconnected { reason }).await?;

            match backoff.on_disconnect() {
                BackoffStep::Retry { attempt, delay } => {
                    self.set_state(ConnectionState::Reconnecting { attempt });
                    info!(
                        attempt,
                        max_attempts = self.config.reconnect.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
                BackoffStep::GiveUp { attempts } => {
                    error!(
                        attempts,
                        endpoint = %self.config.endpoint,
                        "Reconnection abandoned, market data stopped"
                    );
                    self.set_state(ConnectionState::GaveUp);
                    let _ = events.send(FeedEvent::GaveUp { attempts }).await;
                    return Err(FeedError::ReconnectExhausted { attempts });
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped");
        Ok(())
    }

    async fn session(
        &self,
        events: &mpsc::Sender<FeedEvent>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> FeedResult<SessionEnd> {
        info!(endpoint = %self.config.endpoint, "Connecting");
        let connect = tokio::time::timeout(
            self.config.request_timeout(),
            connect_async(self.config.endpoint.as_str()),
        );
        let (ws_stream, _) = tokio::select! {
            result = connect => result.map_err(|_| FeedError::Timeout("connect".to_string()))??,
            _ = shutdown_requested(shutdown) => return Ok(SessionEnd::Shutdown),
        };

        backoff.on_open();
        self.set_state(ConnectionState::Open);
        info!(symbols = self.config.symbols.len(), "Connected");
        emit(events, FeedEvent::Connected).await?;

        let (write, mut read) = ws_stream.split();
        let mut session = Session::new(&self.config, write);
        for symbol in &self.config.symbols {
            session.request_history(symbol).await?;
            session.subscribe(symbol).await?;
        }

        let refresh_every = self.config.refresh_interval();
        let mut refresh = interval_at(tokio::time::Instant::now() + refresh_every, refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timeouts = interval(self.config.request_timeout().min(MAX_TIMEOUT_CHECK));
        timeouts.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text, events).await?,
                    // Pong is queued by tungstenite
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        info!(reason = %reason, "Session closed");
                        return Ok(SessionEnd::Closed(reason));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!(bytes = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Closed("stream ended".to_string())),
                },
                _ = refresh.tick() => {
                    debug!("Periodic history refresh");
                    for symbol in &self.config.symbols {
                        session.request_history(symbol).await?;
                    }
                }
                _ = timeouts.tick() => session.handle_timeouts().await?,
                _ = shutdown_requested(shutdown) => {
                    info!("Shutdown requested, closing session");
                    let _ = session.write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }
}

/// Per-connection state, dropped when the session ends
struct Session<'a> {
    config: &'a FeedConfig,
    write: WsSink,
    pending: PendingRequests,
    last_history: HashMap<String, Instant>,
}

impl<'a> Session<'a> {
    fn new(config: &'a FeedConfig, write: WsSink) -> Self {
        Self {
            config,
            write,
            pending: PendingRequests::new(config.request_timeout(), config.max_retries),
            last_history: HashMap::new(),
        }
    }

    async fn send_json<T: Serialize>(&mut self, request: &T) -> FeedResult<()> {
        let text = serde_json::to_string(request)?;
        self.write.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn subscribe(&mut self, symbol: &str) -> FeedResult<()> {
        debug!(symbol, "Subscribing to ticks");
        self.send_json(&SubscribeRequest::new(symbol)).await
    }

    fn history_request(&self, symbol: &str) -> HistoryRequest {
        HistoryRequest::new(symbol, self.config.history_count, self.config.granularity_secs)
    }

    async fn request_history(&mut self, symbol: &str) -> FeedResult<()> {
        let request = self.history_request(symbol);
        self.send_json(&request).await?;

        let now = Instant::now();
        self.pending.register(symbol, now);
        self.last_history.insert(symbol.to_string(), now);
        debug!(symbol, "Requested history");
        Ok(())
    }

    async fn handle_timeouts(&mut self) -> FeedResult<()> {
        for expiry in self.pending.expired(Instant::now()) {
            match expiry {
                Expiry::Retry { symbol, attempt } => {
                    warn!(
                        symbol = %symbol,
                        attempt,
                        max_retries = self.config.max_retries,
                        "History request timed out, retrying"
                    );
                    let request = self.history_request(&symbol);
                    self.send_json(&request).await?;
                    self.last_history.insert(symbol, Instant::now());
                }
                Expiry::Abandon { symbol } => {
                    warn!(symbol = %symbol, "History request abandoned after retries");
                }
            }
        }
        Ok(())
    }

    async fn handle_text(&mut self, text: &str, events: &mpsc::Sender<FeedEvent>) -> FeedResult<()> {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding malformed message");
                return Ok(());
            }
        };

        match message {
            InboundMessage::History { symbol, candles } => {
                if !self.pending.resolve(&symbol) {
                    debug!(symbol = %symbol, "History without outstanding request");
                }
                debug!(symbol = %symbol, candles = candles.len(), "Received history");
                emit(events, FeedEvent::History { symbol, candles }).await
            }
            InboundMessage::Tick { symbol, quote, epoch } => {
                if !self.config.symbols.contains(&symbol) {
                    debug!(symbol = %symbol, "Tick for untracked symbol");
                    return Ok(());
                }

                let epoch = epoch.unwrap_or_else(|| Utc::now().timestamp());
                emit(
                    events,
                    FeedEvent::Tick {
                        symbol: symbol.clone(),
                        price: quote,
                        epoch,
                    },
                )
                .await?;

                let due = self
                    .last_history
                    .get(&symbol)
                    .map(|sent| sent.elapsed() >= self.config.history_throttle())
                    .unwrap_or(true);
                if due {
                    self.request_history(&symbol).await?;
                }
                Ok(())
            }
            InboundMessage::Error {
                symbol,
                code,
                message,
            } => {
                warn!(symbol = ?symbol, code = %code, message = %message, "Provider error");
                Ok(())
            }
            InboundMessage::Unexpected(kind) => {
                warn!(kind = %kind, "Ignoring unexpected message");
                Ok(())
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<FeedEvent>, event: FeedEvent) -> FeedResult<()> {
    events.send(event).await.map_err(|_| FeedError::ChannelClosed)
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone
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
