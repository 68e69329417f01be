//! Integration tests for the connection manager against a local WebSocket server

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use sentinel_feed::{ConnectionManager, ConnectionState, FeedConfig, FeedError, FeedEvent, ReconnectPolicy};

// Helper: fast reconnect policy without jitter
fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 1,
        factor: 1.0,
        jitter: 0.0,
        max_delay_ms: 5,
        max_attempts: 10,
    }
}

fn config_for(addr: std::net::SocketAddr) -> FeedConfig {
    FeedConfig {
        reconnect: fast_policy(),
        ..FeedConfig::new(format!("ws://{}", addr), vec!["R_100".to_string()])
    }
}

async fn next_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

#[tokio::test]
async fn test_session_requests_history_and_forwards_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let mut requests = Vec::new();
        while requests.len() < 2 {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                requests.push(serde_json::from_str::<Value>(&text).unwrap());
            }
        }

        let history = r#"{
            "msg_type": "candles",
            "echo_req": { "ticks_history": "R_100" },
            "candles": [
                { "epoch": 1700000000, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1 },
                { "epoch": 1700000060, "open": 1.1, "high": 1.3, "low": 1.0, "close": 1.2 }
            ]
        }"#;
        ws.send(Message::Text(history.to_string())).await.unwrap();
        ws.send(Message::Text("garbage".to_string())).await.unwrap();
        ws.send(Message::Text(r#"{"msg_type":"ping"}"#.to_string())).await.unwrap();
        ws.send(Message::Text(
            r#"{"msg_type":"tick","tick":{"symbol":"R_100","quote":1.25,"epoch":1700000070}}"#.to_string(),
        ))
        .await
        .unwrap();

        // Hold the session open until the client closes it
        let mut extra = 0;
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
            extra += 1;
        }
        (requests, extra)
    });

    let manager = Arc::new(ConnectionManager::new(config_for(addr)).unwrap());
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run(events_tx, shutdown_rx).await })
    };

    assert_eq!(next_event(&mut events_rx).await, FeedEvent::Connected);

    match next_event(&mut events_rx).await {
        FeedEvent::History { symbol, candles } => {
            assert_eq!(symbol, "R_100");
            assert_eq!(candles.len(), 2);
            assert_eq!(candles[1].close, 1.2);
        }
        other => panic!("expected history, got {:?}", other),
    }

    // Malformed and unexpected frames are skipped
    assert_eq!(
        next_event(&mut events_rx).await,
        FeedEvent::Tick {
            symbol: "R_100".to_string(),
            price: 1.25,
            epoch: 1_700_000_070,
        }
    );
    assert_eq!(manager.state(), ConnectionState::Open);

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let (requests, extra) = server.await.unwrap();
    assert_eq!(requests[0]["ticks_history"], "R_100");
    assert_eq!(requests[0]["count"], 50);
    assert_eq!(requests[0]["granularity"], 60);
    assert_eq!(requests[0]["style"], "candles");
    assert_eq!(requests[0]["end"], "latest");
    assert_eq!(requests[1]["ticks"], "R_100");
    assert_eq!(requests[1]["subscribe"], 1);
    // The tick arrived inside the throttle window, so no extra history request
    assert_eq!(extra, 0);
}

#[tokio::test]
async fn test_gives_up_after_ceiling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));

    // Accept TCP and drop it before the WebSocket handshake
    let counter = Arc::clone(&accepted);
    let server = tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let manager = ConnectionManager::new(config_for(addr)).unwrap();
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = timeout(Duration::from_secs(10), manager.run(events_tx, shutdown_rx))
        .await
        .unwrap();
    assert!(matches!(result, Err(FeedError::ReconnectExhausted { attempts: 10 })));
    assert_eq!(manager.state(), ConnectionState::GaveUp);

    // One initial connect plus ten reconnects
    assert_eq!(accepted.load(Ordering::SeqCst), 11);

    let mut disconnects = 0;
    let mut gave_up = false;
    while let Some(event) = events_rx.recv().await {
        match event {
            FeedEvent::Disconnected { .. } => disconnects += 1,
            FeedEvent::GaveUp { attempts } => {
                assert_eq!(attempts, 10);
                gave_up = true;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(disconnects, 11);
    assert!(gave_up);

    server.abort();
}

#[tokio::test]
async fn test_successful_reopen_resets_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Twelve sessions closed right after the handshake, then refuse connections
    let server = tokio::spawn(async move {
        for _ in 0..12 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let config = FeedConfig {
        request_timeout_ms: 2000,
        ..config_for(addr)
    };
    let manager = ConnectionManager::new(config).unwrap();
    let (events_tx, mut events_rx) = mpsc::channel(256);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = timeout(Duration::from_secs(20), manager.run(events_tx, shutdown_rx))
        .await
        .unwrap();
    assert!(matches!(result, Err(FeedError::ReconnectExhausted { .. })));
    server.await.unwrap();

    let mut connected = 0;
    while let Some(event) = events_rx.recv().await {
        if event == FeedEvent::Connected {
            connected += 1;
        }
    }
    // More sessions than the ceiling: every open reset the counter
    assert_eq!(connected, 12);
}

#[tokio::test]
async fn test_unanswered_history_is_retried_then_abandoned() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (count_tx, count_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let mut history_requests = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(2500);
        while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
            if let Message::Text(text) = message {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value.get("ticks_history").is_some() {
                    history_requests += 1;
                }
            }
        }
        count_tx.send(history_requests).unwrap();

        // Keep the session up until the client closes it
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let config = FeedConfig {
        request_timeout_ms: 200,
        max_retries: 2,
        ..config_for(addr)
    };
    let manager = Arc::new(ConnectionManager::new(config).unwrap());
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run(events_tx, shutdown_rx).await })
    };

    assert_eq!(next_event(&mut events_rx).await, FeedEvent::Connected);

    // Initial request plus two retries, nothing after abandonment
    assert_eq!(count_rx.await.unwrap(), 3);

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(result.is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn test_periodic_refresh_requests_every_symbol() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (count_tx, count_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let mut per_symbol = std::collections::HashMap::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(550);
        while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
            if let Message::Text(text) = message {
                let value: Value = serde_json::from_str(&text).unwrap();
                if let Some(symbol) = value["ticks_history"].as_str() {
                    *per_symbol.entry(symbol.to_string()).or_insert(0u32) += 1;
                }
            }
        }
        count_tx.send(per_symbol).unwrap();

        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let config = FeedConfig {
        symbols: vec!["R_10".to_string(), "R_100".to_string()],
        refresh_interval_ms: 100,
        request_timeout_ms: 5000,
        ..config_for(addr)
    };
    let manager = ConnectionManager::new(config).unwrap();
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(async move { manager.run(events_tx, shutdown_rx).await });

    assert_eq!(next_event(&mut events_rx).await, FeedEvent::Connected);

    // Opening request plus several refresh rounds, no ticks involved
    let per_symbol = count_rx.await.unwrap();
    for symbol in ["R_10", "R_100"] {
        let count = per_symbol.get(symbol).copied().unwrap_or(0);
        assert!(count >= 3, "{} history requests for {}", count, symbol);
    }

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(result.is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn test_tick_after_throttle_requests_history() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // History and subscribe on open
        let mut opening = 0;
        while opening < 2 {
            if let Some(Ok(Message::Text(_))) = ws.next().await {
                opening += 1;
            }
        }

        let tick = |epoch: i64| {
            Message::Text(format!(
                r#"{{"msg_type":"tick","tick":{{"symbol":"R_100","quote":1.25,"epoch":{}}}}}"#,
                epoch
            ))
        };
        let count_history = |text: &str| {
            let value: Value = serde_json::from_str(text).unwrap();
            value.get("ticks_history").is_some()
        };

        // Inside the throttle window
        ws.send(tick(1_700_000_000)).await.unwrap();
        let mut early = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
        while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
            if let Message::Text(text) = message {
                if count_history(&text) {
                    early += 1;
                }
            }
        }

        // Throttle elapsed
        ws.send(tick(1_700_000_001)).await.unwrap();
        let mut late = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
            if let Message::Text(text) = message {
                if count_history(&text) {
                    late += 1;
                }
            }
        }

        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
        (early, late)
    });

    let config = FeedConfig {
        history_throttle_ms: 100,
        request_timeout_ms: 5000,
        ..config_for(addr)
    };
    let manager = ConnectionManager::new(config).unwrap();
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(async move { manager.run(events_tx, shutdown_rx).await });

    assert_eq!(next_event(&mut events_rx).await, FeedEvent::Connected);
    for epoch in [1_700_000_000, 1_700_000_001] {
        assert_eq!(
            next_event(&mut events_rx).await,
            FeedEvent::Tick {
                symbol: "R_100".to_string(),
                price: 1.25,
                epoch,
            }
        );
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(result.is_ok());

    let (early, late) = server.await.unwrap();
    assert_eq!(early, 0);
    assert_eq!(late, 1);
}
