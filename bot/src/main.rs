use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use sentinel_alerts::{
    AlertDispatcher, DispatcherHandle, LogSink, NotificationSink, TelegramSink,
};
use sentinel_analysis::{Alert, AnalysisEngine};
use sentinel_feed::{ConnectionManager, FeedEvent};

mod config;

use config::Config;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[clap(name = "sentinel", about = "Market trend monitor with paced alerts")]
struct Args {
    #[clap(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log alerts instead of sending them to Telegram
    #[clap(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Loading configuration from {:?}", args.config);
    let mut config = Config::load(&args.config)?;
    config.apply_env();

    let sink = build_sink(&config, args.dry_run)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (dispatcher, alerts) = AlertDispatcher::new(config.alerts.clone(), sink)
        .context("Failed to create alert dispatcher")?;
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let manager = ConnectionManager::new(config.feed.clone()).context("Invalid feed configuration")?;
    info!(
        endpoint = %config.feed.endpoint,
        symbols = ?config.feed.symbols,
        "Starting market data feed"
    );
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let feed_shutdown = shutdown_rx.clone();
    let feed_task = tokio::spawn(async move { manager.run(event_tx, feed_shutdown).await });

    let mut engine = AnalysisEngine::new(config.analysis, config.engine);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Main event loop
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => handle_event(&mut engine, &alerts, event).await,
                None => {
                    warn!("Feed stopped");
                    break;
                }
            },
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    drop(alerts);

    match feed_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Feed terminated: {}", e),
        Err(e) => error!("Feed task panicked: {}", e),
    }
    if let Err(e) = dispatcher_task.await {
        error!("Dispatcher task panicked: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn build_sink(config: &Config, dry_run: bool) -> Result<Arc<dyn NotificationSink>> {
    match (&config.telegram, dry_run) {
        (Some(telegram), false) => {
            let sink = TelegramSink::new(telegram.clone()).context("Failed to create Telegram sink")?;
            info!(chat_id = %telegram.chat_id, "Alerts go to Telegram");
            Ok(Arc::new(sink))
        }
        (_, true) => {
            info!("Dry run, alerts go to the log");
            Ok(Arc::new(LogSink))
        }
        (None, false) => {
            warn!("Telegram credentials missing, alerts go to the log");
            Ok(Arc::new(LogSink))
        }
    }
}

async fn handle_event(engine: &mut AnalysisEngine, alerts: &DispatcherHandle, event: FeedEvent) {
    match event {
        FeedEvent::Tick { symbol, price, epoch } => match engine.on_tick(&symbol, price, epoch) {
            Ok(produced) => {
                for alert in produced {
                    dispatch(alerts, alert).await;
                }
            }
            Err(e) => warn!(symbol = %symbol, "Tick rejected: {}", e),
        },
        FeedEvent::History { symbol, candles } => {
            let (analysis, alert) = engine.on_history(&symbol, &candles, Utc::now());
            debug!(
                symbol = %symbol,
                candles = candles.len(),
                trend = %analysis.trend,
                "History processed"
            );
            if let Some(alert) = alert {
                dispatch(alerts, alert).await;
            }
        }
        FeedEvent::Connected => info!("Market data connected"),
        FeedEvent::Disconnected { reason } => warn!("Market data disconnected: {}", reason),
        FeedEvent::GaveUp { attempts } => {
            error!(attempts, "Market data reconnection abandoned");
        }
    }
}

async fn dispatch(alerts: &DispatcherHandle, alert: Alert) {
    info!(symbol = %alert.symbol, kind = ?alert.kind, signal = %alert.signal, "Alert");
    if let Err(e) = alerts.notify(alert.to_string()).await {
        error!("Failed to queue alert: {}", e);
    }
}
