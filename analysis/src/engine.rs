//! Analysis engine
//!
//! Owns the per-symbol state store and routes feed input through it:
//! ticks drive the crossover/reversal detector, history responses drive the
//! trend classifier. Both paths return the alerts they produced; delivery
//! is the caller's concern.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{apply_events, TrendAnalysis, TrendClassifier};
use crate::config::SymbolConfigTable;
use crate::detector;
use crate::error::AnalysisResult;
use crate::series::DEFAULT_SERIES_CAPACITY;
use crate::store::{SymbolState, SymbolStateStore};
use crate::types::{Candle, CrossoverEvent, DetectorEvent, ReversalEvent, SignalAction, Trend};

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Minimum gap between two identical classification alerts, in seconds
    pub signal_alert_cooldown_secs: i64,
    /// Minimum gap between two crossover alerts for a symbol, in seconds
    pub crossover_alert_cooldown_secs: i64,
    /// Minute buckets kept per symbol
    pub series_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            signal_alert_cooldown_secs: 600,
            crossover_alert_cooldown_secs: 300,
            series_capacity: DEFAULT_SERIES_CAPACITY,
        }
    }
}

/// What produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Trend,
    Crossover,
    Reversal,
    Revisit,
    Range,
}

/// Human-readable notification produced by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub kind: AlertKind,
    pub signal: SignalAction,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Per-symbol analysis over live ticks and history windows
pub struct AnalysisEngine {
    configs: SymbolConfigTable,
    settings: EngineSettings,
    store: SymbolStateStore,
}

impl AnalysisEngine {
    pub fn new(configs: SymbolConfigTable, settings: EngineSettings) -> Self {
        let store = SymbolStateStore::with_capacity(settings.series_capacity);
        Self {
            configs,
            settings,
            store,
        }
    }

    pub fn store(&self) -> &SymbolStateStore {
        &self.store
    }

    pub fn configs(&self) -> &SymbolConfigTable {
        &self.configs
    }

    /// Apply a live tick
    ///
    /// Only the first tick of a new minute runs the detector. Detected
    /// events are queued for the next classification; crossover alerts are
    /// limited to one per cooldown window, reversal alerts are already
    /// throttled by the detector.
    pub fn on_tick(&mut self, symbol: &str, price: f64, epoch_secs: i64) -> AnalysisResult<Vec<Alert>> {
        let cooldown = Duration::seconds(self.settings.crossover_alert_cooldown_secs);
        let state = self.store.entry(symbol);

        let outcome = state.apply_price(epoch_secs, price)?;
        if !outcome.is_new_minute() {
            return Ok(Vec::new());
        }

        let events = detector::process_new_minute(state);
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let alerts = event_alerts(state, &events, cooldown);
        state.pending_events.extend(events);
        Ok(alerts)
    }

    /// Classify a history window
    ///
    /// Seeds an empty series from the candles and folds in every pending
    /// detector event. A BUY or SELL result produces a trend alert, a
    /// confirmed range produces a range alert; both are suppressed when the
    /// same outcome was already sent within the signal cooldown. Pending
    /// events survive an UNKNOWN result.
    pub fn on_history(
        &mut self,
        symbol: &str,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> (TrendAnalysis, Option<Alert>) {
        let config = self.configs.get(symbol);
        let state = self.store.entry(symbol);

        let seeded = state.seed_from_candles(candles);
        if seeded > 0 {
            debug!(symbol, seeded, "Seeded price series from history");
        }

        let mut analysis = TrendClassifier::new(config).classify(symbol, candles, now);
        if analysis.trend == Trend::Unknown {
            if !state.pending_events.is_empty() {
                debug!(
                    symbol,
                    pending = state.pending_events.len(),
                    "Classification unknown, detector events kept"
                );
            }
            return (analysis, None);
        }

        let events = std::mem::take(&mut state.pending_events);
        apply_events(&mut analysis, &events, &state.sma);

        info!(
            symbol,
            trend = %analysis.trend,
            signal = %analysis.signal,
            confidence = analysis.confidence,
            events = events.len(),
            "Classified"
        );

        let cooldown = Duration::seconds(self.settings.signal_alert_cooldown_secs);

        if analysis.is_actionable() {
            if let Some((signal, sent_at)) = state.last_signal_alert {
                if signal == analysis.signal && now - sent_at < cooldown {
                    debug!(symbol, signal = %signal, "Signal alert suppressed by cooldown");
                    return (analysis, None);
                }
            }

            state.last_signal_alert = Some((analysis.signal, now));
            let alert = Alert {
                symbol: symbol.to_string(),
                kind: AlertKind::Trend,
                signal: analysis.signal,
                text: trend_text(&analysis),
                created_at: now,
            };
            return (analysis, Some(alert));
        }

        // Only a confirmed range is reported; an undecided window is not
        let range = match analysis.range {
            Some(range) if analysis.trend == Trend::Range && analysis.confidence > 0.0 => range,
            _ => return (analysis, None),
        };

        if let Some((kind, sent_at)) = state.last_range_alert {
            if kind == range.kind && now - sent_at < cooldown {
                debug!(symbol, range = %kind, "Range alert suppressed by cooldown");
                return (analysis, None);
            }
        }

        state.last_range_alert = Some((range.kind, now));
        let alert = Alert {
            symbol: symbol.to_string(),
            kind: AlertKind::Range,
            signal: SignalAction::Neutral,
            text: trend_text(&analysis),
            created_at: now,
        };
        (analysis, Some(alert))
    }
}

fn event_alerts(state: &mut SymbolState, events: &[DetectorEvent], cooldown: Duration) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let crossovers: Vec<&CrossoverEvent> = events
        .iter()
        .filter_map(|e| match e {
            DetectorEvent::Crossover(c) => Some(c),
            _ => None,
        })
        .collect();

    // Crossovers of one minute go out together; the longest pair is last
    if let Some(last) = crossovers.last() {
        let now = last.timestamp;
        let cooled = state
            .sma
            .last_alert_time
            .map(|t| now - t >= cooldown)
            .unwrap_or(true);

        if cooled {
            state.sma.last_alert_time = Some(now);
            alerts.push(Alert {
                symbol: state.symbol.clone(),
                kind: AlertKind::Crossover,
                signal: last.direction.signal(),
                text: crossover_text(&state.symbol, &crossovers),
                created_at: now,
            });
        } else {
            debug!(symbol = %state.symbol, count = crossovers.len(), "Crossover alert in cooldown");
        }
    }

    for event in events {
        if let DetectorEvent::Reversal(reversal) = event {
            alerts.push(Alert {
                symbol: state.symbol.clone(),
                kind: if reversal.registered {
                    AlertKind::Reversal
                } else {
                    AlertKind::Revisit
                },
                signal: reversal.reversal_type.signal(),
                text: reversal_text(&state.symbol, reversal),
                created_at: reversal.timestamp,
            });
        }
    }

    alerts
}

fn trend_text(analysis: &TrendAnalysis) -> String {
    let mut text = format!(
        "{} {} {} (confidence {:.0}%)",
        analysis.symbol,
        analysis.trend,
        analysis.signal,
        analysis.confidence * 100.0
    );
    if let Some(price) = analysis.price {
        text.push_str(&format!("\nPrice: {price:.4}"));
    }
    if let Some(ind) = &analysis.indicators {
        text.push_str(&format!(
            "\nMA {:.4}/{:.4}/{:.4} RSI {:.1} momentum {:+.3}%",
            ind.short_ma,
            ind.long_ma,
            ind.very_long_ma,
            ind.rsi,
            ind.momentum * 100.0
        ));
    }
    if let Some(range) = &analysis.range {
        text.push_str(&format!(
            "\nRange {}: width {:.4} / threshold {:.4}",
            range.kind, range.width, range.threshold
        ));
    }
    if analysis.strong {
        text.push_str("\nStrong trend");
    }
    if !analysis.applied_events.is_empty() {
        text.push_str(&format!("\nIncludes {} detector event(s)", analysis.applied_events.len()));
    }
    text
}

fn crossover_text(symbol: &str, crossovers: &[&CrossoverEvent]) -> String {
    let mut text = format!("{symbol} moving-average crossover");
    for c in crossovers {
        text.push_str(&format!("\n{} {} at {:.4}", c.pair, c.direction, c.price));
    }
    text
}

fn reversal_text(symbol: &str, reversal: &ReversalEvent) -> String {
    let headline = if reversal.registered {
        format!("{symbol} RSI {} at {:.1}", reversal.reversal_type, reversal.level)
    } else {
        format!(
            "{symbol} RSI back at {} level {:.1} (now {:.1}, hit {})",
            reversal.reversal_type, reversal.level, reversal.rsi, reversal.hit_count
        )
    };

    let estimate = reversal.estimate;
    format!(
        "{headline}\nSignal: {}\nPrice: {:.4}\nHistorical success {:.0}% over {} sample(s)",
        reversal.reversal_type.signal(),
        reversal.price,
        estimate.adjusted_rate * 100.0,
        estimate.samples
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RangeKind;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(SymbolConfigTable::default(), EngineSettings::default())
    }

    fn rising_candles(start_epoch: i64, n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::from_close(start_epoch + i as i64 * 60, 100.0 * 1.01f64.powi(i as i32)))
            .collect()
    }

    #[test]
    fn test_same_minute_ticks_only_update_series() {
        let mut engine = engine();

        assert!(engine.on_tick("R_100", 100.0, 600).unwrap().is_empty());
        assert!(engine.on_tick("R_100", 101.0, 630).unwrap().is_empty());

        let state = engine.store().get("R_100").unwrap();
        assert_eq!(state.series.len(), 1);
        assert_eq!(state.last_price(), Some(101.0));
        assert_eq!(state.rsi_history.len(), 1);
    }

    #[test]
    fn test_invalid_price_is_rejected() {
        let mut engine = engine();
        assert!(engine.on_tick("R_100", f64::NAN, 600).is_err());
        assert!(engine.on_tick("R_100", -1.0, 600).is_err());
    }

    #[test]
    fn test_history_seeds_and_alerts_once() {
        let mut engine = engine();
        let candles = rising_candles(0, 60);
        let now = DateTime::<Utc>::from_timestamp(3600, 0).unwrap();

        let (analysis, alert) = engine.on_history("R_100", &candles, now);
        assert_eq!(analysis.trend, Trend::Uptrend);
        let alert = alert.unwrap();
        assert_eq!(alert.kind, AlertKind::Trend);
        assert_eq!(alert.signal, SignalAction::Buy);
        assert!(alert.text.contains("UPTREND"));
        assert_eq!(engine.store().get("R_100").unwrap().series.len(), 60);

        // Same signal within ten minutes is suppressed
        let (_, repeat) = engine.on_history("R_100", &candles, now + Duration::minutes(5));
        assert!(repeat.is_none());

        let (_, later) = engine.on_history("R_100", &candles, now + Duration::minutes(11));
        assert!(later.is_some());
    }

    fn flat_candles(n: usize) -> Vec<Candle> {
        // Five-minute cycle keeps momentum at zero and RSI at 50
        let cycle = [100.0, 100.01, 100.02, 100.01, 100.0];
        (0..n)
            .map(|i| Candle::from_close(i as i64 * 60, cycle[i % 5]))
            .collect()
    }

    #[test]
    fn test_confirmed_range_raises_range_alert() {
        let configs = SymbolConfigTable::default().with_override(
            "R_10",
            crate::config::SymbolConfig {
                range_threshold: Some(1.0),
                ..Default::default()
            },
        );
        let mut engine = AnalysisEngine::new(configs, EngineSettings::default());
        let now = DateTime::<Utc>::from_timestamp(3600, 0).unwrap();

        let (analysis, alert) = engine.on_history("R_10", &flat_candles(60), now);
        assert_eq!(analysis.trend, Trend::Range);
        let range = analysis.range.unwrap();
        assert_eq!(range.kind, RangeKind::Tight);

        let alert = alert.unwrap();
        assert_eq!(alert.kind, AlertKind::Range);
        assert_eq!(alert.signal, SignalAction::Neutral);
        assert!(alert.text.contains("Range TIGHT"));
        assert!(alert.text.contains("threshold 1.0000"));

        // Same range kind within the cooldown is suppressed
        let (_, repeat) = engine.on_history("R_10", &flat_candles(60), now + Duration::minutes(5));
        assert!(repeat.is_none());

        let (_, later) = engine.on_history("R_10", &flat_candles(60), now + Duration::minutes(11));
        assert_eq!(later.map(|a| a.kind), Some(AlertKind::Range));
    }

    #[test]
    fn test_trend_text_carries_range_reading() {
        let mut engine = engine();
        let now = DateTime::<Utc>::from_timestamp(3600, 0).unwrap();

        let (analysis, alert) = engine.on_history("R_100", &rising_candles(0, 60), now);
        let range = analysis.range.unwrap();
        assert!(alert.unwrap().text.contains(&format!("Range {}", range.kind)));
    }

    #[test]
    fn test_short_history_gives_unknown_without_alert() {
        let mut engine = engine();
        let candles = rising_candles(0, 20);
        let (analysis, alert) = engine.on_history("R_100", &candles, Utc::now());
        assert_eq!(analysis.trend, Trend::Unknown);
        assert!(alert.is_none());
    }

    #[test]
    fn test_crossover_alert_cooldown() {
        let mut engine = engine();

        // 100 falling minutes then a sharp rally
        let mut epoch = 0;
        for i in 0..100 {
            engine.on_tick("R_100", 200.0 - i as f64, epoch).unwrap();
            epoch += 60;
        }

        let mut crossover_alerts = Vec::new();
        for i in 0..60 {
            let alerts = engine.on_tick("R_100", 101.0 + i as f64 * 5.0, epoch).unwrap();
            crossover_alerts.extend(alerts.into_iter().filter(|a| a.kind == AlertKind::Crossover));
            epoch += 60;
        }

        assert!(!crossover_alerts.is_empty());
        for pair in crossover_alerts.windows(2) {
            assert!(pair[1].created_at - pair[0].created_at >= Duration::minutes(5));
        }
        assert!(crossover_alerts.iter().all(|a| a.signal == SignalAction::Buy));

        // Every crossover waits in the pending queue for classification
        let pending = &engine.store().get("R_100").unwrap().pending_events;
        let crossovers = pending
            .iter()
            .filter(|e| matches!(e, DetectorEvent::Crossover(_)))
            .count();
        assert_eq!(crossovers, 3);
    }

    #[test]
    fn test_history_consumes_pending_events() {
        let mut engine = engine();
        let mut epoch = 0;
        for i in 0..100 {
            engine.on_tick("R_100", 200.0 - i as f64, epoch).unwrap();
            epoch += 60;
        }
        for i in 0..60 {
            engine.on_tick("R_100", 101.0 + i as f64 * 5.0, epoch).unwrap();
            epoch += 60;
        }
        let pending = engine.store().get("R_100").unwrap().pending_events.len();
        assert!(pending > 0);

        // An UNKNOWN classification leaves the events for the next window
        let now = DateTime::<Utc>::from_timestamp(epoch, 0).unwrap();
        let (unknown, _) = engine.on_history("R_100", &rising_candles(0, 20), now);
        assert_eq!(unknown.trend, Trend::Unknown);
        assert_eq!(engine.store().get("R_100").unwrap().pending_events.len(), pending);

        let (analysis, _) = engine.on_history("R_100", &rising_candles(0, 60), now);

        assert_eq!(analysis.applied_events.len(), pending);
        assert!(engine.store().get("R_100").unwrap().pending_events.is_empty());
    }
}
