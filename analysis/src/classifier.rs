//! Trend classification
//!
//! Turns a candle window into a trend label, a directional signal and a
//! confidence score in [0, 1], then folds in crossover and reversal events
//! raised by the detector since the previous classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SymbolConfig;
use crate::indicators::{
    self, Macd, Volatility, ATR_PERIOD, MACD_FAST, MACD_SIGNAL, MACD_SLOW, MOMENTUM_LOOKBACK,
    RSI_PERIOD,
};
use crate::store::SmaState;
use crate::types::{
    Candle, DetectorEvent, RangeKind, ReversalType, SignalAction, Trend,
};

/// Clean closes required before any classification
pub const MIN_CLEAN_POINTS: usize = 50;

/// Period of the very-long EMA used for trend alignment
pub const VERY_LONG_PERIOD: usize = 50;

/// Confidence needed to escalate to BUY/SELL
pub const SIGNAL_CONFIDENCE: f64 = 0.8;

/// |momentum| below which a flat RSI counts as a range
pub const RANGE_MOMENTUM: f64 = 0.0005;

/// Fixed confidence of a confirmed range
pub const RANGE_CONFIDENCE: f64 = 0.3;

/// Bonus when MACD agrees with the trend
pub const MACD_BONUS: f64 = 0.1;

/// Weight of one SMA-alignment condition after a reversal (three conditions)
pub const REVERSAL_ALIGNMENT_BONUS: f64 = 0.15;

/// Weight of the historical estimate in a reversal boost
pub const REVERSAL_ESTIMATE_WEIGHT: f64 = 0.2;

/// Indicator values behind a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub short_ma: f64,
    pub long_ma: f64,
    pub very_long_ma: f64,
    pub rsi: f64,
    pub momentum: f64,
    pub macd: Option<Macd>,
    pub volatility: Option<Volatility>,
    /// ATR period actually used, shortened for high-priced symbols
    pub volatility_period: usize,
    /// Relative change of normalized volatility versus one window earlier
    pub volatility_change: Option<f64>,
}

/// Width of the recent price range against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeReading {
    pub kind: RangeKind,
    /// max - min over the volatility window
    pub width: f64,
    pub threshold: f64,
}

/// Result of one classification cycle for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub symbol: String,
    pub trend: Trend,
    pub signal: SignalAction,
    pub confidence: f64,
    /// MA separation reached the strong-trend threshold
    pub strong: bool,
    pub price: Option<f64>,
    pub indicators: Option<IndicatorSnapshot>,
    pub range: Option<RangeReading>,
    /// Detector events folded into this result
    pub applied_events: Vec<DetectorEvent>,
    pub timestamp: DateTime<Utc>,
}

impl TrendAnalysis {
    /// Sentinel result for insufficient or malformed input
    pub fn unknown(symbol: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            trend: Trend::Unknown,
            signal: SignalAction::Neutral,
            confidence: 0.0,
            strong: false,
            price: None,
            indicators: None,
            range: None,
            applied_events: Vec::new(),
            timestamp,
        }
    }

    /// Whether this result should be turned into an alert
    pub fn is_actionable(&self) -> bool {
        self.trend != Trend::Unknown && self.signal != SignalAction::Neutral
    }
}

/// Classifier parameterised by one symbol's configuration
pub struct TrendClassifier<'a> {
    config: &'a SymbolConfig,
}

impl<'a> TrendClassifier<'a> {
    pub fn new(config: &'a SymbolConfig) -> Self {
        Self { config }
    }

    /// Classify a candle window
    ///
    /// Candles with unusable prices are dropped first; fewer than 50 clean
    /// candles yield [`TrendAnalysis::unknown`].
    pub fn classify(&self, symbol: &str, candles: &[Candle], timestamp: DateTime<Utc>) -> TrendAnalysis {
        let clean: Vec<Candle> = candles.iter().copied().filter(Candle::is_clean).collect();
        if clean.len() < MIN_CLEAN_POINTS {
            debug!(
                symbol,
                available = clean.len(),
                required = MIN_CLEAN_POINTS,
                "Insufficient data for classification"
            );
            return TrendAnalysis::unknown(symbol, timestamp);
        }

        let closes: Vec<f64> = clean.iter().map(|c| c.close).collect();
        let Some(snapshot) = self.snapshot(&closes, &clean) else {
            debug!(symbol, "Indicator windows longer than available history");
            return TrendAnalysis::unknown(symbol, timestamp);
        };

        let threshold = self.config.trend_threshold;
        let ma_diff = (snapshot.short_ma - snapshot.long_ma) / snapshot.long_ma;

        let (trend, confidence) = if snapshot.short_ma > snapshot.long_ma
            && snapshot.long_ma > snapshot.very_long_ma
            && snapshot.momentum > 0.0
        {
            let alignment = (snapshot.long_ma - snapshot.very_long_ma) / snapshot.very_long_ma;
            let mut confidence = 0.4 * (ma_diff / (threshold * 4.0)).clamp(0.0, 1.0)
                + 0.2 * ((snapshot.rsi - 50.0) / 20.0).clamp(0.0, 1.0)
                + 0.2 * (snapshot.momentum * 50.0).clamp(0.0, 1.0)
                + 0.2 * (alignment / (threshold * 4.0)).clamp(0.0, 1.0);
            if snapshot.macd.map(|m| m.is_bullish()).unwrap_or(false) {
                confidence += MACD_BONUS;
            }
            (Trend::Uptrend, confidence.min(1.0))
        } else if snapshot.short_ma < snapshot.long_ma
            && snapshot.long_ma < snapshot.very_long_ma
            && snapshot.momentum < 0.0
        {
            let alignment = (snapshot.very_long_ma - snapshot.long_ma) / snapshot.very_long_ma;
            let mut confidence = 0.4 * (-ma_diff / (threshold * 4.0)).clamp(0.0, 1.0)
                + 0.2 * ((50.0 - snapshot.rsi) / 20.0).clamp(0.0, 1.0)
                + 0.2 * (-snapshot.momentum * 50.0).clamp(0.0, 1.0)
                + 0.2 * (alignment / (threshold * 4.0)).clamp(0.0, 1.0);
            if snapshot.macd.map(|m| m.is_bearish()).unwrap_or(false) {
                confidence += MACD_BONUS;
            }
            (Trend::Downtrend, confidence.min(1.0))
        } else if snapshot.momentum.abs() < RANGE_MOMENTUM
            && snapshot.rsi > 40.0
            && snapshot.rsi < 60.0
        {
            (Trend::Range, RANGE_CONFIDENCE)
        } else {
            (Trend::Range, 0.0)
        };

        let signal = match trend {
            Trend::Uptrend if confidence >= SIGNAL_CONFIDENCE => SignalAction::Buy,
            Trend::Downtrend if confidence >= SIGNAL_CONFIDENCE => SignalAction::Sell,
            _ => SignalAction::Neutral,
        };

        let range = classify_range(&clean, self.config, snapshot.volatility);

        TrendAnalysis {
            symbol: symbol.to_string(),
            trend,
            signal,
            confidence,
            strong: ma_diff.abs() >= self.config.strong_trend_threshold,
            price: closes.last().copied(),
            indicators: Some(snapshot),
            range,
            applied_events: Vec::new(),
            timestamp,
        }
    }

    fn snapshot(&self, closes: &[f64], candles: &[Candle]) -> Option<IndicatorSnapshot> {
        let adaptive = indicators::adaptive_volatility(
            candles,
            ATR_PERIOD,
            self.config
                .adaptive_volatility_threshold
                .unwrap_or(f64::INFINITY),
        );

        Some(IndicatorSnapshot {
            short_ma: indicators::ema(closes, self.config.short_period)?,
            long_ma: indicators::ema(closes, self.config.long_period)?,
            very_long_ma: indicators::ema(closes, VERY_LONG_PERIOD)?,
            rsi: indicators::rsi(closes, RSI_PERIOD),
            momentum: indicators::momentum(closes, MOMENTUM_LOOKBACK)?,
            macd: indicators::macd(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
            volatility: adaptive.map(|a| Volatility {
                atr: a.raw,
                normalized: a.normalized,
            }),
            volatility_period: adaptive.map(|a| a.effective_period).unwrap_or(ATR_PERIOD),
            volatility_change: adaptive.and_then(|a| a.rate_of_change),
        })
    }
}

/// Compare the recent price range against the symbol's threshold
///
/// The threshold is the configured `range_threshold`, or twice the ATR
/// when none is configured.
pub fn classify_range(
    candles: &[Candle],
    config: &SymbolConfig,
    volatility: Option<Volatility>,
) -> Option<RangeReading> {
    let window = config.volatility_window.min(candles.len());
    if window < 2 {
        return None;
    }

    let recent = &candles[candles.len() - window..];
    let high = recent.iter().map(|c| c.close).fold(f64::NEG_INFINITY, f64::max);
    let low = recent.iter().map(|c| c.close).fold(f64::INFINITY, f64::min);
    let width = high - low;

    let threshold = match config.range_threshold {
        Some(threshold) => threshold,
        None => 2.0 * volatility?.atr,
    };

    let kind = if width <= threshold {
        RangeKind::Tight
    } else {
        RangeKind::Wide
    };

    Some(RangeReading {
        kind,
        width,
        threshold,
    })
}

/// Fold detector events into a classification
///
/// Events are applied in order, so the last one decides the direction.
/// Crossovers add a fixed boost per pair; reversals add the historical
/// estimate plus up to 0.45 for SMA alignment. Unknown results are left
/// untouched.
pub fn apply_events(analysis: &mut TrendAnalysis, events: &[DetectorEvent], sma: &SmaState) {
    if analysis.trend == Trend::Unknown || events.is_empty() {
        return;
    }

    for event in events {
        match event {
            DetectorEvent::Crossover(crossover) => {
                analysis.signal = crossover.direction.signal();
                analysis.trend = trend_for(analysis.signal);
                analysis.confidence += crossover.pair.confidence_boost();
            }
            DetectorEvent::Reversal(reversal) => {
                let estimate = reversal.estimate;
                let boost = estimate.adjusted_rate * estimate.confidence * REVERSAL_ESTIMATE_WEIGHT
                    + alignment_bonus(reversal.reversal_type, reversal.price, sma);

                analysis.signal = reversal.reversal_type.signal();
                analysis.trend = trend_for(analysis.signal);
                analysis.confidence += boost;
            }
        }
        analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
    }

    analysis.applied_events.extend_from_slice(events);
}

fn trend_for(signal: SignalAction) -> Trend {
    match signal {
        SignalAction::Buy => Trend::Uptrend,
        SignalAction::Sell => Trend::Downtrend,
        SignalAction::Neutral => Trend::Range,
    }
}

/// Up to three SMA conditions agreeing with the reversal direction
fn alignment_bonus(reversal_type: ReversalType, price: f64, sma: &SmaState) -> f64 {
    let checks = [
        sma.sma19.map(|s| (price, s)),
        sma.sma19.zip(sma.sma50),
        sma.sma50.zip(sma.sma100),
    ];

    checks
        .iter()
        .flatten()
        .filter(|(faster, slower)| match reversal_type {
            ReversalType::BottomReversal => faster > slower,
            ReversalType::TopReversal => faster < slower,
        })
        .count() as f64
        * REVERSAL_ALIGNMENT_BONUS
}
