//! Core types shared across the analysis engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol identifier as used by the market-data provider (e.g. "R_100")
pub type Symbol = String;

/// OHLC candle
///
/// Providers that only publish closes can fill `open`, `high` and `low`
/// with the close; every indicator accepts that degenerate input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time in epoch seconds
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Candle with every price set to `close`
    pub fn from_close(epoch: i64, close: f64) -> Self {
        Self {
            epoch,
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    /// Whether every price of the candle is usable
    pub fn is_clean(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
    }
}

/// One minute-bucketed price sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Epoch minute (epoch seconds / 60)
    pub minute: i64,
    /// Latest price seen in that minute
    pub price: f64,
}

/// Trend label produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Range,
    /// Not enough clean data to classify
    Unknown,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Uptrend => write!(f, "UPTREND"),
            Trend::Downtrend => write!(f, "DOWNTREND"),
            Trend::Range => write!(f, "RANGE"),
            Trend::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Directional signal attached to an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Neutral,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Kind of RSI reversal point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalType {
    /// Local RSI minimum, expected to be followed by rising prices
    BottomReversal,
    /// Local RSI maximum, expected to be followed by falling prices
    TopReversal,
}

impl ReversalType {
    /// Signal implied by this reversal
    pub fn signal(&self) -> SignalAction {
        match self {
            ReversalType::BottomReversal => SignalAction::Buy,
            ReversalType::TopReversal => SignalAction::Sell,
        }
    }
}

impl fmt::Display for ReversalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReversalType::BottomReversal => write!(f, "bottom_reversal"),
            ReversalType::TopReversal => write!(f, "top_reversal"),
        }
    }
}

/// Moving-average pair watched by the crossover detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaPair {
    Sma19vs50,
    Sma19vs100,
    Sma50vs100,
}

impl MaPair {
    pub const ALL: [MaPair; 3] = [MaPair::Sma19vs50, MaPair::Sma19vs100, MaPair::Sma50vs100];

    /// Confidence boost applied when this pair crosses; longer pairs weigh more
    pub fn confidence_boost(&self) -> f64 {
        match self {
            MaPair::Sma19vs50 => 0.08,
            MaPair::Sma19vs100 => 0.12,
            MaPair::Sma50vs100 => 0.15,
        }
    }
}

impl fmt::Display for MaPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaPair::Sma19vs50 => write!(f, "SMA19/SMA50"),
            MaPair::Sma19vs100 => write!(f, "SMA19/SMA100"),
            MaPair::Sma50vs100 => write!(f, "SMA50/SMA100"),
        }
    }
}

/// Direction of a moving-average crossover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrossDirection {
    CrossAbove,
    CrossBelow,
}

impl CrossDirection {
    pub fn signal(&self) -> SignalAction {
        match self {
            CrossDirection::CrossAbove => SignalAction::Buy,
            CrossDirection::CrossBelow => SignalAction::Sell,
        }
    }
}

impl fmt::Display for CrossDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrossDirection::CrossAbove => write!(f, "CROSS_ABOVE"),
            CrossDirection::CrossBelow => write!(f, "CROSS_BELOW"),
        }
    }
}

/// Width of the recent price range relative to its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeKind {
    Tight,
    Wide,
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeKind::Tight => write!(f, "TIGHT"),
            RangeKind::Wide => write!(f, "WIDE"),
        }
    }
}

/// Crossover observed on a new-minute tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossoverEvent {
    pub pair: MaPair,
    pub direction: CrossDirection,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Historical success estimate for a reversal class at an RSI level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessEstimate {
    /// Number of validated records used
    pub samples: usize,
    /// Raw successes / samples (0.5 when there are no samples)
    pub raw_rate: f64,
    /// Wilson lower bound, blended toward 0.5 for small samples
    pub adjusted_rate: f64,
    /// Confidence of the estimate itself, `min(1, sqrt(n)/5)`
    pub confidence: f64,
}

/// Reversal observed on a new-minute tick, either freshly registered or revisited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalEvent {
    pub reversal_type: ReversalType,
    /// RSI level of the significant point
    pub level: f64,
    /// Live RSI when the event fired
    pub rsi: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// True for a new registration, false for a revisit
    pub registered: bool,
    pub hit_count: u32,
    pub estimate: SuccessEstimate,
}

/// Event emitted by the crossover and reversal detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetectorEvent {
    Crossover(CrossoverEvent),
    Reversal(ReversalEvent),
}
