//! Symbol state store
//!
//! Owns every piece of per-symbol state: the minute price buffer, the SMA
//! triplet with its crossing flags, RSI history, the registry of significant
//! RSI points and the signal-validation ledger. Callers reach a symbol's
//! state through explicit `get`/`get_mut`/`entry` operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::indicators::{self, RSI_PERIOD};
use crate::series::{PriceSeries, PushOutcome, DEFAULT_SERIES_CAPACITY};
use crate::types::{Candle, DetectorEvent, MaPair, RangeKind, ReversalType, SignalAction};

/// SMA windows tracked per symbol
pub const SMA_SHORT: usize = 19;
pub const SMA_MEDIUM: usize = 50;
pub const SMA_LONG: usize = 100;

/// Capacity of the RSI history
pub const RSI_HISTORY_CAPACITY: usize = 200;

/// Validated records kept per symbol
pub const MAX_VALIDATED_RECORDS: usize = 100;

/// Last observed ordering of a moving-average pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrossState {
    #[default]
    Unknown,
    Above,
    Below,
}

impl CrossState {
    pub fn from_above(above: bool) -> Self {
        if above {
            CrossState::Above
        } else {
            CrossState::Below
        }
    }
}

/// Crossing flags for the three watched pairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingFlags {
    pub sma19_vs_50: CrossState,
    pub sma19_vs_100: CrossState,
    pub sma50_vs_100: CrossState,
}

impl CrossingFlags {
    pub fn get(&self, pair: MaPair) -> CrossState {
        match pair {
            MaPair::Sma19vs50 => self.sma19_vs_50,
            MaPair::Sma19vs100 => self.sma19_vs_100,
            MaPair::Sma50vs100 => self.sma50_vs_100,
        }
    }

    pub fn set(&mut self, pair: MaPair, state: CrossState) {
        match pair {
            MaPair::Sma19vs50 => self.sma19_vs_50 = state,
            MaPair::Sma19vs100 => self.sma19_vs_100 = state,
            MaPair::Sma50vs100 => self.sma50_vs_100 = state,
        }
    }
}

/// SMA triplet and crossover bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmaState {
    pub sma19: Option<f64>,
    pub sma50: Option<f64>,
    pub sma100: Option<f64>,
    pub flags: CrossingFlags,
    /// Last time a crossover alert went out for this symbol
    pub last_alert_time: Option<DateTime<Utc>>,
}

impl SmaState {
    /// Recompute the averages from the buffered prices
    pub fn recompute(&mut self, prices: &[f64]) {
        self.sma19 = indicators::sma(prices, SMA_SHORT);
        self.sma50 = indicators::sma(prices, SMA_MEDIUM);
        self.sma100 = indicators::sma(prices, SMA_LONG);
    }

    /// All three averages are populated
    pub fn is_reliable(&self) -> bool {
        self.sma19.is_some() && self.sma50.is_some() && self.sma100.is_some()
    }

    /// (faster, slower) values of a pair
    pub fn pair_values(&self, pair: MaPair) -> Option<(f64, f64)> {
        match pair {
            MaPair::Sma19vs50 => Some((self.sma19?, self.sma50?)),
            MaPair::Sma19vs100 => Some((self.sma19?, self.sma100?)),
            MaPair::Sma50vs100 => Some((self.sma50?, self.sma100?)),
        }
    }
}

/// RSI reading taken at a new minute bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiPoint {
    pub rsi: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Capped chronological RSI readings
#[derive(Debug, Clone)]
pub struct RsiHistory {
    points: VecDeque<RsiPoint>,
    capacity: usize,
}

impl Default for RsiHistory {
    fn default() -> Self {
        Self::new(RSI_HISTORY_CAPACITY)
    }
}

impl RsiHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, point: RsiPoint) {
        self.points.push_back(point);
        if self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RsiPoint> {
        self.points.get(index)
    }

    pub fn last(&self) -> Option<&RsiPoint> {
        self.points.back()
    }

    /// Reading before the latest one
    pub fn previous(&self) -> Option<&RsiPoint> {
        let n = self.points.len();
        if n < 2 {
            return None;
        }
        self.points.get(n - 2)
    }
}

/// Registered RSI reversal level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantRsiPoint {
    pub value: f64,
    pub reversal_type: ReversalType,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub hit_count: u32,
    pub last_alerted: Option<DateTime<Utc>>,
}

/// Outcome tracking for one reversal signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalValidationRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub rsi_value: f64,
    pub price: f64,
    pub reversal_type: ReversalType,
    pub validated: bool,
    pub successful: bool,
    /// Relative price change measured at validation time
    pub price_change: Option<f64>,
}

/// Per-symbol ledger of reversal signals and their outcomes
#[derive(Debug, Clone, Default)]
pub struct ValidationLedger {
    records: Vec<SignalValidationRecord>,
    next_id: u64,
}

impl ValidationLedger {
    /// Open a new unvalidated record and return its id
    pub fn open(
        &mut self,
        timestamp: DateTime<Utc>,
        rsi_value: f64,
        price: f64,
        reversal_type: ReversalType,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.records.push(SignalValidationRecord {
            id,
            timestamp,
            rsi_value,
            price,
            reversal_type,
            validated: false,
            successful: false,
            price_change: None,
        });
        id
    }

    pub fn records(&self) -> &[SignalValidationRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [SignalValidationRecord] {
        &mut self.records
    }

    pub fn validated(&self) -> impl Iterator<Item = &SignalValidationRecord> {
        self.records.iter().filter(|r| r.validated)
    }

    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| !r.validated).count()
    }

    /// Keep every pending record and the most recent validated ones
    pub fn prune(&mut self, max_validated: usize) {
        let validated = self.records.iter().filter(|r| r.validated).count();
        if validated <= max_validated {
            return;
        }

        let mut to_drop = validated - max_validated;
        // Records are appended in time order, so the oldest validated come first
        self.records.retain(|r| {
            if r.validated && to_drop > 0 {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn push_record(&mut self, record: SignalValidationRecord) {
        self.next_id = self.next_id.max(record.id);
        self.records.push(record);
    }
}

/// All state held for one symbol
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,
    pub series: PriceSeries,
    pub sma: SmaState,
    pub rsi_history: RsiHistory,
    pub significant_points: Vec<SignificantRsiPoint>,
    pub ledger: ValidationLedger,
    /// Detector events not yet folded into a classification
    pub pending_events: Vec<DetectorEvent>,
    /// Last classification alert and when it was sent
    pub last_signal_alert: Option<(SignalAction, DateTime<Utc>)>,
    /// Last range alert and when it was sent
    pub last_range_alert: Option<(RangeKind, DateTime<Utc>)>,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, series_capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            series: PriceSeries::new(series_capacity),
            sma: SmaState::default(),
            rsi_history: RsiHistory::default(),
            significant_points: Vec::new(),
            ledger: ValidationLedger::default(),
            pending_events: Vec::new(),
            last_signal_alert: None,
            last_range_alert: None,
        }
    }

    /// Apply one price update
    ///
    /// A new minute bucket advances the SMA triplet and appends an RSI
    /// reading; an update inside the current minute only overwrites the
    /// buffered price.
    pub fn apply_price(&mut self, epoch_secs: i64, price: f64) -> AnalysisResult<PushOutcome> {
        if !price.is_finite() || price <= 0.0 {
            return Err(AnalysisError::InvalidPrice {
                symbol: self.symbol.clone(),
                value: price,
            });
        }
        let timestamp = DateTime::<Utc>::from_timestamp(epoch_secs, 0)
            .ok_or(AnalysisError::InvalidTimestamp(epoch_secs))?;

        let outcome = self.series.push(epoch_secs, price);
        match outcome {
            PushOutcome::Appended { gap_minutes } => {
                if gap_minutes > 1 {
                    warn!(
                        symbol = %self.symbol,
                        gap_minutes,
                        "Missed minute samples, continuing on sparser series"
                    );
                }

                let prices = self.series.prices();
                self.sma.recompute(&prices);
                self.rsi_history.push(RsiPoint {
                    rsi: indicators::rsi(&prices, RSI_PERIOD),
                    price,
                    timestamp,
                });
            }
            PushOutcome::Overwritten => {}
            PushOutcome::Stale => {
                debug!(symbol = %self.symbol, epoch_secs, "Dropping out-of-order price");
            }
        }
        Ok(outcome)
    }

    /// Seed an empty buffer from history candles
    ///
    /// Only prices and SMAs are filled in; no RSI readings are produced, so
    /// the detector starts from live data. Returns the number of buckets
    /// appended.
    pub fn seed_from_candles(&mut self, candles: &[Candle]) -> usize {
        if !self.series.is_empty() {
            return 0;
        }

        let mut appended = 0;
        for candle in candles.iter().filter(|c| c.is_clean()) {
            if self.series.push(candle.epoch, candle.close).is_new_minute() {
                appended += 1;
            }
        }
        self.sma.recompute(&self.series.prices());
        appended
    }

    pub fn last_price(&self) -> Option<f64> {
        self.series.last().map(|p| p.price)
    }
}

/// Store of every tracked symbol's state
#[derive(Debug, Default)]
pub struct SymbolStateStore {
    states: HashMap<String, SymbolState>,
    series_capacity: usize,
}

impl SymbolStateStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SERIES_CAPACITY)
    }

    pub fn with_capacity(series_capacity: usize) -> Self {
        Self {
            states: HashMap::new(),
            series_capacity,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolState> {
        self.states.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut SymbolState> {
        self.states.get_mut(symbol)
    }

    /// State for `symbol`, created on first use
    pub fn entry(&mut self, symbol: &str) -> &mut SymbolState {
        let capacity = if self.series_capacity == 0 {
            DEFAULT_SERIES_CAPACITY
        } else {
            self.series_capacity
        };
        self.states
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolState::new(symbol, capacity))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
