//! # sentinel-analysis: Per-Symbol Trend and Reversal Analysis
//!
//! Pure, synchronous analysis core of the sentinel. It has no I/O: the feed
//! pushes ticks and history windows in, alerts come back out.
//!
//! ## Core Components
//!
//! - **Indicators**: SMA/EMA, Wilder RSI, momentum, ATR volatility, MACD
//! - **Symbol state**: minute-bucketed price series, SMA triplet, RSI history,
//!   significant RSI levels and the validation ledger
//! - **Detector**: SMA crossovers, RSI reversal registration, level revisits
//!   and historical success scoring
//! - **Classifier**: trend label, signal and confidence from a candle window
//! - **Engine**: routes ticks and history through the above and emits alerts
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sentinel_analysis::{AnalysisEngine, Candle, EngineSettings, SymbolConfigTable};
//! use chrono::Utc;
//!
//! let mut engine = AnalysisEngine::new(SymbolConfigTable::default(), EngineSettings::default());
//!
//! // Live ticks feed the detector
//! for alert in engine.on_tick("R_100", 1234.56, 1_700_000_000)? {
//!     println!("{alert}");
//! }
//!
//! // History windows feed the classifier
//! let candles: Vec<Candle> = (0..60)
//!     .map(|i| Candle::from_close(1_700_000_000 + i * 60, 1234.0 + i as f64))
//!     .collect();
//! let (analysis, alert) = engine.on_history("R_100", &candles, Utc::now());
//! println!("{} {} {:.2}", analysis.trend, analysis.signal, analysis.confidence);
//! # Ok::<(), sentinel_analysis::AnalysisError>(())
//! ```

pub mod classifier;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod series;
pub mod store;
pub mod types;

// Re-export main types
pub use classifier::{apply_events, classify_range, IndicatorSnapshot, RangeReading, TrendAnalysis, TrendClassifier};
pub use config::{SymbolConfig, SymbolConfigTable};
pub use engine::{Alert, AlertKind, AnalysisEngine, EngineSettings};
pub use error::{AnalysisError, AnalysisResult};
pub use series::{PriceSeries, PushOutcome};
pub use store::{SymbolState, SymbolStateStore};
pub use types::{
    Candle, CrossDirection, CrossoverEvent, DetectorEvent, MaPair, PricePoint, RangeKind,
    ReversalEvent, ReversalType, SignalAction, SuccessEstimate, Symbol, Trend,
};
