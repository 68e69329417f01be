//! Technical indicators
//!
//! Every function here is pure: the result depends only on the window passed
//! in, so callers can recompute on whatever slice of history they hold.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};

use crate::types::Candle;

/// Default RSI lookback
pub const RSI_PERIOD: usize = 14;

/// Lookback of the momentum ratio
pub const MOMENTUM_LOOKBACK: usize = 5;

/// Standard MACD periods
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Default ATR period
pub const ATR_PERIOD: usize = 14;

/// Simple moving average of the last `period` values
pub fn sma(series: &[f64], period: usize) -> Option<f64> {
    if period == 0 || series.len() < period {
        return None;
    }
    let window = &series[series.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Full EMA series
///
/// The first element is the simple average of the first `period` values and
/// corresponds to `series[period - 1]`; each following element applies
/// `ema = price * k + ema * (1 - k)` with `k = 2 / (period + 1)`.
/// Empty when the series is shorter than `period`.
pub fn ema_series(series: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || series.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = series[..period].iter().sum::<f64>() / period as f64;

    let mut values = Vec::with_capacity(series.len() - period + 1);
    values.push(seed);

    let mut ema = seed;
    for price in &series[period..] {
        ema = price * k + ema * (1.0 - k);
        values.push(ema);
    }
    values
}

/// Latest EMA value, `None` if the series is shorter than `period`
pub fn ema(series: &[f64], period: usize) -> Option<f64> {
    ema_series(series, period).last().copied()
}

/// Relative Strength Index with Wilder smoothing
///
/// Returns 50 when the series holds `period` values or fewer, and 100 when
/// the smoothed average loss is zero.
pub fn rsi(series: &[f64], period: usize) -> f64 {
    if period == 0 || series.len() <= period {
        return 50.0;
    }

    let deltas: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    let (gain_sum, loss_sum) = deltas[..period]
        .iter()
        .fold((0.0, 0.0), |(gain, loss), delta| {
            if *delta > 0.0 {
                (gain + delta, loss)
            } else {
                (gain, loss - delta)
            }
        });
    let mut avg_gain = gain_sum / p;
    let mut avg_loss = loss_sum / p;

    for delta in &deltas[period..] {
        let (gain, loss) = if *delta > 0.0 { (*delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Momentum ratio `price[t] / price[t - lookback] - 1`
pub fn momentum(series: &[f64], lookback: usize) -> Option<f64> {
    let n = series.len();
    if lookback == 0 || n <= lookback {
        return None;
    }
    let past = series[n - 1 - lookback];
    if past == 0.0 {
        return None;
    }
    Some(series[n - 1] / past - 1.0)
}

/// True range of every candle
///
/// The first candle has no previous close, so its range is `high - low`.
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    let mut ranges = Vec::with_capacity(candles.len());
    let mut prev_close: Option<f64> = None;

    for candle in candles {
        let range = match prev_close {
            Some(prev) => (candle.high - candle.low)
                .max((candle.high - prev).abs())
                .max((candle.low - prev).abs()),
            None => candle.high - candle.low,
        };
        ranges.push(range);
        prev_close = Some(candle.close);
    }
    ranges
}

/// ATR-style volatility reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volatility {
    /// Average true range in price units
    pub atr: f64,
    /// ATR as a percentage of the median close of the window
    pub normalized: f64,
}

/// Average true range over the last `period` candles
///
/// Needs `period + 1` candles so that every range has a previous close.
pub fn volatility(candles: &[Candle], period: usize, use_ema: bool) -> Option<Volatility> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges = true_ranges(candles);
    let ranges = &ranges[1..];
    let atr = if use_ema {
        ema(ranges, period)?
    } else {
        sma(ranges, period)?
    };

    let closes: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| c.close)
        .collect();
    let median_close = Data::new(closes).median();
    if !median_close.is_finite() || median_close <= 0.0 {
        return None;
    }

    Some(Volatility {
        atr,
        normalized: atr / median_close * 100.0,
    })
}

/// Volatility measured over a period that shrinks for high-priced instruments
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveVolatility {
    pub effective_period: usize,
    pub raw: f64,
    pub normalized: f64,
    /// Change of the normalized reading versus one window earlier
    pub rate_of_change: Option<f64>,
}

/// Adaptive ATR
///
/// When the latest close exceeds `threshold` the period becomes
/// `max(5, floor(period * threshold / last_close))`.
pub fn adaptive_volatility(
    candles: &[Candle],
    period: usize,
    threshold: f64,
) -> Option<AdaptiveVolatility> {
    let last_close = candles.last()?.close;

    let effective_period = if last_close > threshold {
        ((period as f64 * threshold / last_close).floor() as usize).max(5)
    } else {
        period
    };

    let current = volatility(candles, effective_period, true)?;

    let rate_of_change = if candles.len() > effective_period {
        volatility(&candles[..candles.len() - effective_period], effective_period, true)
            .filter(|previous| previous.normalized > 0.0)
            .map(|previous| (current.normalized - previous.normalized) / previous.normalized)
    } else {
        None
    };

    Some(AdaptiveVolatility {
        effective_period,
        raw: current.atr,
        normalized: current.normalized,
        rate_of_change,
    })
}

/// MACD components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl Macd {
    pub fn is_bullish(&self) -> bool {
        self.macd > self.signal && self.macd > 0.0
    }

    pub fn is_bearish(&self) -> bool {
        self.macd < self.signal && self.macd < 0.0
    }
}

/// MACD line, signal line and histogram
///
/// The signal line is the EMA of the trailing MACD series, so the input
/// needs at least `slow + signal_period - 1` values.
pub fn macd(series: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow {
        return None;
    }

    let fast_ema = ema_series(series, fast);
    let slow_ema = ema_series(series, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // fast_ema[i] belongs to series[i + fast - 1], slow_ema[j] to series[j + slow - 1]
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(j, slow_value)| fast_ema[j + offset] - slow_value)
        .collect();

    let signal = ema(&line, signal_period)?;
    let macd = *line.last()?;

    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn closes_to_candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::from_close(i as i64 * 60, *c))
            .collect()
    }

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[10.0, 20.0], 3), None);
        assert_eq!(sma(&[10.0, 20.0, 30.0], 3), Some(20.0));
        assert_eq!(sma(&[10.0, 20.0, 30.0, 40.0], 3), Some(30.0));
    }

    #[test]
    fn test_ema_seed_and_recurrence() {
        assert_eq!(ema(&[1.0, 2.0], 3), None);

        // seed = (1 + 2 + 3) / 3 = 2, k = 0.5, next = 4 * 0.5 + 2 * 0.5 = 3
        let values = ema_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(values.len(), 2);
        assert_relative_eq!(values[0], 2.0);
        assert_relative_eq!(values[1], 3.0);
    }

    #[test]
    fn test_ema_period_one_tracks_price() {
        let series = [5.0, 7.0, 3.0, 9.0];
        assert_eq!(ema(&series, 1), Some(9.0));
    }

    #[test]
    fn test_rsi_short_series_is_neutral() {
        let series: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&series, RSI_PERIOD), 50.0);
    }

    #[test]
    fn test_rsi_without_losses_is_100() {
        let series: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&series, RSI_PERIOD), 100.0);
    }

    #[test]
    fn test_rsi_without_gains_is_0() {
        let series: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_relative_eq!(rsi(&series, RSI_PERIOD), 0.0);
    }

    #[test]
    fn test_rsi_grows_with_gain_share() {
        // Alternate +up / -1 moves; a larger `up` raises the gain/loss ratio
        let build = |up: f64| -> Vec<f64> {
            let mut price = 100.0;
            let mut series = vec![price];
            for i in 0..40 {
                price += if i % 2 == 0 { up } else { -1.0 };
                series.push(price);
            }
            series
        };

        let low = rsi(&build(0.5), RSI_PERIOD);
        let mid = rsi(&build(1.0), RSI_PERIOD);
        let high = rsi(&build(2.0), RSI_PERIOD);
        assert!(low < mid && mid < high);
    }

    #[test]
    fn test_momentum() {
        let series = [100.0, 101.0, 102.0, 103.0, 104.0, 110.0];
        assert_relative_eq!(momentum(&series, 5).unwrap(), 0.1, epsilon = 1e-12);
        assert_eq!(momentum(&series[..5], 5), None);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let candles = vec![
            Candle { epoch: 0, open: 10.0, high: 11.0, low: 9.0, close: 10.0 },
            Candle { epoch: 60, open: 12.0, high: 14.0, low: 13.0, close: 13.5 },
        ];
        let ranges = true_ranges(&candles);
        assert_eq!(ranges, vec![2.0, 4.0]);
    }

    #[test]
    fn test_volatility_on_close_only_candles() {
        // Closes alternate 100 / 101, so every true range is exactly 1
        let closes: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let candles = closes_to_candles(&closes);

        let vol = volatility(&candles, 14, false).unwrap();
        assert_relative_eq!(vol.atr, 1.0);
        assert_relative_eq!(vol.normalized, 1.0 / 100.5 * 100.0, epsilon = 1e-9);

        let vol = volatility(&candles, 14, true).unwrap();
        assert_relative_eq!(vol.atr, 1.0, epsilon = 1e-12);

        assert!(volatility(&candles[..14], 14, true).is_none());
    }

    #[test]
    fn test_adaptive_volatility_shortens_period() {
        let closes: Vec<f64> = (0..60).map(|i| 1000.0 + (i % 3) as f64).collect();
        let candles = closes_to_candles(&closes);

        let below = adaptive_volatility(&candles, 14, 5000.0).unwrap();
        assert_eq!(below.effective_period, 14);

        // floor(14 * 500 / 1002) = 6
        let above = adaptive_volatility(&candles, 14, 500.0).unwrap();
        assert_eq!(above.effective_period, 6);
        assert!(above.rate_of_change.is_some());

        // Never below five candles
        let tiny = adaptive_volatility(&candles, 14, 10.0).unwrap();
        assert_eq!(tiny.effective_period, 5);
    }

    #[test]
    fn test_macd_on_rising_series() {
        let series: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let m = macd(&series, MACD_FAST, MACD_SLOW, MACD_SIGNAL).unwrap();
        assert!(m.macd > 0.0);
        assert_relative_eq!(m.histogram, m.macd - m.signal);

        assert!(macd(&series[..30], MACD_FAST, MACD_SLOW, MACD_SIGNAL).is_none());
    }

    proptest! {
        #[test]
        fn prop_ema_within_bounds(
            series in prop::collection::vec(1.0f64..1000.0, 1..120),
            period in 1usize..40,
        ) {
            let min = series.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            match ema(&series, period) {
                Some(value) => {
                    prop_assert!(series.len() >= period);
                    prop_assert!(value >= min - 1e-9 && value <= max + 1e-9);
                }
                None => prop_assert!(series.len() < period),
            }
        }

        #[test]
        fn prop_rsi_bounded(series in prop::collection::vec(1.0f64..1000.0, 0..120)) {
            let value = rsi(&series, RSI_PERIOD);
            prop_assert!((0.0..=100.0).contains(&value));
        }
    }
}
