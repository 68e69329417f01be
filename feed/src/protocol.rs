//! Wire protocol of the market-data session
//!
//! Outbound requests are plain serde structs. Inbound frames are parsed
//! leniently: prices may arrive as numbers or numeric strings, and
//! anything that is not a history, tick or error envelope is reported as
//! [`InboundMessage::Unexpected`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use sentinel_analysis::Candle;

use crate::error::FeedResult;

/// Streaming tick subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeRequest {
    pub ticks: String,
    pub subscribe: u8,
}

impl SubscribeRequest {
    pub fn new(symbol: &str) -> Self {
        Self {
            ticks: symbol.to_string(),
            subscribe: 1,
        }
    }
}

/// Candle history request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRequest {
    pub ticks_history: String,
    pub adjust_start_time: u8,
    pub count: usize,
    pub end: String,
    pub granularity: u32,
    pub style: String,
}

impl HistoryRequest {
    pub fn new(symbol: &str, count: usize, granularity: u32) -> Self {
        Self {
            ticks_history: symbol.to_string(),
            adjust_start_time: 1,
            count,
            end: "latest".to_string(),
            granularity,
            style: "candles".to_string(),
        }
    }
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Candle history for a symbol
    History { symbol: String, candles: Vec<Candle> },
    /// Streaming price update; `epoch` is absent when the provider omits it
    Tick {
        symbol: String,
        quote: f64,
        epoch: Option<i64>,
    },
    /// Provider error envelope
    Error {
        symbol: Option<String>,
        code: String,
        message: String,
    },
    /// Anything else, with a short description
    Unexpected(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    echo_req: Option<Value>,
    #[serde(default)]
    candles: Option<Vec<RawCandle>>,
    #[serde(default)]
    tick: Option<RawTick>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    #[serde(default)]
    epoch: Option<Value>,
    #[serde(default)]
    open: Option<Value>,
    #[serde(default)]
    high: Option<Value>,
    #[serde(default)]
    low: Option<Value>,
    #[serde(default)]
    close: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTick {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    quote: Option<Value>,
    #[serde(default)]
    epoch: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Number or numeric string
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn echoed_symbol(echo: Option<&Value>) -> Option<String> {
    let echo = echo?;
    ["ticks_history", "ticks"]
        .iter()
        .find_map(|key| echo.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

impl RawCandle {
    /// Candle with missing OHLC fields filled from the close
    ///
    /// An unparseable close becomes NaN so the classifier drops the candle.
    fn into_candle(self) -> Option<Candle> {
        let epoch = self.epoch.as_ref().and_then(integer)?;
        let close = self.close.as_ref().and_then(number).unwrap_or(f64::NAN);
        let field = |v: &Option<Value>| v.as_ref().and_then(number).unwrap_or(close);

        Some(Candle {
            epoch,
            open: field(&self.open),
            high: field(&self.high),
            low: field(&self.low),
            close,
        })
    }
}

impl InboundMessage {
    /// Parse one text frame
    ///
    /// Returns an error only for text that is not a JSON object.
    pub fn parse(text: &str) -> FeedResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let symbol = echoed_symbol(envelope.echo_req.as_ref());

        if let Some(error) = envelope.error {
            return Ok(InboundMessage::Error {
                symbol,
                code: error.code.unwrap_or_else(|| "Unknown".to_string()),
                message: error.message.unwrap_or_default(),
            });
        }

        if let Some(raw) = envelope.candles {
            let Some(symbol) = symbol else {
                return Ok(InboundMessage::Unexpected(
                    "candles without echoed symbol".to_string(),
                ));
            };
            let total = raw.len();
            let candles: Vec<Candle> = raw.into_iter().filter_map(RawCandle::into_candle).collect();
            if candles.len() < total {
                debug!(
                    symbol = %symbol,
                    dropped = total - candles.len(),
                    "Dropped candles without epoch"
                );
            }
            return Ok(InboundMessage::History { symbol, candles });
        }

        if let Some(tick) = envelope.tick {
            let symbol = tick.symbol.or(symbol);
            let quote = tick.quote.as_ref().and_then(number);
            return Ok(match (symbol, quote) {
                (Some(symbol), Some(quote)) => InboundMessage::Tick {
                    symbol,
                    quote,
                    epoch: tick.epoch.as_ref().and_then(integer),
                },
                _ => InboundMessage::Unexpected("tick without symbol or quote".to_string()),
            });
        }

        Ok(InboundMessage::Unexpected(
            envelope
                .msg_type
                .unwrap_or_else(|| "unrecognised payload".to_string()),
        ))
    }
}
