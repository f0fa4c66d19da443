//! Binance USDⓈ-M futures wire formats.
//!
//! The dashboard feed multiplexes the full-market 24h ticker array and the
//! full-market mark-price array over one combined stream. Numeric fields
//! arrive as JSON strings on some endpoints and as numbers on others, so
//! all numeric extraction here is lenient.

use serde_json::Value;

pub mod rest;
pub mod stream;

/// Default combined-stream endpoint for the dashboard feed.
pub const DEFAULT_STREAM_URL: &str =
    "wss://fstream.binance.com/stream?streams=!ticker@arr/!markPrice@arr";

/// Default REST base for instrument metadata and ticker warm-starts.
pub const DEFAULT_REST_URL: &str = "https://fapi.binance.com";

/// Decode a JSON value that may be a number or a numeric string.
///
/// Returns `None` for anything non-finite, so `NaN`/`inf` never enter the
/// stores.
pub(crate) fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|parsed| parsed.is_finite())
}

/// Decode an epoch-milliseconds field that may be a number or a string.
pub(crate) fn lenient_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}
