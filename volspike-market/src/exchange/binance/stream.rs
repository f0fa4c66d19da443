//! Combined-stream frame parsing.
//!
//! Frames arrive as `{ "stream": <name>, "data": [...] }` envelopes. The
//! two subscribed streams are the full-market 24h ticker array and the
//! full-market mark-price array; `data` is usually an array but a single
//! object is tolerated. One malformed record (or frame) is skipped without
//! affecting the rest of the batch.

use super::{lenient_epoch_ms, lenient_f64};
use crate::store::{FundingObservation, TickerObservation};
use chrono::{DateTime, Utc};
use serde_json::Value;
use smol_str::SmolStr;

/// Ordered funding-rate candidates; the first key holding a finite number
/// wins. The stream multiplexes frame shapes that carry the rate under
/// different keys, and upstream has renamed this field before.
const FUNDING_RATE_KEYS: [&str; 6] = [
    "r",
    "R",
    "fr",
    "lastFundingRate",
    "fundingRate",
    "estimatedSettlePriceRate",
];

/// Ordered price candidates for mark-price records.
const MARK_PRICE_KEYS: [&str; 4] = ["p", "markPrice", "c", "lastPrice"];

/// Ticker fields extracted from one 24h ticker record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerFields {
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub change_24h: Option<f64>,
}

/// Funding fields extracted from one mark-price record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingFields {
    pub rate: f64,
    pub mark_price: Option<f64>,
    pub next_funding_time: Option<i64>,
}

/// One per-symbol mutation extracted from an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolUpdate {
    /// Symbol spelling exactly as received; stores key on this.
    pub raw_symbol: SmolStr,
    pub ticker: Option<TickerFields>,
    pub funding: Option<FundingFields>,
}

impl TickerFields {
    pub fn into_observation(self, received_at: DateTime<Utc>) -> TickerObservation {
        TickerObservation {
            last_price: self.last_price,
            quote_volume_24h: self.quote_volume_24h,
            change_24h: self.change_24h,
            updated_at: received_at,
        }
    }
}

impl FundingFields {
    pub fn into_observation(self, received_at: DateTime<Utc>) -> FundingObservation {
        FundingObservation {
            rate: self.rate,
            mark_price: self.mark_price,
            next_funding_time: self
                .next_funding_time
                .and_then(DateTime::from_timestamp_millis),
            updated_at: received_at,
        }
    }
}

/// Parse one transport payload into per-symbol updates.
///
/// `None` means the payload was not a recognised data frame (undecodable
/// text, missing envelope, or an unsubscribed stream name). `Some(vec![])`
/// means a recognised frame that produced no usable records.
pub fn parse_frame(text: &str) -> Option<Vec<SymbolUpdate>> {
    let envelope: Value = serde_json::from_str(text).ok()?;
    let stream = envelope.get("stream").and_then(Value::as_str)?;

    let parse: fn(&Value) -> Option<SymbolUpdate> = if stream.contains("markPrice") {
        parse_mark_price_record
    } else if stream.contains("ticker") {
        parse_ticker_record
    } else {
        return None;
    };

    let records = match envelope.get("data") {
        Some(Value::Array(records)) => records.as_slice(),
        Some(single @ Value::Object(_)) => std::slice::from_ref(single),
        _ => return Some(Vec::new()),
    };

    Some(records.iter().filter_map(parse).collect())
}

fn parse_ticker_record(record: &Value) -> Option<SymbolUpdate> {
    let raw_symbol = record.get("s").and_then(Value::as_str)?;
    let last_price = record.get("c").and_then(lenient_f64)?;
    let quote_volume_24h = record.get("q").and_then(lenient_f64)?;

    Some(SymbolUpdate {
        raw_symbol: SmolStr::new(raw_symbol),
        ticker: Some(TickerFields {
            last_price,
            quote_volume_24h,
            change_24h: record.get("P").and_then(lenient_f64),
        }),
        // Ticker records have carried funding keys in past stream
        // revisions; extract opportunistically.
        funding: first_finite(record, &FUNDING_RATE_KEYS).map(|rate| FundingFields {
            rate,
            mark_price: None,
            next_funding_time: record.get("T").and_then(lenient_epoch_ms),
        }),
    })
}

fn parse_mark_price_record(record: &Value) -> Option<SymbolUpdate> {
    let raw_symbol = record.get("s").and_then(Value::as_str)?;
    let rate = first_finite(record, &FUNDING_RATE_KEYS)?;

    Some(SymbolUpdate {
        raw_symbol: SmolStr::new(raw_symbol),
        ticker: None,
        funding: Some(FundingFields {
            rate,
            mark_price: first_finite(record, &MARK_PRICE_KEYS),
            next_funding_time: record.get("T").and_then(lenient_epoch_ms),
        }),
    })
}

/// Try each candidate key in order; first finite number wins.
fn first_finite(record: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| record.get(key).and_then(lenient_f64))
}
