//! Output data model published to snapshot consumers.

use crate::symbol::Symbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the market table.
///
/// Produced fresh on every snapshot build and never mutated in place.
/// Serialises in camelCase so persisted snapshots stay compatible with the
/// documents the dashboard already caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEntry {
    /// Canonical symbol, e.g. `BTCUSDT`.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: f64,
    /// 24h quote volume in USD.
    pub volume_24h: f64,
    /// 24h price change in percent, when the feed supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    /// Funding rate as a fraction (0.0001 = 0.01%). 0.0 when unknown.
    pub funding_rate: f64,
    /// Open interest in USD notional. 0.0 means unknown, not flat.
    pub open_interest: f64,
    /// Snapshot build time.
    pub timestamp: DateTime<Utc>,
    /// Display decimals for price formatting.
    pub precision: u32,
}

/// One publication: the ordered table plus freshness metadata.
///
/// Doubles as the offline fallback document persisted on every publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub entries: Vec<MarketEntry>,
    /// Wall-clock time the snapshot was built.
    pub updated_at: DateTime<Utc>,
    /// Server timestamp of the open-interest data merged in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest_as_of: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
