//! Instrument metadata: the display allow-list and precision table.
//!
//! Both derive from the same vendor `exchangeInfo` document and share one
//! refresh cadence and cache slot, so they live together. The resolver is
//! best-effort: a failed refresh leaves prior values untouched and never
//! blocks snapshot building.

use crate::{
    error::MarketError,
    exchange::binance::rest::{self, ExchangeInfo},
    symbol::{self, REFERENCE_CURRENCY, Symbol},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

/// Cached for up to one hour before a live refresh is due.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(60 * 60);

/// Tradable universe plus display precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentIndex {
    /// Canonical symbols eligible for display.
    pub allow: HashSet<Symbol>,
    /// Canonical symbol → price display decimals.
    pub precision: HashMap<Symbol, u32>,
    /// Wall-clock time of the last successful refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl InstrumentIndex {
    /// Derive the index from a fetched instrument universe.
    pub fn from_exchange_info(info: &ExchangeInfo, refreshed_at: DateTime<Utc>) -> Self {
        let mut allow = HashSet::with_capacity(info.symbols.len());
        let mut precision = HashMap::with_capacity(info.symbols.len());

        for def in &info.symbols {
            if !def.is_displayable(REFERENCE_CURRENCY) {
                continue;
            }
            let canonical = symbol::normalize(&def.symbol);
            if let Some(tick) = def.tick_size() {
                precision.insert(canonical.clone(), precision_from_tick_size(tick));
            }
            allow.insert(canonical);
        }

        Self {
            allow,
            precision,
            refreshed_at: Some(refreshed_at),
        }
    }

    /// True when the symbol may be displayed. An empty allow-list means no
    /// filtering has been applied yet, so everything passes.
    pub fn allows(&self, canonical: &str) -> bool {
        self.allow.is_empty() || self.allow.contains(canonical)
    }

    /// Display decimals for the symbol, defaulting to 2.
    pub fn precision_for(&self, canonical: &str) -> u32 {
        self.precision.get(canonical).copied().unwrap_or(2)
    }

    /// True when a refresh is due (never refreshed, or older than `ttl`).
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.refreshed_at {
            Some(refreshed_at) => {
                now.signed_duration_since(refreshed_at).num_milliseconds() > ttl.as_millis() as i64
            }
            None => true,
        }
    }
}

/// Display decimals implied by an instrument's price tick size, floored at
/// 2 so coarse-ticked majors still render cents.
pub fn precision_from_tick_size(tick_size: f64) -> u32 {
    let decimals = (-tick_size.log10()).ceil();
    decimals.max(2.0) as u32
}

/// Fetch the instrument universe and derive a fresh index.
pub async fn refresh(
    client: &reqwest::Client,
    rest_base: &str,
) -> Result<InstrumentIndex, MarketError> {
    let info = rest::fetch_exchange_info(client, rest_base).await?;
    Ok(InstrumentIndex::from_exchange_info(&info, Utc::now()))
}
