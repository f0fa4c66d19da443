//! Latest-observation stores fed by the streaming connection.
//!
//! Two keyed maps with replace-on-newer semantics and no other eviction.
//! Keys are the raw symbol spelling exactly as received from the transport;
//! reconciliation to canonical symbols happens in the snapshot builder.

use crate::symbol::{self, Symbol};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Latest 24h ticker fields observed for one raw symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerObservation {
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub change_24h: Option<f64>,
    /// Receipt time. Breaks canonical-key collisions deterministically.
    pub updated_at: DateTime<Utc>,
}

/// Latest funding fields observed for one raw symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingObservation {
    /// Funding rate as a fraction.
    pub rate: f64,
    pub mark_price: Option<f64>,
    pub next_funding_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// The live ticker and funding maps.
#[derive(Debug, Default)]
pub struct MarketStores {
    tickers: HashMap<Symbol, TickerObservation>,
    funding: HashMap<Symbol, FundingObservation>,
    /// Canonical forms of every ticker key, kept in lockstep with `tickers`.
    canonical: HashSet<Symbol>,
}

impl MarketStores {
    /// Insert or replace the ticker observation for a raw symbol.
    pub fn upsert_ticker(&mut self, raw: Symbol, observation: TickerObservation) {
        self.canonical.insert(symbol::normalize(&raw));
        self.tickers.insert(raw, observation);
    }

    /// Insert or replace the funding observation for a raw symbol.
    pub fn upsert_funding(&mut self, raw: Symbol, observation: FundingObservation) {
        self.funding.insert(raw, observation);
    }

    /// Warm-start insert: only fills symbols the stream has not yet
    /// delivered, so a stale REST response never rolls back live data.
    /// Returns true when the observation was inserted.
    pub fn fill_missing_ticker(&mut self, raw: Symbol, observation: TickerObservation) -> bool {
        if self.tickers.contains_key(&raw) {
            return false;
        }
        self.upsert_ticker(raw, observation);
        true
    }

    pub fn tickers(&self) -> &HashMap<Symbol, TickerObservation> {
        &self.tickers
    }

    pub fn funding(&self) -> &HashMap<Symbol, FundingObservation> {
        &self.funding
    }

    /// Number of distinct canonical symbols with ticker data.
    pub fn symbol_count(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    /// True once ticker data exists for the canonical symbol.
    pub fn has_canonical(&self, canonical: &str) -> bool {
        self.canonical.contains(canonical)
    }
}
