//! Pure snapshot assembly.
//!
//! `build` joins the ticker and funding stores with the open-interest book
//! and instrument index into one ordered table. It has no side effects and
//! no clock; the engine passes the build instant in, which keeps every
//! ordering and capping rule unit-testable.

use crate::{
    entry::{MarketEntry, MarketSnapshot},
    metadata::InstrumentIndex,
    open_interest::OpenInterestBook,
    store::{FundingObservation, MarketStores, TickerObservation},
    symbol::{self, Symbol},
    tier::Tier,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, hash_map::Entry};

/// Build the ordered, deduplicated market table.
///
/// Raw store keys collapse onto canonical symbols with the newest
/// observation winning. Symbols outside the reference currency, or absent
/// from a populated allow-list, are skipped. Entries sort by 24h volume
/// descending (ties by symbol, keeping output deterministic), watchlist
/// rows float to the front, and the tier cap applies only to the rest.
pub fn build(
    stores: &MarketStores,
    open_interest: &OpenInterestBook,
    instruments: &InstrumentIndex,
    tier: Tier,
    watchlist: &HashSet<Symbol>,
    built_at: DateTime<Utc>,
) -> MarketSnapshot {
    let mut tickers: HashMap<Symbol, &TickerObservation> =
        HashMap::with_capacity(stores.tickers().len());
    for (raw, observation) in stores.tickers() {
        let canonical = symbol::normalize(raw);
        if !symbol::quoted_in_reference(&canonical) || !instruments.allows(&canonical) {
            continue;
        }
        match tickers.entry(canonical) {
            Entry::Occupied(mut slot) => {
                if observation.updated_at > slot.get().updated_at {
                    slot.insert(observation);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(observation);
            }
        }
    }

    let mut funding: HashMap<Symbol, &FundingObservation> =
        HashMap::with_capacity(stores.funding().len());
    for (raw, observation) in stores.funding() {
        match funding.entry(symbol::normalize(raw)) {
            Entry::Occupied(mut slot) => {
                if observation.updated_at > slot.get().updated_at {
                    slot.insert(observation);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(observation);
            }
        }
    }

    let mut entries: Vec<MarketEntry> = tickers
        .into_iter()
        .map(|(canonical, ticker)| {
            let funding_rate = funding.get(&canonical).map_or(0.0, |funding| funding.rate);
            let open_interest_usd = open_interest.usd_for(&canonical);
            let precision = instruments.precision_for(&canonical);
            MarketEntry {
                symbol: canonical,
                price: ticker.last_price,
                volume_24h: ticker.quote_volume_24h,
                change_24h: ticker.change_24h,
                funding_rate,
                open_interest: open_interest_usd,
                timestamp: built_at,
                precision,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.volume_24h
            .total_cmp(&a.volume_24h)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let (mut pinned, others): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|entry| watchlist.contains(&entry.symbol));

    let limit = tier.visible_limit().unwrap_or(usize::MAX);
    pinned.extend(others.into_iter().take(limit));

    debug_assert!(
        {
            let mut seen = HashSet::with_capacity(pinned.len());
            pinned.iter().all(|entry| seen.insert(entry.symbol.clone()))
        },
        "duplicate canonical symbol in snapshot"
    );

    MarketSnapshot {
        entries: pinned,
        updated_at: built_at,
        open_interest_as_of: open_interest.as_of,
    }
}
