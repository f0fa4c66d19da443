//! Live market snapshot aggregation for the VolSpike dashboard.
//!
//! Ingests the combined Binance USD-M futures ticker and mark-price
//! stream, merges boundary-aligned open-interest polls from the platform
//! API, reconciles symbol spellings and display precision against the
//! instrument universe, and publishes debounced, volume-ordered
//! [`MarketSnapshot`]s capped per subscription [`Tier`] with watchlist
//! rows always included.
//!
//! # Architecture
//!
//! A single engine task owns all mutable state and reacts to feed events,
//! completed REST fetches, caller commands, and timers through one
//! `select!` loop ([`aggregator`]). A dedicated feed task owns the
//! websocket lifecycle with capped exponential reconnect backoff
//! ([`feed`]). Snapshot assembly is a pure function ([`snapshot`]), as is
//! the publish gate deciding bootstrap and debounce timing
//! ([`scheduler`]).
//!
//! The aggregator is built to degrade rather than fail: a dropped stream
//! reconnects, an empty open-interest response never clears known data,
//! and an environment where the stream cannot open at all is served the
//! last persisted snapshot from cache ([`persist`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use volspike_market::{AggregatorConfig, MarketAggregator, Tier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AggregatorConfig::from_env()
//!         .with_tier(Tier::Pro)
//!         .with_watchlist(["BTCUSDT", "ETHUSDT"]);
//!
//!     let mut handle = MarketAggregator::new(config).start();
//!     while let Some(snapshot) = handle.recv().await {
//!         println!("{} symbols as of {}", snapshot.len(), snapshot.updated_at);
//!     }
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod entry;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod metadata;
pub mod open_interest;
pub mod persist;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod symbol;
pub mod tier;

pub use aggregator::{AggregatorHandle, MarketAggregator};
pub use config::AggregatorConfig;
pub use entry::{MarketEntry, MarketSnapshot};
pub use error::MarketError;
pub use feed::{FeedHealth, FeedStatus};
pub use tier::Tier;
