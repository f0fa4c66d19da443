//! Shared fixtures for aggregator integration tests.
//!
//! The engine is driven end to end through a scripted transport: each
//! connection attempt pops the next [`ConnectOutcome`], and successful
//! sessions replay frames from an in-process channel. All scenarios run
//! under the paused tokio clock, so reconnect backoff and debounce
//! windows elapse instantly in virtual time.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use volspike_market::{
    MarketEntry, MarketSnapshot,
    config::AggregatorConfig,
    error::MarketError,
    feed::transport::{FrameStream, MarketTransport},
    persist::MemoryCacheStore,
    symbol::Symbol,
    tier::Tier,
};

/// Upper bound for any single awaited publication. Virtual time under the
/// paused clock, so it only needs to exceed the longest scripted wait.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(600);

/// Scripted result of one connection attempt.
pub enum ConnectOutcome {
    /// Attempt succeeds; the session yields frames from this channel
    /// until the sender is dropped.
    Session(mpsc::Receiver<Result<String, MarketError>>),
    /// Attempt fails immediately, as a refused socket would.
    Refused,
    /// Attempt never resolves, tripping the connect timeout.
    Hang,
}

/// Transport replaying a fixed script of connection outcomes. Attempts
/// beyond the script are refused.
pub struct ChannelTransport {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
}

impl ChannelTransport {
    pub fn new(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
        }
    }

    /// Script a single session and hand back its frame sender.
    pub fn single_session() -> (Self, mpsc::Sender<Result<String, MarketError>>) {
        let (frames_tx, frames_rx) = mpsc::channel(64);
        let transport = Self::new([ConnectOutcome::Session(frames_rx)]);
        (transport, frames_tx)
    }
}

#[async_trait]
impl MarketTransport for ChannelTransport {
    async fn connect(&self, _url: &str) -> Result<FrameStream, MarketError> {
        match self.outcomes.lock().await.pop_front() {
            Some(ConnectOutcome::Session(frames_rx)) => {
                Ok(Box::pin(ReceiverStream::new(frames_rx)))
            }
            Some(ConnectOutcome::Hang) => future::pending().await,
            Some(ConnectOutcome::Refused) | None => {
                Err(MarketError::Transport("connection refused".to_string()))
            }
        }
    }
}

/// Combined-stream 24h ticker frame. Rows are
/// `(symbol, last_price, quote_volume, change_pct)`.
pub fn ticker_frame(rows: &[(&str, f64, f64, f64)]) -> String {
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|(symbol, last, volume, change)| {
            serde_json::json!({
                "e": "24hrTicker",
                "s": symbol,
                "c": last.to_string(),
                "q": volume.to_string(),
                "P": change.to_string(),
            })
        })
        .collect();
    serde_json::json!({ "stream": "!ticker@arr", "data": records }).to_string()
}

/// Combined-stream mark-price frame. Rows are
/// `(symbol, mark_price, funding_rate)`.
pub fn mark_frame(rows: &[(&str, f64, f64)]) -> String {
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|(symbol, mark, rate)| {
            serde_json::json!({
                "e": "markPriceUpdate",
                "s": symbol,
                "p": mark.to_string(),
                "r": rate.to_string(),
                "T": 1_700_000_000_000_i64,
            })
        })
        .collect();
    serde_json::json!({ "stream": "!markPrice@arr", "data": records }).to_string()
}

/// One-row snapshot for seeding the fallback cache.
pub fn cached_snapshot(symbol: &str, price: f64) -> MarketSnapshot {
    let seeded_at = Utc::now();
    MarketSnapshot {
        entries: vec![MarketEntry {
            symbol: Symbol::new(symbol),
            price,
            volume_24h: 1_800_000.0,
            change_24h: Some(1.8),
            funding_rate: 0.0001,
            open_interest: 0.0,
            timestamp: seeded_at,
            precision: 2,
        }],
        updated_at: seeded_at,
        open_interest_as_of: None,
    }
}

/// Config pointing every network surface at a dead local port so REST
/// fetches fail fast and no test traffic leaves the process. Bootstrap
/// threshold drops to one symbol; scenarios raise it when they exercise
/// the accumulation window.
pub fn test_config() -> AggregatorConfig {
    let mut config = AggregatorConfig::default()
        .with_stream_url("ws://127.0.0.1:1/stream")
        .with_exchange_rest_url("http://127.0.0.1:1")
        .with_api_url("http://127.0.0.1:1")
        .with_local(true)
        .with_tier(Tier::Elite);
    config.bootstrap_min_symbols = 1;
    config.bootstrap_max_wait = Duration::from_secs(1);
    config
}

/// Empty in-memory cache, shareable with the engine for post-run
/// inspection.
pub fn memory_cache() -> Arc<MemoryCacheStore> {
    Arc::new(MemoryCacheStore::new())
}
