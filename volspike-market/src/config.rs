//! Aggregator configuration and platform API base discovery.

use crate::{
    exchange::binance::{DEFAULT_REST_URL, DEFAULT_STREAM_URL},
    metadata::DEFAULT_METADATA_TTL,
    open_interest::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_SLACK, DEFAULT_STALE_AFTER},
    tier::Tier,
};
use std::{path::PathBuf, time::Duration};
use tracing::warn;
use url::Url;

/// Hardcoded local-development platform API.
pub const LOCAL_API_URL: &str = "http://localhost:3001";

/// Default steady-state publish debounce.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Bootstrap: first publish waits for this many symbols or the deadline.
pub const DEFAULT_BOOTSTRAP_MIN_SYMBOLS: usize = 50;
pub const DEFAULT_BOOTSTRAP_MAX_WAIT: Duration = Duration::from_secs(1);

/// Connection attempts that fail to open within this window are treated
/// as an unreachable environment rather than a transient drop.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_secs(30);

pub const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_secs(60);

pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 32;

/// Full configuration for a [`MarketAggregator`](crate::MarketAggregator).
///
/// `Default` matches production: Binance USD-M futures upstream, platform
/// API discovered from the environment, free tier, no watchlist.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Combined-stream websocket URL.
    pub stream_url: String,
    /// Exchange REST base for instrument metadata and the ticker warm start.
    pub exchange_rest_url: String,
    /// Explicit platform API base. `None` defers to origin discovery.
    pub api_url: Option<String>,
    /// Optional platform API key, sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// Local-development mode: loopback API bases are accepted.
    pub local: bool,
    /// Cache directory for warm-start documents. `None` keeps cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub tier: Tier,
    /// Raw watchlist symbols, normalized on ingestion.
    pub watchlist: Vec<String>,
    pub debounce: Duration,
    pub bootstrap_min_symbols: usize,
    pub bootstrap_max_wait: Duration,
    pub connect_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub oi_poll_interval: Duration,
    pub oi_poll_slack: Duration,
    pub oi_stale_after: Duration,
    pub oi_watchdog_period: Duration,
    pub metadata_ttl: Duration,
    /// Capacity of the published-snapshot channel; slow consumers drop.
    pub snapshot_channel_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            exchange_rest_url: DEFAULT_REST_URL.to_string(),
            api_url: None,
            api_key: None,
            local: false,
            cache_dir: None,
            tier: Tier::default(),
            watchlist: Vec::new(),
            debounce: DEFAULT_DEBOUNCE,
            bootstrap_min_symbols: DEFAULT_BOOTSTRAP_MIN_SYMBOLS,
            bootstrap_max_wait: DEFAULT_BOOTSTRAP_MAX_WAIT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: DEFAULT_RECONNECT_CAP,
            oi_poll_interval: DEFAULT_POLL_INTERVAL,
            oi_poll_slack: DEFAULT_POLL_SLACK,
            oi_stale_after: DEFAULT_STALE_AFTER,
            oi_watchdog_period: DEFAULT_WATCHDOG_PERIOD,
            metadata_ttl: DEFAULT_METADATA_TTL,
            snapshot_channel_capacity: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}

impl AggregatorConfig {
    /// Defaults overlaid with `VOLSPIKE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = env_string("VOLSPIKE_STREAM_URL") {
            config.stream_url = url;
        }
        if let Some(url) = env_string("VOLSPIKE_EXCHANGE_REST_URL") {
            config.exchange_rest_url = url;
        }
        config.api_url = env_string("VOLSPIKE_API_URL");
        config.api_key = env_string("VOLSPIKE_API_KEY");
        config.cache_dir = env_string("VOLSPIKE_CACHE_DIR").map(PathBuf::from);
        config.local = env_bool("VOLSPIKE_LOCAL");
        config
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_watchlist<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watchlist = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into();
        self
    }

    pub fn with_exchange_rest_url(mut self, url: impl Into<String>) -> Self {
        self.exchange_rest_url = url.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Resolved platform API base for open-interest polls.
    pub fn api_base(&self) -> String {
        resolve_api_base(self.api_url.as_deref(), &self.stream_url, self.local)
    }
}

/// Discover the platform API base.
///
/// Preference order: the explicit configured URL (scheme auto-prefixed,
/// loopback rejected outside local mode), then the origin of the streaming
/// URL with the websocket scheme swapped for HTTP, then the hardcoded
/// local-development default.
pub fn resolve_api_base(api_url: Option<&str>, stream_url: &str, local: bool) -> String {
    if let Some(configured) = api_url {
        let configured = configured.trim();
        if !configured.is_empty() {
            let explicit = if configured.contains("://") {
                configured.to_string()
            } else {
                format!("https://{configured}")
            };
            if local || !is_loopback(&explicit) {
                return explicit.trim_end_matches('/').to_string();
            }
            warn!(url = %explicit, "ignoring loopback api url outside local mode");
        }
    }

    if let Ok(parsed) = Url::parse(stream_url) {
        let scheme = match parsed.scheme() {
            "wss" | "https" => "https",
            "ws" | "http" => "http",
            _ => "",
        };
        if !scheme.is_empty() {
            if let Some(host) = parsed.host_str() {
                return match parsed.port() {
                    Some(port) => format!("{scheme}://{host}:{port}"),
                    None => format!("{scheme}://{host}"),
                };
            }
        }
    }

    LOCAL_API_URL.to_string()
}

fn is_loopback(url: &str) -> bool {
    url.contains("localhost") || url.contains("127.0.0.1") || url.contains("[::1]")
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str) -> bool {
    env_string(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
