//! The aggregator engine.
//!
//! One task owns every piece of mutable state (stores, open-interest book,
//! instrument index, publish gate) and reacts to four input sources inside
//! a single `select!` loop: feed events, completed background fetches,
//! caller commands, and timers. REST calls run on spawned tasks and feed
//! their results back through a channel, so the loop itself never blocks
//! and the shared maps need no locks.
//!
//! Within one inbound frame, every store mutation lands before a publish
//! is considered, so a snapshot always reflects whole frames. Snapshots
//! leave through a bounded channel in build order; when the consumer lags,
//! publications are dropped rather than queued without bound.

use crate::{
    config::AggregatorConfig,
    entry::MarketSnapshot,
    exchange::binance::{
        rest::{self, Ticker24h},
        stream::SymbolUpdate,
    },
    feed::{
        self, FeedConfig, FeedEvent, FeedHealth, FeedStatus,
        transport::{MarketTransport, WsTransport},
    },
    metadata::{self, InstrumentIndex},
    open_interest::{self, OpenInterestBook, OpenInterestResponse},
    persist::{
        self, CacheStore, FileCacheStore, INSTRUMENTS_KEY, MemoryCacheStore, OPEN_INTEREST_KEY,
        SNAPSHOT_KEY,
    },
    scheduler::{GateDecision, PublishGate},
    snapshot,
    store::MarketStores,
    symbol::{self, Symbol},
    tier::Tier,
};
use chrono::Utc;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, mpsc::error::TrySendError, watch},
    task::JoinHandle,
    time::{Instant, interval_at, sleep_until},
};
use tracing::{debug, info, warn};

const FEED_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 16;
const FETCH_CHANNEL_CAPACITY: usize = 16;

/// Cadence of the instrument-index TTL check. The index refreshes only
/// when actually stale, so this can fire much more often than the TTL.
const METADATA_CHECK_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Control messages accepted by a running engine.
#[derive(Debug)]
enum Command {
    SetTier(Tier),
    SetWatchlist(Vec<String>),
    Stop,
}

/// Completed background fetches, `None` when the fetch failed.
#[derive(Debug)]
enum FetchResult {
    Instruments(Option<InstrumentIndex>),
    OpenInterest(Option<OpenInterestResponse>),
    WarmStart(Option<Vec<Ticker24h>>),
}

/// Live market snapshot aggregator.
///
/// Construct with a config, optionally swap the transport or cache store,
/// then [`start`](Self::start) to spawn the engine and receive snapshots
/// through the returned handle.
pub struct MarketAggregator {
    config: AggregatorConfig,
    transport: Arc<dyn MarketTransport>,
    cache: Arc<dyn CacheStore>,
}

impl MarketAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let cache: Arc<dyn CacheStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FileCacheStore::new(dir)),
            None => Arc::new(MemoryCacheStore::new()),
        };
        Self {
            config,
            transport: Arc::new(WsTransport),
            cache,
        }
    }

    /// Replace the streaming transport. Tests drive the engine with
    /// scripted transports through this seam.
    pub fn with_transport(mut self, transport: Arc<dyn MarketTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the cache store chosen from the config.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Spawn the feed and engine tasks.
    pub fn start(self) -> AggregatorHandle {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.config.snapshot_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        let (health_tx, health_rx) = watch::channel(FeedHealth::default());

        let feed_config = FeedConfig {
            url: self.config.stream_url.clone(),
            connect_timeout: self.config.connect_timeout,
            reconnect_base: self.config.reconnect_base,
            reconnect_cap: self.config.reconnect_cap,
        };
        let feed_task = tokio::spawn(feed::run_feed(
            Arc::clone(&self.transport),
            feed_config,
            feed_tx,
        ));

        let engine = Engine::new(self.config, self.cache, snapshot_tx, health_tx, fetch_tx);
        let task = tokio::spawn(engine.run(feed_rx, command_rx, fetch_rx, feed_task));

        AggregatorHandle {
            snapshots: snapshot_rx,
            health: health_rx,
            commands: command_tx,
            task,
        }
    }
}

/// Caller-side handle to a running aggregator.
pub struct AggregatorHandle {
    snapshots: mpsc::Receiver<MarketSnapshot>,
    health: watch::Receiver<FeedHealth>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Receive the next published snapshot. `None` after shutdown.
    pub async fn recv(&mut self) -> Option<MarketSnapshot> {
        self.snapshots.recv().await
    }

    /// Current connection health document.
    pub fn health(&self) -> FeedHealth {
        self.health.borrow().clone()
    }

    pub fn status(&self) -> FeedStatus {
        self.health.borrow().status
    }

    /// Change the visibility tier; takes effect on the next publication.
    pub async fn set_tier(&self, tier: Tier) {
        let _ = self.commands.send(Command::SetTier(tier)).await;
    }

    /// Replace the watchlist. Raw spellings are accepted and normalized.
    pub async fn set_watchlist<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = symbols.into_iter().map(Into::into).collect();
        let _ = self.commands.send(Command::SetWatchlist(symbols)).await;
    }

    /// Stop the engine and wait for both tasks to wind down.
    pub async fn stop(self) {
        let Self { commands, task, .. } = self;
        if commands.send(Command::Stop).await.is_err() {
            task.abort();
        }
        let _ = task.await;
    }
}

struct Engine {
    config: AggregatorConfig,
    api_base: String,
    cache: Arc<dyn CacheStore>,
    http: reqwest::Client,
    stores: MarketStores,
    open_interest: OpenInterestBook,
    instruments: InstrumentIndex,
    tier: Tier,
    watchlist: HashSet<Symbol>,
    /// Watchlist symbols not yet present in the stores. Draining this set
    /// within a frame triggers the immediate-publish bypass.
    missing_watchlist: HashSet<Symbol>,
    gate: PublishGate,
    health: FeedHealth,
    health_tx: watch::Sender<FeedHealth>,
    snapshot_tx: mpsc::Sender<MarketSnapshot>,
    fetch_tx: mpsc::Sender<FetchResult>,
    oi_in_flight: bool,
    metadata_in_flight: bool,
    warm_start_in_flight: bool,
    published_any: bool,
    fallback_done: bool,
}

impl Engine {
    fn new(
        config: AggregatorConfig,
        cache: Arc<dyn CacheStore>,
        snapshot_tx: mpsc::Sender<MarketSnapshot>,
        health_tx: watch::Sender<FeedHealth>,
        fetch_tx: mpsc::Sender<FetchResult>,
    ) -> Self {
        let api_base = config.api_base();
        let watchlist: HashSet<Symbol> =
            config.watchlist.iter().map(|raw| symbol::normalize(raw)).collect();
        let gate = PublishGate::new(
            Instant::now(),
            config.bootstrap_min_symbols,
            config.bootstrap_max_wait,
            config.debounce,
        );

        let mut health = FeedHealth::default();

        // Hydrate from cache so a restart has data before the first fetch.
        let open_interest = persist::load_cached::<OpenInterestBook>(cache.as_ref(), OPEN_INTEREST_KEY)
            .unwrap_or_default();
        health.open_interest_as_of = open_interest.as_of;

        let instruments = persist::load_cached::<InstrumentIndex>(cache.as_ref(), INSTRUMENTS_KEY)
            .filter(|index| {
                let fresh = !index.is_stale(config.metadata_ttl, Utc::now());
                if !fresh {
                    debug!("cached instrument index expired");
                }
                fresh
            })
            .unwrap_or_default();

        Self {
            api_base,
            tier: config.tier,
            watchlist,
            missing_watchlist: HashSet::new(),
            config,
            cache,
            http: reqwest::Client::new(),
            stores: MarketStores::default(),
            open_interest,
            instruments,
            gate,
            health,
            health_tx,
            snapshot_tx,
            fetch_tx,
            oi_in_flight: false,
            metadata_in_flight: false,
            warm_start_in_flight: false,
            published_any: false,
            fallback_done: false,
        }
    }

    async fn run(
        mut self,
        mut feed_rx: mpsc::Receiver<FeedEvent>,
        mut command_rx: mpsc::Receiver<Command>,
        mut fetch_rx: mpsc::Receiver<FetchResult>,
        feed_task: JoinHandle<()>,
    ) {
        info!(api_base = %self.api_base, tier = self.tier.as_str(), "market aggregator started");
        self.push_health();

        if self.instruments.is_stale(self.config.metadata_ttl, Utc::now()) {
            self.spawn_metadata_refresh();
        }

        let mut poll_at = Instant::now() + self.next_poll_delay();
        let mut watchdog = interval_at(
            Instant::now() + self.config.oi_watchdog_period,
            self.config.oi_watchdog_period,
        );
        let mut metadata_check =
            interval_at(Instant::now() + METADATA_CHECK_PERIOD, METADATA_CHECK_PERIOD);
        let mut feed_open = true;

        loop {
            tokio::select! {
                event = feed_rx.recv(), if feed_open => match event {
                    Some(event) => self.on_feed_event(event),
                    None => feed_open = false,
                },
                command = command_rx.recv() => match command {
                    Some(Command::SetTier(tier)) => self.on_set_tier(tier),
                    Some(Command::SetWatchlist(symbols)) => self.on_set_watchlist(symbols),
                    Some(Command::Stop) | None => break,
                },
                result = fetch_rx.recv() => {
                    if let Some(result) = result {
                        self.on_fetch_result(result);
                    }
                }
                _ = sleep_until(poll_at) => {
                    self.spawn_open_interest_poll();
                    poll_at = Instant::now() + self.next_poll_delay();
                }
                _ = watchdog.tick() => {
                    if self.open_interest.is_stale(self.config.oi_stale_after, Utc::now()) {
                        debug!("open interest stale, forcing poll");
                        self.spawn_open_interest_poll();
                    }
                }
                _ = metadata_check.tick() => {
                    if self.instruments.is_stale(self.config.metadata_ttl, Utc::now()) {
                        self.spawn_metadata_refresh();
                    }
                }
                _ = maybe_deadline(self.gate.deadline()) => {
                    if self.gate.on_deadline(self.stores.symbol_count()) == GateDecision::PublishNow {
                        self.publish("scheduled");
                    }
                }
            }
        }

        feed_task.abort();
        info!("market aggregator stopped");
    }

    fn on_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Open => {
                let now = Utc::now();
                self.health.status = FeedStatus::Live;
                self.health.connected_at = Some(now);
                self.health.reconnect_attempts = 0;
                self.push_health();

                // The bootstrap window runs from connect, not construction.
                if !self.published_any {
                    self.gate = PublishGate::new(
                        Instant::now(),
                        self.config.bootstrap_min_symbols,
                        self.config.bootstrap_max_wait,
                        self.config.debounce,
                    );
                }
                if self.instruments.is_stale(self.config.metadata_ttl, now) {
                    self.spawn_metadata_refresh();
                }
                self.spawn_warm_start();
                self.spawn_open_interest_poll();
            }
            FeedEvent::Batch(updates) => self.on_batch(updates),
            FeedEvent::ProtocolError(error) => {
                warn!(%error, "transport error");
                self.health.status = FeedStatus::Error;
                self.push_health();
            }
            FeedEvent::Closed { attempts } => {
                // Unreachable-environment status holds until a session
                // opens; backoff keeps running underneath it.
                if self.health.connected_at.is_some() || self.health.status != FeedStatus::Error {
                    self.health.status = FeedStatus::Reconnecting;
                }
                self.health.reconnect_attempts = attempts;
                self.push_health();
            }
            FeedEvent::Unreachable => self.on_unreachable(),
        }
    }

    /// Apply one decoded frame. All store writes land before any publish
    /// decision, so published snapshots never straddle a frame.
    fn on_batch(&mut self, updates: Vec<SymbolUpdate>) {
        let received_at = Utc::now();
        let update_count = updates.len() as u64;
        let mut watchlist_completed = false;

        for update in updates {
            let SymbolUpdate {
                raw_symbol,
                ticker,
                funding,
            } = update;

            if let Some(fields) = ticker {
                // A watch symbol counts as arrived only once a ticker row
                // lands; funding-only records leave the bypass armed.
                if !self.missing_watchlist.is_empty() {
                    let canonical = symbol::normalize(&raw_symbol);
                    if self.missing_watchlist.remove(&canonical)
                        && self.missing_watchlist.is_empty()
                    {
                        watchlist_completed = true;
                    }
                }
                self.stores
                    .upsert_ticker(raw_symbol.clone(), fields.into_observation(received_at));
            }
            if let Some(fields) = funding {
                self.stores
                    .upsert_funding(raw_symbol, fields.into_observation(received_at));
            }
        }

        self.health.last_message_at = Some(received_at);
        self.health.messages_received += update_count;
        self.push_health();

        if watchlist_completed {
            debug!("watchlist complete, bypassing debounce");
            self.gate.bypass();
            self.publish("watchlist");
        } else {
            self.request_publish();
        }
    }

    fn on_set_tier(&mut self, tier: Tier) {
        if self.tier == tier {
            return;
        }
        info!(tier = tier.as_str(), "tier updated");
        self.tier = tier;
        if self.published_any {
            self.gate.bypass();
            self.publish("tier");
        }
    }

    fn on_set_watchlist(&mut self, raw: Vec<String>) {
        let watchlist: HashSet<Symbol> = raw.iter().map(|raw| symbol::normalize(raw)).collect();
        if watchlist == self.watchlist {
            return;
        }
        self.missing_watchlist = watchlist
            .iter()
            .filter(|canonical| !self.stores.has_canonical(canonical))
            .cloned()
            .collect();
        info!(
            symbols = watchlist.len(),
            missing = self.missing_watchlist.len(),
            "watchlist updated"
        );
        self.watchlist = watchlist;
        if self.published_any {
            self.gate.bypass();
            self.publish("watchlist");
        }
    }

    fn on_fetch_result(&mut self, result: FetchResult) {
        match result {
            FetchResult::OpenInterest(response) => {
                self.oi_in_flight = false;
                let Some(response) = response else { return };
                let merged =
                    open_interest::merge_open_interest(&self.open_interest, response, Utc::now());
                if merged == self.open_interest {
                    debug!("open interest unchanged");
                    return;
                }
                debug!(symbols = merged.len(), "open interest merged");
                self.open_interest = merged;
                self.health.open_interest_as_of = self.open_interest.as_of;
                persist::store_cached(self.cache.as_ref(), OPEN_INTEREST_KEY, &self.open_interest);
                self.push_health();
                if self.published_any {
                    self.publish("open-interest");
                } else {
                    self.request_publish();
                }
            }
            FetchResult::Instruments(index) => {
                self.metadata_in_flight = false;
                let Some(index) = index else { return };
                info!(instruments = index.allow.len(), "instrument index refreshed");
                persist::store_cached(self.cache.as_ref(), INSTRUMENTS_KEY, &index);
                self.instruments = index;
                if self.published_any {
                    self.publish("instruments");
                }
            }
            FetchResult::WarmStart(rows) => {
                self.warm_start_in_flight = false;
                let Some(rows) = rows else { return };
                let received_at = Utc::now();
                let mut filled = 0usize;
                for row in rows {
                    let Some((raw, observation)) = row.into_observation(received_at) else {
                        continue;
                    };
                    if self.stores.fill_missing_ticker(raw, observation) {
                        filled += 1;
                    }
                }
                if filled > 0 {
                    debug!(filled, "warm start filled missing symbols");
                    self.request_publish();
                }
            }
        }
    }

    /// Cached-data fallback for an environment where the stream never
    /// opens. Fires at most once, and only before any live publication.
    fn on_unreachable(&mut self) {
        self.health.status = FeedStatus::Error;
        self.push_health();
        if self.fallback_done || self.published_any {
            return;
        }
        self.fallback_done = true;
        match persist::load_cached::<MarketSnapshot>(self.cache.as_ref(), SNAPSHOT_KEY) {
            Some(cached) => {
                warn!(
                    symbols = cached.len(),
                    "stream unreachable, serving cached snapshot"
                );
                self.health.last_published_at = Some(Utc::now());
                self.push_health();
                self.send_snapshot(cached);
            }
            None => warn!("stream unreachable and no cached snapshot available"),
        }
    }

    fn request_publish(&mut self) {
        match self.gate.on_data(Instant::now(), self.stores.symbol_count()) {
            GateDecision::PublishNow => self.publish("accumulated"),
            GateDecision::Wait | GateDecision::Hold => {}
        }
    }

    fn publish(&mut self, reason: &'static str) {
        let built_at = Utc::now();
        let snapshot = snapshot::build(
            &self.stores,
            &self.open_interest,
            &self.instruments,
            self.tier,
            &self.watchlist,
            built_at,
        );
        if snapshot.is_empty() && !self.published_any {
            debug!("suppressing empty first snapshot");
            return;
        }
        persist::store_cached(self.cache.as_ref(), SNAPSHOT_KEY, &snapshot);
        self.health.last_published_at = Some(built_at);
        self.push_health();
        debug!(reason, symbols = snapshot.len(), "publishing snapshot");
        self.send_snapshot(snapshot);
        self.published_any = true;
    }

    fn send_snapshot(&mut self, snapshot: MarketSnapshot) {
        match self.snapshot_tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("snapshot consumer lagging, dropping publication");
            }
            Err(TrySendError::Closed(_)) => debug!("snapshot consumer gone"),
        }
    }

    fn push_health(&self) {
        let _ = self.health_tx.send(self.health.clone());
    }

    fn next_poll_delay(&self) -> Duration {
        open_interest::next_poll_delay(
            Utc::now(),
            self.config.oi_poll_interval,
            self.config.oi_poll_slack,
        )
    }

    fn spawn_open_interest_poll(&mut self) {
        if self.oi_in_flight {
            return;
        }
        self.oi_in_flight = true;
        let client = self.http.clone();
        let api_base = self.api_base.clone();
        let api_key = self.config.api_key.clone();
        let results = self.fetch_tx.clone();
        tokio::spawn(async move {
            let response =
                match open_interest::fetch_open_interest(&client, &api_base, api_key.as_deref())
                    .await
                {
                    Ok(response) => Some(response),
                    Err(error) => {
                        warn!(%error, "open interest poll failed");
                        None
                    }
                };
            let _ = results.send(FetchResult::OpenInterest(response)).await;
        });
    }

    fn spawn_metadata_refresh(&mut self) {
        if self.metadata_in_flight {
            return;
        }
        self.metadata_in_flight = true;
        let client = self.http.clone();
        let rest_base = self.config.exchange_rest_url.clone();
        let results = self.fetch_tx.clone();
        tokio::spawn(async move {
            let index = match metadata::refresh(&client, &rest_base).await {
                Ok(index) => Some(index),
                Err(error) => {
                    warn!(%error, "instrument refresh failed");
                    None
                }
            };
            let _ = results.send(FetchResult::Instruments(index)).await;
        });
    }

    fn spawn_warm_start(&mut self) {
        if self.warm_start_in_flight {
            return;
        }
        self.warm_start_in_flight = true;
        let client = self.http.clone();
        let rest_base = self.config.exchange_rest_url.clone();
        let results = self.fetch_tx.clone();
        tokio::spawn(async move {
            let rows = match rest::fetch_ticker_24h(&client, &rest_base).await {
                Ok(rows) => Some(rows),
                Err(error) => {
                    warn!(%error, "ticker warm start failed");
                    None
                }
            };
            let _ = results.send(FetchResult::WarmStart(rows)).await;
        });
    }
}

/// Sleep until the gate's deadline, or forever when none is armed.
async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
