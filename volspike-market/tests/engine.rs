//! End-to-end engine scenarios over a scripted transport.
//!
//! Every test runs with the tokio clock paused, so bootstrap windows,
//! debounce deadlines, and reconnect backoff elapse in virtual time and
//! the elapsed assertions are exact.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    ChannelTransport, ConnectOutcome, RECV_TIMEOUT, cached_snapshot, mark_frame, memory_cache,
    test_config, ticker_frame,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use volspike_market::{
    FeedStatus, MarketAggregator, MarketSnapshot, Tier,
    config::DEFAULT_DEBOUNCE,
    open_interest::OpenInterestBook,
    persist::{self, OPEN_INTEREST_KEY, SNAPSHOT_KEY},
    symbol::Symbol,
};

#[tokio::test(start_paused = true)]
async fn bootstrap_publishes_once_threshold_met() {
    let (transport, frames) = ChannelTransport::single_session();
    let cache = memory_cache();
    let mut config = test_config();
    config.bootstrap_min_symbols = 2;

    let mut handle = MarketAggregator::new(config)
        .with_transport(Arc::new(transport))
        .with_cache(cache.clone())
        .start();

    // Funding for BTC lands first; it carries no ticker so the threshold
    // stays unmet.
    frames
        .send(Ok(mark_frame(&[("BTCUSDT", 97_001.0, 0.0001)])))
        .await
        .unwrap();
    // Two USDT tickers cross the threshold. The ETHBTC row has the largest
    // volume of the frame but is not quoted in USDT.
    frames
        .send(Ok(ticker_frame(&[
            ("BTCUSDT", 97_000.5, 2_000_000.0, 2.4),
            ("ETHUSDT", 3_500.25, 1_000_000.0, -1.2),
            ("ETHBTC", 0.036, 9_000_000.0, 0.1),
        ])))
        .await
        .unwrap();

    let snapshot = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("publication not received")
        .expect("engine stopped early");

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.entries[0].symbol, "BTCUSDT");
    assert_eq!(snapshot.entries[0].price, 97_000.5);
    assert_eq!(snapshot.entries[0].volume_24h, 2_000_000.0);
    assert_eq!(snapshot.entries[0].change_24h, Some(2.4));
    assert_eq!(snapshot.entries[0].funding_rate, 0.0001);
    assert_eq!(snapshot.entries[0].open_interest, 0.0);
    assert_eq!(snapshot.entries[0].precision, 2);
    assert_eq!(snapshot.entries[1].symbol, "ETHUSDT");
    assert_eq!(snapshot.entries[1].funding_rate, 0.0);

    // Both rows stamp the snapshot build time.
    assert_eq!(snapshot.entries[0].timestamp, snapshot.updated_at);
    assert_eq!(snapshot.entries[1].timestamp, snapshot.updated_at);
    assert_eq!(snapshot.open_interest_as_of, None);

    let health = handle.health();
    assert_eq!(health.status, FeedStatus::Live);
    // Four symbol records arrived across the two frames.
    assert_eq!(health.messages_received, 4);
    assert!(health.connected_at.is_some());
    assert!(health.last_published_at.is_some());

    // Publications are persisted for the next cold start.
    let cached: Option<MarketSnapshot> = persist::load_cached(cache.as_ref(), SNAPSHOT_KEY);
    assert_eq!(cached.map(|cached| cached.len()), Some(2));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn bootstrap_deadline_flushes_partial_data() {
    let (transport, frames) = ChannelTransport::single_session();
    let mut config = test_config();
    config.bootstrap_min_symbols = 50;
    let started = Instant::now();

    let mut handle = MarketAggregator::new(config)
        .with_transport(Arc::new(transport))
        .with_cache(memory_cache())
        .start();

    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();

    let snapshot = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("publication not received")
        .expect("engine stopped early");

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entries[0].symbol, "BTCUSDT");
    // Published at the bootstrap deadline, not the symbol threshold.
    assert_eq!(started.elapsed(), Duration::from_secs(1));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn steady_state_coalesces_bursts_into_one_publication() {
    let (transport, frames) = ChannelTransport::single_session();
    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(memory_cache())
        .start();

    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();
    let first = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("bootstrap publication not received")
        .expect("engine stopped early");
    assert_eq!(first.len(), 1);

    // A burst of three frames lands inside one debounce window.
    let after_first = Instant::now();
    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_100.0, 2_100_000.0, 2.5)])))
        .await
        .unwrap();
    frames
        .send(Ok(ticker_frame(&[("ETHUSDT", 3_500.25, 1_000_000.0, -1.2)])))
        .await
        .unwrap();
    frames
        .send(Ok(mark_frame(&[("BTCUSDT", 97_101.0, 0.0002)])))
        .await
        .unwrap();

    let second = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("debounced publication not received")
        .expect("engine stopped early");

    assert_eq!(second.len(), 2);
    assert_eq!(after_first.elapsed(), DEFAULT_DEBOUNCE);
    assert_eq!(second.entries[0].symbol, "BTCUSDT");
    assert_eq!(second.entries[0].price, 97_100.0);
    assert_eq!(second.entries[0].funding_rate, 0.0002);
    assert_eq!(second.entries[1].symbol, "ETHUSDT");

    // Quiet stream, no publication.
    assert!(timeout(Duration::from_secs(2), handle.recv()).await.is_err());

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_doubles_until_session_opens() {
    let (frames, frames_rx) = mpsc::channel(8);
    let transport = ChannelTransport::new([
        ConnectOutcome::Refused,
        ConnectOutcome::Refused,
        ConnectOutcome::Refused,
        ConnectOutcome::Session(frames_rx),
    ]);
    let started = Instant::now();

    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(memory_cache())
        .start();

    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();

    let snapshot = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("publication not received")
        .expect("engine stopped early");

    assert_eq!(snapshot.len(), 1);
    // Three failures back off 1s, 2s, 4s before the fourth attempt opens.
    assert_eq!(started.elapsed(), Duration::from_secs(7));

    let health = handle.health();
    assert_eq!(health.status, FeedStatus::Live);
    assert_eq!(health.reconnect_attempts, 0);
    assert_eq!(health.messages_received, 1);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_environment_serves_cached_snapshot() {
    let cache = memory_cache();
    persist::store_cached(
        cache.as_ref(),
        SNAPSHOT_KEY,
        &cached_snapshot("BTCUSDT", 96_500.0),
    );

    let transport = ChannelTransport::new([ConnectOutcome::Hang]);
    let started = Instant::now();

    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(cache)
        .start();

    let snapshot = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("fallback not received")
        .expect("engine stopped early");

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entries[0].symbol, "BTCUSDT");
    assert_eq!(snapshot.entries[0].price, 96_500.0);
    // The connect timeout is the trigger.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(handle.status(), FeedStatus::Error);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn refused_environment_serves_cached_snapshot() {
    let cache = memory_cache();
    persist::store_cached(
        cache.as_ref(),
        SNAPSHOT_KEY,
        &cached_snapshot("BTCUSDT", 96_500.0),
    );

    // Refused at 0s, 1s, and 3s; attempts beyond the script stay refused.
    let transport = ChannelTransport::new([
        ConnectOutcome::Refused,
        ConnectOutcome::Refused,
        ConnectOutcome::Refused,
    ]);
    let started = Instant::now();

    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(cache)
        .start();

    let snapshot = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("fallback not received")
        .expect("engine stopped early");

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entries[0].symbol, "BTCUSDT");
    assert_eq!(snapshot.entries[0].price, 96_500.0);
    // The third refusal lands at the connect deadline without any attempt
    // ever taking 3s itself.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(handle.status(), FeedStatus::Error);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn recovered_stream_resumes_after_cached_fallback() {
    let cache = memory_cache();
    persist::store_cached(
        cache.as_ref(),
        SNAPSHOT_KEY,
        &cached_snapshot("ETHUSDT", 3_400.0),
    );

    let (frames, frames_rx) = mpsc::channel(8);
    let transport = ChannelTransport::new([
        ConnectOutcome::Hang,
        ConnectOutcome::Session(frames_rx),
    ]);
    let started = Instant::now();

    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(cache)
        .start();

    let fallback = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("fallback not received")
        .expect("engine stopped early");
    assert_eq!(fallback.entries[0].symbol, "ETHUSDT");
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(handle.status(), FeedStatus::Error);

    // The next attempt opens after a 1s backoff and live data flows.
    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();
    let live = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("live publication not received")
        .expect("engine stopped early");

    assert_eq!(live.len(), 1);
    assert_eq!(live.entries[0].symbol, "BTCUSDT");
    assert_eq!(started.elapsed(), Duration::from_secs(4));
    assert_eq!(handle.status(), FeedStatus::Live);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn mid_run_connect_hang_backs_off_and_recovers() {
    let cache = memory_cache();
    persist::store_cached(
        cache.as_ref(),
        SNAPSHOT_KEY,
        &cached_snapshot("ETHUSDT", 3_400.0),
    );

    let (first_frames, first_rx) = mpsc::channel(8);
    let (second_frames, second_rx) = mpsc::channel(8);
    let transport = ChannelTransport::new([
        ConnectOutcome::Session(first_rx),
        ConnectOutcome::Hang,
        ConnectOutcome::Session(second_rx),
    ]);
    let started = Instant::now();

    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(cache)
        .start();

    first_frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();
    let first = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("first publication not received")
        .expect("engine stopped early");
    assert_eq!(first.len(), 1);

    // Session ends, the replacement attempt hangs into the 3s connect
    // deadline, and the third attempt opens: 1s backoff + 3s + 2s backoff.
    drop(first_frames);
    second_frames
        .send(Ok(ticker_frame(&[("SOLUSDT", 150.0, 500_000.0, 3.1)])))
        .await
        .unwrap();
    let second = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("post-recovery publication not received")
        .expect("engine stopped early");

    assert_eq!(second.len(), 2);
    assert!(second.entries.iter().any(|entry| entry.symbol == "SOLUSDT"));
    // The cached row never surfaces once a session has opened.
    assert!(second.entries.iter().all(|entry| entry.symbol != "ETHUSDT"));
    assert_eq!(
        started.elapsed(),
        Duration::from_secs(6) + DEFAULT_DEBOUNCE
    );
    assert_eq!(handle.status(), FeedStatus::Live);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn watchlist_change_republishes_and_pins_new_symbol() {
    let (transport, frames) = ChannelTransport::single_session();
    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(memory_cache())
        .start();

    frames
        .send(Ok(ticker_frame(&[
            ("BTCUSDT", 97_000.5, 2_000_000.0, 2.4),
            ("ETHUSDT", 3_500.25, 1_000_000.0, -1.2),
        ])))
        .await
        .unwrap();
    let first = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("bootstrap publication not received")
        .expect("engine stopped early");
    assert_eq!(first.len(), 2);

    // A watchlist update republishes immediately, even though the pinned
    // symbol has no data yet.
    let marker = Instant::now();
    handle.set_watchlist(["solusdt"]).await;
    let second = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("watchlist publication not received")
        .expect("engine stopped early");
    assert_eq!(second.len(), 2);
    assert!(second.entries.iter().all(|entry| entry.symbol != "SOLUSDT"));

    // The pinned symbol's first frame bypasses the debounce window.
    frames
        .send(Ok(ticker_frame(&[("SOLUSDT", 150.0, 500_000.0, 3.1)])))
        .await
        .unwrap();
    let third = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("pinned publication not received")
        .expect("engine stopped early");

    assert_eq!(third.len(), 3);
    assert_eq!(third.entries[0].symbol, "SOLUSDT");
    assert_eq!(third.entries[1].symbol, "BTCUSDT");
    assert_eq!(third.entries[2].symbol, "ETHUSDT");
    assert!(marker.elapsed() < DEFAULT_DEBOUNCE);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn watchlist_bypass_waits_for_ticker_data() {
    let (transport, frames) = ChannelTransport::single_session();
    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(memory_cache())
        .start();

    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();
    let first = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("bootstrap publication not received")
        .expect("engine stopped early");
    assert_eq!(first.len(), 1);

    handle.set_watchlist(["solusdt"]).await;
    let second = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("watchlist publication not received")
        .expect("engine stopped early");
    assert_eq!(second.len(), 1);

    // A funding-only record for the awaited symbol cannot fill a row, so
    // it rides the ordinary debounce window.
    let marker = Instant::now();
    frames
        .send(Ok(mark_frame(&[("SOLUSDT", 150.0, 0.0003)])))
        .await
        .unwrap();
    let third = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("debounced publication not received")
        .expect("engine stopped early");
    assert_eq!(marker.elapsed(), DEFAULT_DEBOUNCE);
    assert!(third.entries.iter().all(|entry| entry.symbol != "SOLUSDT"));

    // The ticker record is what completes the watchlist and skips the
    // debounce.
    let ticker_marker = Instant::now();
    frames
        .send(Ok(ticker_frame(&[("SOLUSDT", 150.0, 500_000.0, 3.1)])))
        .await
        .unwrap();
    let fourth = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("pinned publication not received")
        .expect("engine stopped early");

    assert_eq!(fourth.entries[0].symbol, "SOLUSDT");
    assert_eq!(fourth.entries[0].funding_rate, 0.0003);
    assert!(ticker_marker.elapsed() < DEFAULT_DEBOUNCE);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn hydrated_open_interest_joins_first_publication() {
    let cache = memory_cache();
    let as_of = Utc::now();
    let book = OpenInterestBook {
        notional: HashMap::from([(Symbol::new("BTCUSDT"), 1_230_000_000.0)]),
        as_of: Some(as_of),
    };
    persist::store_cached(cache.as_ref(), OPEN_INTEREST_KEY, &book);

    let (transport, frames) = ChannelTransport::single_session();
    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(cache)
        .start();

    frames
        .send(Ok(ticker_frame(&[("BTCUSDT", 97_000.5, 2_000_000.0, 2.4)])))
        .await
        .unwrap();

    let snapshot = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("publication not received")
        .expect("engine stopped early");

    assert_eq!(snapshot.entries[0].open_interest, 1_230_000_000.0);
    assert_eq!(
        snapshot.open_interest_as_of.map(|t| t.timestamp_millis()),
        Some(as_of.timestamp_millis())
    );

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn tier_change_recaps_visible_rows() {
    let rows: Vec<(String, f64, f64, f64)> = (0..60)
        .map(|index| {
            (
                format!("C{index:02}USDT"),
                10.0 + index as f64,
                1_000_000.0 - index as f64 * 1_000.0,
                0.5,
            )
        })
        .collect();
    let refs: Vec<(&str, f64, f64, f64)> = rows
        .iter()
        .map(|(symbol, price, volume, change)| (symbol.as_str(), *price, *volume, *change))
        .collect();

    let (transport, frames) = ChannelTransport::single_session();
    let mut handle = MarketAggregator::new(test_config())
        .with_transport(Arc::new(transport))
        .with_cache(memory_cache())
        .start();

    frames.send(Ok(ticker_frame(&refs))).await.unwrap();
    let elite = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("publication not received")
        .expect("engine stopped early");
    assert_eq!(elite.len(), 60);

    handle.set_tier(Tier::Free).await;
    let free = timeout(RECV_TIMEOUT, handle.recv())
        .await
        .expect("tier publication not received")
        .expect("engine stopped early");

    assert_eq!(free.len(), 50);
    // Highest-volume rows survive the cap.
    assert_eq!(free.entries[0].symbol, "C00USDT");
    assert_eq!(free.entries[49].symbol, "C49USDT");

    handle.stop().await;
}
