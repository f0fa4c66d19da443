//! Streaming connection lifecycle.
//!
//! A dedicated task owns the websocket: it connects, decodes frames into
//! symbol updates, and reports lifecycle events to the engine over a
//! channel. Reconnection uses capped exponential backoff. When the connect
//! deadline passes without any attempt ever opening, whether attempts hang
//! or fail fast, the task reports the environment unreachable so the
//! engine can serve cached data; attempts keep going in the background and
//! a later open resumes live streaming.

pub mod transport;

use crate::{
    error::MarketError,
    exchange::binance::stream::{SymbolUpdate, parse_frame},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use transport::MarketTransport;

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    #[default]
    Connecting,
    Live,
    Reconnecting,
    Error,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection health published on a watch channel alongside snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedHealth {
    pub status: FeedStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub messages_received: u64,
    pub reconnect_attempts: u32,
    pub last_published_at: Option<DateTime<Utc>>,
    pub open_interest_as_of: Option<DateTime<Utc>>,
}

/// Lifecycle events reported by the feed task.
#[derive(Debug)]
pub enum FeedEvent {
    /// Transport opened; the reconnect counter has been reset.
    Open,
    /// A decoded frame carrying at least one symbol update.
    Batch(Vec<SymbolUpdate>),
    /// The transport surfaced an error mid-session.
    ProtocolError(MarketError),
    /// Session ended; a reconnect is scheduled. `attempts` counts
    /// consecutive failures since the last successful open.
    Closed { attempts: u32 },
    /// No session has opened and the connect deadline has passed since
    /// the task started. Sent at most once; reconnects continue.
    Unreachable,
}

/// Feed task settings, lifted out of the aggregator config.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

/// Backoff delay before reconnect attempt `attempt` (zero-based).
pub fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let doublings = attempt.min(16);
    base.checked_mul(1u32 << doublings)
        .map_or(cap, |delay| delay.min(cap))
}

/// Run the feed until the engine drops its receiver.
pub async fn run_feed(
    transport: Arc<dyn MarketTransport>,
    config: FeedConfig,
    events: mpsc::Sender<FeedEvent>,
) {
    let started = tokio::time::Instant::now();
    let mut attempts: u32 = 0;
    let mut opened_once = false;
    let mut unreachable_sent = false;

    loop {
        match tokio::time::timeout(config.connect_timeout, transport.connect(&config.url)).await {
            Ok(Ok(mut frames)) => {
                attempts = 0;
                opened_once = true;
                info!(url = %config.url, "stream connected");
                if events.send(FeedEvent::Open).await.is_err() {
                    return;
                }

                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(text) => match parse_frame(&text) {
                            Some(updates) if !updates.is_empty() => {
                                if events.send(FeedEvent::Batch(updates)).await.is_err() {
                                    return;
                                }
                            }
                            Some(_) => {}
                            None => debug!("unrecognised frame shape"),
                        },
                        Err(error) => {
                            warn!(%error, "stream error");
                            if events.send(FeedEvent::ProtocolError(error)).await.is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
                info!("stream closed");
            }
            Ok(Err(error)) => {
                warn!(%error, "stream connect failed");
            }
            Err(_) => {
                warn!(timeout = ?config.connect_timeout, "stream connect timed out");
            }
        }

        // Blocked environment: the connect deadline has passed and no
        // attempt has ever opened. Reported once; reconnects continue.
        if !opened_once && !unreachable_sent && started.elapsed() >= config.connect_timeout {
            unreachable_sent = true;
            warn!(
                elapsed = ?started.elapsed(),
                "stream never opened, treating environment as unreachable"
            );
            if events.send(FeedEvent::Unreachable).await.is_err() {
                return;
            }
        }

        let delay = reconnect_delay(attempts, config.reconnect_base, config.reconnect_cap);
        attempts += 1;
        if events.send(FeedEvent::Closed { attempts }).await.is_err() {
            return;
        }
        debug!(attempts, ?delay, "scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}
