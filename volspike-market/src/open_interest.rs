//! Open-interest polling: boundary-aligned scheduling, wholesale
//! replacement, and the empty-response retention policy.
//!
//! The platform API serves a point-in-time map of USD notionals refreshed
//! on 5-minute boundaries. An empty or failed poll must never be read as
//! "all positions are zero"; stale-but-present data always wins over a
//! flash to zero.

use crate::{
    error::MarketError,
    symbol::{self, Symbol},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// Default poll cadence: fixed 5-minute wall-clock boundaries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default slack after each boundary, tolerating upstream publish jitter.
pub const DEFAULT_POLL_SLACK: Duration = Duration::from_secs(15);

/// Default `asOf` age beyond which the watchdog forces a poll.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6 * 60);

/// Point-in-time open interest per canonical symbol, in USD notional.
///
/// One `as_of` covers the whole map; the upstream feed is a snapshot, not
/// per-symbol ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestBook {
    pub notional: HashMap<Symbol, f64>,
    pub as_of: Option<DateTime<Utc>>,
}

impl OpenInterestBook {
    /// USD notional for the symbol; 0.0 means unknown, not flat.
    pub fn usd_for(&self, canonical: &str) -> f64 {
        self.notional.get(canonical).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.notional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notional.is_empty()
    }

    /// True when the watchdog should force an out-of-band poll: data has
    /// never arrived, or `as_of` has aged past `threshold`.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.as_of {
            Some(as_of) => {
                now.signed_duration_since(as_of).num_milliseconds()
                    > threshold.as_millis() as i64
            }
            None => true,
        }
    }
}

/// Wire shape of `GET {base}/api/market/open-interest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenInterestResponse {
    #[serde(default)]
    pub data: HashMap<String, f64>,
    /// Epoch milliseconds of the server-side snapshot.
    #[serde(default, rename = "asOf")]
    pub as_of: Option<i64>,
}

/// Merge policy for a completed poll.
///
/// A usable fetch replaces the book wholesale with normalized keys and a
/// fresh `as_of` (server-supplied, else `now`). An empty fetch, or one
/// whose values are all unusable, returns the current book unchanged;
/// `as_of` is not touched either.
pub fn merge_open_interest(
    current: &OpenInterestBook,
    fetched: OpenInterestResponse,
    now: DateTime<Utc>,
) -> OpenInterestBook {
    let mut notional: HashMap<Symbol, f64> = HashMap::with_capacity(fetched.data.len());
    for (raw, usd) in fetched.data {
        // Negative or non-finite notionals would poison downstream maths.
        if usd.is_finite() && usd >= 0.0 {
            notional.insert(symbol::normalize(&raw), usd);
        }
    }

    if notional.is_empty() {
        return current.clone();
    }

    let as_of = fetched
        .as_of
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(now);

    OpenInterestBook {
        notional,
        as_of: Some(as_of),
    }
}

/// Delay until the next boundary-aligned poll instant.
///
/// Polls land at `k * interval + slack` on the wall clock rather than at
/// fixed periods from process start, matching the upstream refresh
/// schedule.
pub fn next_poll_delay(now: DateTime<Utc>, interval: Duration, slack: Duration) -> Duration {
    let interval_ms = interval.as_millis() as i64;
    if interval_ms <= 0 {
        return slack;
    }
    let slack_ms = slack.as_millis() as i64;
    let into = now.timestamp_millis().rem_euclid(interval_ms);

    let delay_ms = if into < slack_ms {
        slack_ms - into
    } else {
        interval_ms - into + slack_ms
    };
    Duration::from_millis(delay_ms as u64)
}

/// Fetch the open-interest snapshot from the platform API.
pub async fn fetch_open_interest(
    client: &reqwest::Client,
    api_base: &str,
    api_key: Option<&str>,
) -> Result<OpenInterestResponse, MarketError> {
    let url = format!("{}/api/market/open-interest", api_base.trim_end_matches('/'));
    let mut request = client.get(&url);
    if let Some(key) = api_key {
        request = request.header("X-API-Key", key);
    }
    let response = request
        .send()
        .await?
        .error_for_status()?
        .json::<OpenInterestResponse>()
        .await?;
    Ok(response)
}
