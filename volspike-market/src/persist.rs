//! Cache persistence for warm starts.
//!
//! Snapshots, the open-interest book, and the instrument index are written
//! through a [`CacheStore`] so a restarted process can render immediately
//! from its last known state while live data catches up. Persistence is
//! best-effort: a missing or corrupt document is treated as a cache miss,
//! never as a startup failure.

use crate::error::MarketError;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, fs, io, path::PathBuf};
use tracing::{debug, warn};

/// Cache key for the last published snapshot.
pub const SNAPSHOT_KEY: &str = "volspike.market.snapshot.v1";

/// Cache key for the open-interest book.
pub const OPEN_INTEREST_KEY: &str = "volspike.market.open-interest.v1";

/// Cache key for the instrument index.
pub const INSTRUMENTS_KEY: &str = "volspike.market.instruments.v1";

/// Keyed string storage for cache documents.
///
/// Implementations must tolerate concurrent access from the engine task
/// and any caller inspecting the cache out-of-band.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, MarketError>;
    fn put(&self, key: &str, value: &str) -> Result<(), MarketError>;
}

/// Filesystem-backed store: one file per key under a root directory.
///
/// Writes go through a temporary file and a rename so a crash mid-write
/// leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.root.join(format!("{name}.json"))
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, MarketError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(MarketError::from(error)),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), MarketError> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory store for tests and cache-less deployments.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, MarketError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), MarketError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Read and decode a cached document, logging and returning `None` on any
/// miss, read failure, or decode failure.
pub fn load_cached<T>(store: &dyn CacheStore, key: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let contents = match store.get(key) {
        Ok(Some(contents)) => contents,
        Ok(None) => return None,
        Err(error) => {
            debug!(%key, %error, "cache read failed");
            return None;
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(error) => {
            debug!(%key, %error, "discarding corrupt cache document");
            None
        }
    }
}

/// Encode and write a cache document, logging on failure.
pub fn store_cached<T>(store: &dyn CacheStore, key: &str, value: &T)
where
    T: Serialize,
{
    let encoded = match serde_json::to_string(value) {
        Ok(encoded) => encoded,
        Err(error) => {
            warn!(%key, %error, "cache encode failed");
            return;
        }
    };
    if let Err(error) = store.put(key, &encoded) {
        warn!(%key, %error, "cache write failed");
    }
}
