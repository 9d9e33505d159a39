//! The cache store contract and its in-memory implementations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::CacheKey;

/// Source of "now" for expiry decisions
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Clock backed by the system time
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Errors raised while writing to or clearing a cache
///
/// Read failures never surface here: a corrupted or unreadable entry is a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry could not be serialized
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A stored response with its freshness metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload
    pub value: Value,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// How long the entry stays fresh
    pub ttl: Duration,
}

impl CacheEntry {
    /// Instant after which the entry is stale
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the entry is stale at `now`; an entry is fresh strictly before
    /// `stored_at + ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Point-in-time summary of a cache's contents
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_count: usize,
    /// Number of entries per endpoint
    pub size_by_endpoint: BTreeMap<String, usize>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    /// Bytes on disk; zero for in-memory stores
    pub total_bytes: u64,
}

impl CacheStats {
    pub(crate) fn record(&mut self, endpoint: &str, entry: &CacheEntry, now: DateTime<Utc>) {
        self.total_entries += 1;
        if entry.is_expired_at(now) {
            self.expired_count += 1;
        }
        *self.size_by_endpoint.entry(endpoint.to_string()).or_default() += 1;

        if self.oldest_entry.map_or(true, |oldest| entry.stored_at < oldest) {
            self.oldest_entry = Some(entry.stored_at);
        }
        if self.newest_entry.map_or(true, |newest| entry.stored_at > newest) {
            self.newest_entry = Some(entry.stored_at);
        }
    }
}

/// Key-value store for fetched responses with per-entry expiry
pub trait CacheStore: Send {
    /// Returns the value for `key` if present and fresh.
    ///
    /// An expired entry reads as a miss but is left in place until the key is
    /// written again or the cache is invalidated.
    fn get(&self, key: &CacheKey) -> Option<Value>;

    /// Stores `value` under `key`, stamped with the current time.
    fn put(&mut self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<(), CacheError>;

    /// Removes every entry for `endpoint`, or everything when `None`.
    /// Returns the number of removed entries.
    fn invalidate(&mut self, endpoint: Option<&str>) -> Result<usize, CacheError>;

    /// Summary of the current contents. Does not mutate the store.
    fn stats(&self) -> CacheStats;
}

/// Process-local cache, used in tests and as a fake for the disk store
#[derive(Clone)]
pub struct MemoryCache {
    entries: HashMap<CacheKey, CacheEntry>,
    clock: Clock,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
        }
    }

    /// Raw entry for `key`, fresh or not
    pub fn entry(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.is_expired_at((self.clock)()) {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&mut self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.clone(),
            stored_at: (self.clock)(),
            ttl,
        };
        self.entries.insert(key.clone(), entry);
        Ok(())
    }

    fn invalidate(&mut self, endpoint: Option<&str>) -> Result<usize, CacheError> {
        let before = self.entries.len();
        match endpoint {
            Some(endpoint) => self.entries.retain(|key, _| key.endpoint() != endpoint),
            None => self.entries.clear(),
        }
        Ok(before - self.entries.len())
    }

    fn stats(&self) -> CacheStats {
        let now = (self.clock)();
        let mut stats = CacheStats::default();
        for (key, entry) in &self.entries {
            stats.record(key.endpoint(), entry, now);
        }
        stats
    }
}

/// Store used when caching is switched off: never hits, never keeps anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn get(&self, _key: &CacheKey) -> Option<Value> {
        None
    }

    fn put(&mut self, _key: &CacheKey, _value: &Value, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate(&mut self, _endpoint: Option<&str>) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Hand-driven clock for tests
#[cfg(test)]
pub(crate) fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<std::sync::Mutex<DateTime<Utc>>>) {
    let now = Arc::new(std::sync::Mutex::new(start));
    let handle = Arc::clone(&now);
    let clock: Clock = Arc::new(move || *handle.lock().unwrap());
    (clock, now)
}
