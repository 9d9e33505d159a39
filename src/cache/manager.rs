//! Cache manager for persisting API responses to disk
//!
//! Provides a `CacheManager` that stores each response as a JSON file with its
//! storage timestamp and TTL, so the cache survives process restarts.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::store::{system_clock, CacheEntry, CacheError, CacheStats, CacheStore, Clock};
use super::CacheKey;

const ENTRY_EXTENSION: &str = "json";

/// Wrapper struct for cached data stored on disk
///
/// The key is stored alongside the payload so entries can be attributed to
/// their endpoint without decoding file names.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
    key: CacheKey,
    stored_at: DateTime<Utc>,
    ttl: Duration,
    data: T,
}

/// Manages reading and writing cached responses on disk
///
/// Entries live under `<cache_dir>/<endpoint>/<params>.json` (`~/.cache/pitwall/`
/// on Linux). Both path components are escaped so distinct endpoint/parameter
/// combinations never share a file. Writes go to a temporary sibling file that
/// is then renamed over the target, so a concurrent reader sees either the old
/// entry or the new one.
#[derive(Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    clock: Clock,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Creates a new CacheManager using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        Self::default_dir().map(Self::with_dir)
    }

    /// Per-user default location for the cache
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "pitwall")?;
        Some(project_dirs.cache_dir().to_path_buf())
    }

    /// Creates a new CacheManager with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            clock: system_clock(),
        }
    }

    /// Replaces the clock used for timestamps and expiry checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn endpoint_dir(&self, endpoint: &str) -> PathBuf {
        self.cache_dir.join(CacheKey::endpoint_dir_name(endpoint))
    }

    /// Returns the path to the cache file for the given key
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.endpoint_dir(key.endpoint())
            .join(format!("{}.{}", key.file_stem(), ENTRY_EXTENSION))
    }

    /// Reads and decodes one entry file. Anything unreadable is logged and
    /// reported as absent.
    fn read_entry(&self, path: &Path) -> Option<StoredEntry<Value>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache entry, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupted cache entry, treating as miss");
                None
            }
        }
    }

    /// Decodes `path` only if it is one of our entries stored at its own key's
    /// location. Files that are not (user files in a shared directory,
    /// corrupted entries) yield `None` without a warning.
    fn owned_entry(&self, path: &Path) -> Option<StoredEntry<Value>> {
        let content = fs::read_to_string(path).ok()?;
        let stored: StoredEntry<Value> = serde_json::from_str(&content).ok()?;
        (self.cache_path(&stored.key) == path).then_some(stored)
    }

    /// All entry files in one endpoint directory
    fn entry_files(dir: &Path) -> Vec<PathBuf> {
        let Ok(read_dir) = fs::read_dir(dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
            .collect()
    }

    /// All endpoint directories under the cache root
    fn endpoint_dirs(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect()
    }

    /// Removes our entry files from one endpoint directory, then the
    /// directory itself if nothing else is left in it. Foreign files stay.
    fn clear_dir(&self, dir: &Path, endpoint: Option<&str>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in Self::entry_files(dir) {
            let Some(stored) = self.owned_entry(&path) else {
                debug!(path = %path.display(), "Skipping file that is not a cache entry");
                continue;
            };
            if endpoint.is_some_and(|endpoint| stored.key.endpoint() != endpoint) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(CacheError::Io { path, source }),
            }
        }
        // Only succeeds when empty; leftover temp or foreign files keep it
        if dir != self.cache_dir {
            let _ = fs::remove_dir(dir);
        }
        Ok(removed)
    }
}

impl CacheStore for CacheManager {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        let path = self.cache_path(key);
        let Some(stored) = self.read_entry(&path) else {
            debug!(key = %key, "Cache miss");
            return None;
        };

        if &stored.key != key {
            warn!(path = %path.display(), key = %key, "Cache entry belongs to another key, treating as miss");
            return None;
        }

        let entry = CacheEntry {
            value: stored.data,
            stored_at: stored.stored_at,
            ttl: stored.ttl,
        };
        if entry.is_expired_at((self.clock)()) {
            debug!(key = %key, stored_at = %entry.stored_at, "Cached entry expired");
            return None;
        }

        debug!(key = %key, "Cache hit");
        Some(entry.value)
    }

    fn put(&mut self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let dir = self.endpoint_dir(key.endpoint());
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let entry = StoredEntry {
            key: key.clone(),
            stored_at: (self.clock)(),
            ttl,
            data: value,
        };
        let json = serde_json::to_vec_pretty(&entry)?;

        let path = self.cache_path(key);
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached response");
        Ok(())
    }

    fn invalidate(&mut self, endpoint: Option<&str>) -> Result<usize, CacheError> {
        let removed = match endpoint {
            Some(endpoint) => self.clear_dir(&self.endpoint_dir(endpoint), Some(endpoint))?,
            None => {
                let mut removed = 0;
                for dir in self.endpoint_dirs() {
                    removed += self.clear_dir(&dir, None)?;
                }
                removed
            }
        };
        debug!(endpoint = endpoint.unwrap_or("*"), removed, "Invalidated cache entries");
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        let now = (self.clock)();
        let mut stats = CacheStats::default();

        for dir in self.endpoint_dirs() {
            for path in Self::entry_files(&dir) {
                let Some(stored) = self.owned_entry(&path) else {
                    continue;
                };
                let entry = CacheEntry {
                    value: Value::Null,
                    stored_at: stored.stored_at,
                    ttl: stored.ttl,
                };
                stats.record(stored.key.endpoint(), &entry, now);
                stats.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            }
        }
        stats
    }
}
