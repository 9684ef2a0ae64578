//! Offline cache of last-known-good feed pages.
//!
//! Entries carry their write time and TTL; an entry older than its TTL is
//! treated as absent and evicted on the next read. Storage is pluggable via
//! [`CacheStore`].

pub mod store;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
pub use store::{CacheStore, FileCacheStore, MemoryCacheStore};

use crate::clock::{Clock, elapsed_between};
use crate::config::CacheConfig;
use crate::feed::{FeedPage, FeedType};

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error: {reason}")]
    Io { reason: String },

    #[error("Cache entry serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid cache key: {key}")]
    InvalidKey { key: String },
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        CacheError::Io {
            reason: error.to_string(),
        }
    }
}

/// Cache key: one entry per feed type and page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub feed_type: FeedType,
    pub page: u32,
}

impl CacheKey {
    /// Creates a key; page numbers start at 1.
    ///
    /// # Errors
    /// - `CacheError::InvalidKey` - Page number is zero
    pub fn new(feed_type: FeedType, page: u32) -> Result<Self, CacheError> {
        if page == 0 {
            return Err(CacheError::InvalidKey {
                key: format!("{feed_type}-0"),
            });
        }
        Ok(Self { feed_type, page })
    }

    pub(crate) fn file_stem(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.feed_type, self.page)
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CacheError::InvalidKey { key: s.to_string() };
        let (feed_type, page) = s.rsplit_once('-').ok_or_else(invalid)?;
        let feed_type = feed_type.parse::<FeedType>().map_err(|_| invalid())?;
        let page = page.parse::<u32>().map_err(|_| invalid())?;
        Self::new(feed_type, page)
    }
}

/// Persisted cache entry: `{ key, writtenAt, ttlSecs, page }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub written_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub page: FeedPage,
}

impl CacheEntry {
    /// Checks whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.written_at, now) > Duration::from_secs(self.ttl_secs)
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Entries currently stored (expired ones included until purged)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries evicted because they outlived their TTL
    pub expirations: u64,
    pub writes: u64,
    /// Hit rate percentage
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate hit rate percentage
    pub fn calculate_hit_rate(hits: u64, misses: u64) -> f64 {
        if hits + misses == 0 {
            0.0
        } else {
            (hits as f64) / ((hits + misses) as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
}

/// TTL-bounded cache of feed pages.
pub struct OfflineCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    counters: CacheCounters,
    cleanup_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OfflineCache {
    /// Creates a cache over an explicit store.
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            counters: CacheCounters::default(),
            cleanup_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Creates a memory-backed cache.
    pub fn in_memory(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), config, clock)
    }

    /// Builds the cache described by configuration.
    ///
    /// Uses the file store when `config.directory` is set and starts the
    /// background cleanup when `config.cleanup_interval` is set.
    ///
    /// # Errors
    /// - `CacheError::Io` - Cache directory could not be created
    pub async fn from_config(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, CacheError> {
        let store: Arc<dyn CacheStore> = match &config.directory {
            Some(dir) => Arc::new(FileCacheStore::open(dir.clone()).await?),
            None => Arc::new(MemoryCacheStore::new()),
        };
        let cleanup_interval = config.cleanup_interval;
        let cache = Arc::new(Self::new(store, config, clock));
        if let Some(interval) = cleanup_interval {
            cache.spawn_cleanup(interval);
        }
        Ok(cache)
    }

    /// Stores a page under `key`, replacing any previous entry.
    ///
    /// # Errors
    /// - `CacheError::Io` - Store could not be written
    /// - `CacheError::Serialization` - Page could not be encoded
    pub async fn put(&self, key: CacheKey, page: FeedPage) -> Result<(), CacheError> {
        let ttl = self.config.ttl_for(key.feed_type);
        let entry = CacheEntry {
            key,
            written_at: self.clock.now(),
            ttl_secs: ttl.as_secs(),
            page,
        };

        self.store.store(entry).await?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cached {} (ttl {:?})", key, ttl);
        Ok(())
    }

    /// Returns the page for `key` unless it is absent, expired or unreadable.
    ///
    /// Expired and corrupt entries are removed as a side effect.
    pub async fn get(&self, key: &CacheKey) -> Option<FeedPage> {
        let entry = match self.store.load(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.record_miss(key);
                return None;
            }
            Err(CacheError::Serialization { reason }) => {
                tracing::warn!("Evicting corrupt cache entry {}: {}", key, reason);
                self.evict_if_unchanged(key, None).await;
                self.record_miss(key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Cache read for {} failed, treating as miss: {}", key, e);
                self.record_miss(key);
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            tracing::debug!("Cache entry {} expired, evicting", key);
            self.evict_if_unchanged(key, Some(entry.written_at)).await;
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.record_miss(key);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache hit for {}", key);
        Some(entry.page.clone())
    }

    /// Checks for an unexpired entry without touching statistics.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        matches!(
            self.store.load(key).await,
            Ok(Some(entry)) if !entry.is_expired(self.clock.now())
        )
    }

    /// Removes the entry for `key`, returning whether one existed.
    ///
    /// # Errors
    /// - `CacheError::Io` - Store could not be modified
    pub async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.store.delete(key).await
    }

    /// Removes every entry.
    ///
    /// # Errors
    /// - `CacheError::Io` - Store could not be modified
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.store.clear().await?;
        tracing::debug!("Cleared all cache entries");
        Ok(())
    }

    /// Removes every expired entry and returns how many were removed.
    ///
    /// # Errors
    /// - `CacheError::Io` - Store could not be enumerated
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut purged = 0;

        for key in self.store.keys().await? {
            // Outer None keeps the entry; inner None marks an undecodable one
            let observed = match self.store.load(&key).await {
                Ok(Some(entry)) if entry.is_expired(now) => Some(Some(entry.written_at)),
                Ok(_) => None,
                Err(CacheError::Serialization { .. }) => Some(None),
                Err(e) => {
                    tracing::warn!("Skipping unreadable cache entry {}: {}", key, e);
                    None
                }
            };
            if let Some(written_at) = observed
                && self.store.delete_if_unchanged(&key, written_at).await?
            {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }

    /// Starts a background task purging expired entries every `interval`.
    ///
    /// The task holds only a weak reference and is aborted when the cache drops.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = cache.purge_expired().await {
                    tracing::warn!("Background cache cleanup failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.cleanup_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Returns cache statistics.
    pub async fn statistics(&self) -> CacheStats {
        let entries = self.store.keys().await.map(|k| k.len()).unwrap_or(0);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);

        CacheStats {
            entries,
            hits,
            misses,
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            hit_rate: CacheStats::calculate_hit_rate(hits, misses),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn record_miss(&self, key: &CacheKey) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Cache miss for {}", key);
    }

    async fn evict_if_unchanged(&self, key: &CacheKey, written_at: Option<DateTime<Utc>>) {
        match self.store.delete_if_unchanged(key, written_at).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Cache entry {} was rewritten, keeping it", key),
            Err(e) => tracing::warn!("Failed to evict cache entry {}: {}", key, e),
        }
    }
}

impl Drop for OfflineCache {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.get_mut().take() {
            handle.abort();
        }
    }
}
