//! Storage backends for the offline cache.
//!
//! Both backends replace whole entries atomically: the memory store swaps an
//! `Arc` under a write lock, the file store renames a fully written temporary
//! file over the old one. Expiry eviction goes through
//! [`CacheStore::delete_if_unchanged`] so a write that lands after the
//! expired entry was read is never removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{CacheEntry, CacheError, CacheKey};

/// Persistence backend for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Loads the entry for a key, if present.
    ///
    /// # Errors
    /// - `CacheError::Io` - Backend could not be read
    /// - `CacheError::Serialization` - Stored entry is corrupt
    async fn load(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError>;

    /// Replaces the entry for `entry.key`.
    ///
    /// # Errors
    /// - `CacheError::Io` - Backend could not be written
    /// - `CacheError::Serialization` - Entry could not be encoded
    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Removes the entry for a key, returning whether one existed.
    ///
    /// # Errors
    /// - `CacheError::Io` - Backend could not be modified
    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Removes the entry for a key only if it is still the one observed.
    ///
    /// `Some(written_at)` matches a readable entry with that write time;
    /// `None` matches an entry that still cannot be decoded. Returns whether
    /// an entry was removed.
    ///
    /// # Errors
    /// - `CacheError::Io` - Backend could not be read or modified
    async fn delete_if_unchanged(
        &self,
        key: &CacheKey,
        written_at: Option<DateTime<Utc>>,
    ) -> Result<bool, CacheError>;

    /// Lists every stored key.
    ///
    /// # Errors
    /// - `CacheError::Io` - Backend could not be enumerated
    async fn keys(&self) -> Result<Vec<CacheKey>, CacheError>;

    /// Removes every entry.
    ///
    /// # Errors
    /// - `CacheError::Io` - Backend could not be modified
    async fn clear(&self) -> Result<(), CacheError>;
}

/// In-memory store; entries vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let key = entry.key;
        self.entries.write().await.insert(key, Arc::new(entry));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_if_unchanged(
        &self,
        key: &CacheKey,
        written_at: Option<DateTime<Utc>>,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let unchanged = matches!(
            (entries.get(key), written_at),
            (Some(entry), Some(observed)) if entry.written_at == observed
        );
        if unchanged {
            entries.remove(key);
        }
        Ok(unchanged)
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self.entries.read().await.keys().copied().collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// File-backed store writing one JSON document per key.
///
/// Mutations are serialized per store so a conditional delete cannot
/// interleave with a write from the same process.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    directory: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileCacheStore {
    /// Opens a store rooted at `directory`, creating it when missing.
    ///
    /// # Errors
    /// - `CacheError::Io` - Directory could not be created
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(Self {
            directory,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{}.json", key.file_stem()))
    }

    async fn remove_entry_file(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let bytes = match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization {
                reason: format!("entry {key}: {e}"),
            })?;
        if entry.key != *key {
            return Err(CacheError::Serialization {
                reason: format!("entry file for {key} holds {}", entry.key),
            });
        }
        Ok(Some(Arc::new(entry)))
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization {
            reason: format!("entry {}: {e}", entry.key),
        })?;

        let final_path = self.entry_path(&entry.key);
        let _write = self.write_lock.lock().await;
        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = self.directory.join(format!(
            ".{}.{}.tmp",
            entry.key.file_stem(),
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = tokio::fs::write(&temp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let _write = self.write_lock.lock().await;
        self.remove_entry_file(key).await
    }

    async fn delete_if_unchanged(
        &self,
        key: &CacheKey,
        written_at: Option<DateTime<Utc>>,
    ) -> Result<bool, CacheError> {
        let _write = self.write_lock.lock().await;
        let unchanged = match (self.load(key).await, written_at) {
            (Ok(Some(entry)), Some(observed)) => entry.written_at == observed,
            (Err(CacheError::Serialization { .. }), None) => true,
            (Ok(_), _) | (Err(CacheError::Serialization { .. }), Some(_)) => false,
            (Err(e), _) => return Err(e),
        };
        if !unchanged {
            return Ok(false);
        }
        self.remove_entry_file(key).await
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<CacheKey>() {
                Ok(key) => keys.push(key),
                Err(e) => tracing::debug!("Ignoring foreign file in cache directory: {}", e),
            }
        }

        Ok(keys)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::feed::{FeedPage, FeedType, PageOrigin};

    fn entry(feed_type: FeedType, page: u32) -> CacheEntry {
        CacheEntry {
            key: CacheKey::new(feed_type, page).unwrap(),
            written_at: Utc::now(),
            ttl_secs: 60,
            page: FeedPage::empty(feed_type, page, Utc::now(), PageOrigin::Remote),
        }
    }

    #[tokio::test]
    async fn test_memory_store_replaces_entries() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new(FeedType::Main, 1).unwrap();

        store.store(entry(FeedType::Main, 1)).await.unwrap();
        let mut replacement = entry(FeedType::Main, 1);
        replacement.ttl_secs = 120;
        store.store(replacement).await.unwrap();

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.ttl_secs, 120);
        assert_eq!(store.keys().await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_memory_store_conditional_delete_spares_rewritten_entry() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new(FeedType::Main, 1).unwrap();
        let observed = entry(FeedType::Main, 1);
        let observed_at = observed.written_at;
        store.store(observed).await.unwrap();

        let mut rewritten = entry(FeedType::Main, 1);
        rewritten.written_at = observed_at + chrono::TimeDelta::seconds(5);
        store.store(rewritten).await.unwrap();

        assert!(!store.delete_if_unchanged(&key, Some(observed_at)).await.unwrap());
        assert!(!store.delete_if_unchanged(&key, None).await.unwrap());
        assert!(store.load(&key).await.unwrap().is_some());

        let current = store.load(&key).await.unwrap().unwrap().written_at;
        assert!(store.delete_if_unchanged(&key, Some(current)).await.unwrap());
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_conditional_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path()).await.unwrap();
        let key = CacheKey::new(FeedType::Trending, 3).unwrap();
        let stored = entry(FeedType::Trending, 3);
        let written_at = stored.written_at;
        store.store(stored).await.unwrap();

        let stale = written_at - chrono::TimeDelta::seconds(1);
        assert!(!store.delete_if_unchanged(&key, Some(stale)).await.unwrap());
        assert!(store.delete_if_unchanged(&key, Some(written_at)).await.unwrap());
        assert!(store.load(&key).await.unwrap().is_none());

        std::fs::write(dir.path().join("trending-3.json"), b"{ not json").unwrap();
        assert!(!store.delete_if_unchanged(&key, Some(written_at)).await.unwrap());
        assert!(store.delete_if_unchanged(&key, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path().join("cache")).await.unwrap();

        store.store(entry(FeedType::Main, 1)).await.unwrap();
        store.store(entry(FeedType::Series, 3)).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                CacheKey::new(FeedType::Main, 1).unwrap(),
                CacheKey::new(FeedType::Series, 3).unwrap()
            ]
        );

        let loaded = store
            .load(&CacheKey::new(FeedType::Series, 3).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.page.page, 3);
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path()).await.unwrap();

        for _ in 0..3 {
            store.store(entry(FeedType::Trending, 2)).await.unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["trending-2.json".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("main-1.json"), b"{not json").unwrap();

        let result = store.load(&CacheKey::new(FeedType::Main, 1).unwrap()).await;

        assert!(matches!(result, Err(CacheError::Serialization { .. })));
    }

    #[tokio::test]
    async fn test_file_store_delete_missing_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open(dir.path()).await.unwrap();

        let removed = store
            .delete(&CacheKey::new(FeedType::Main, 9).unwrap())
            .await
            .unwrap();
        assert!(!removed);
    }
}
