//! In-process cache client with memcache semantics.
//!
//! Entries expire lazily on read. Payloads above the item limit are
//! rejected, mirroring memcache's 1 MiB ceiling.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleet_core::config::DEFAULT_CACHE_MAX_ITEM_BYTES;
use fleet_core::CacheError;

use super::key::CacheKey;
use super::traits::{CacheClient, CacheStats};

#[derive(Debug, Clone)]
struct CacheEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-memory cache client.
#[derive(Debug)]
pub struct InMemoryCacheClient {
    entries: RwLock<HashMap<Vec<u8>, CacheEntry>>,
    stats: RwLock<CacheStats>,
    max_item_bytes: usize,
}

impl Default for InMemoryCacheClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCacheClient {
    pub fn new() -> Self {
        Self::with_max_item_bytes(DEFAULT_CACHE_MAX_ITEM_BYTES)
    }

    pub fn with_max_item_bytes(max_item_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            max_item_bytes,
        }
    }

    /// Store raw bytes under `key` without size checks or stats.
    ///
    /// Used to plant payloads written by another process or an older build.
    pub fn inject_raw(&self, key: &CacheKey, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key.encode().to_vec(),
                CacheEntry {
                    bytes,
                    expires_at: Instant::now() + Duration::from_secs(3600),
                },
            );
        }
    }

    /// Whether a live entry exists under `key`. Does not touch stats.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .get(key.encode())
                    .is_some_and(|e| e.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }

    /// Number of stored entries, including ones that expired but were not yet read.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

#[async_trait]
impl CacheClient for InMemoryCacheClient {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            entries.get(key.encode()).cloned()
        };

        match found {
            Some(entry) if entry.expires_at > now => {
                self.record(|s| s.hits += 1);
                Ok(Some(entry.bytes))
            }
            Some(_) => {
                let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
                entries.remove(key.encode());
                drop(entries);
                self.record(|s| {
                    s.misses += 1;
                    s.evictions += 1;
                });
                Ok(None)
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if value.len() > self.max_item_bytes {
            return Err(CacheError::Oversized {
                size: value.len(),
                limit: self.max_item_bytes,
            });
        }

        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        entries.insert(
            key.encode().to_vec(),
            CacheEntry {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        drop(entries);

        self.record(|s| s.sets += 1);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let removed = {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            entries.remove(key.encode()).is_some()
        };
        if removed {
            self.record(|s| s.deletes += 1);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let (entry_count, memory_bytes) = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            let bytes: usize = entries.iter().map(|(k, e)| k.len() + e.bytes.len()).sum();
            (entries.len() as u64, bytes as u64)
        };
        let mut stats = self
            .stats
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .clone();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCacheClient::new();
        let key = CacheKey::derived("all_tags");

        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache
            .set(&key, b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(b"payload".to_vec()));

        cache.delete(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = InMemoryCacheClient::new();
        let key = CacheKey::derived("short");
        cache
            .set(&key, b"x".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!cache.contains(&key));
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap().evictions, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let cache = InMemoryCacheClient::with_max_item_bytes(4);
        let key = CacheKey::derived("big");
        let result = cache
            .set(&key, vec![0u8; 5], Duration::from_secs(60))
            .await;
        assert!(matches!(
            result,
            Err(CacheError::Oversized { size: 5, limit: 4 })
        ));
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_inject_raw_is_readable() {
        let cache = InMemoryCacheClient::new();
        let key = CacheKey::entity("Tag", "lab");
        cache.inject_raw(&key, vec![1, 2, 3]);
        assert_eq!(cache.get(&key).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.stats().await.unwrap().sets, 0);
    }
}
