//! Shared handles for entity caches and derived caches.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{CacheConfig, CacheError, Schema};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::BatchUpdateQueue;
use crate::cache::{CacheClient, CacheKey};
use crate::engine::EntityCache;
use crate::store::DurableStore;

/// Store, cache client, batch queue and configuration shared by every
/// [`EntityCache`] and model helper.
///
/// Cloning is cheap; clones share the same backends.
#[derive(Clone)]
pub struct CacheContext {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn CacheClient>,
    queue: BatchUpdateQueue,
    config: CacheConfig,
}

impl CacheContext {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn CacheClient>,
        queue: BatchUpdateQueue,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            config,
        }
    }

    /// Entity cache for one kind.
    pub fn entity_cache(&self, schema: &'static Schema) -> EntityCache {
        EntityCache::new(schema, self.clone())
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn CacheClient> {
        &self.cache
    }

    pub fn queue(&self) -> &BatchUpdateQueue {
        &self.queue
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // BEST-EFFORT CACHE ACCESS
    // ========================================================================

    /// Read a key, treating backend errors as a miss.
    pub(crate) async fn cache_get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.cache.get(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write a key. Failures are logged and dropped.
    pub(crate) async fn cache_set(&self, key: &CacheKey, bytes: Vec<u8>, ttl: Duration) {
        match self.cache.set(key, bytes, ttl).await {
            Ok(()) => {}
            Err(CacheError::Oversized { size, limit }) => {
                tracing::warn!(key = %key, size, limit, "Cache payload too large, not cached");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache write failed");
            }
        }
    }

    /// Delete a key. Failures are logged and dropped.
    pub(crate) async fn cache_delete(&self, key: &CacheKey) {
        if let Err(e) = self.cache.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Cache delete failed");
        }
    }

    // ========================================================================
    // DERIVED CACHES
    // ========================================================================

    /// Read a derived aggregate. Undecodable entries are dropped and read as
    /// absent.
    pub async fn get_derived<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let key = CacheKey::derived(name);
        let bytes = self.cache_get(&key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Invalid derived cache payload, dropping");
                self.cache_delete(&key).await;
                None
            }
        }
    }

    /// Store a derived aggregate for `ttl`.
    pub async fn set_derived<T: Serialize + ?Sized>(&self, name: &str, value: &T, ttl: Duration) {
        let key = CacheKey::derived(name);
        match serde_json::to_vec(value) {
            Ok(bytes) => self.cache_set(&key, bytes, ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode derived value"),
        }
    }

    /// Drop a derived aggregate.
    pub async fn invalidate_derived(&self, name: &str) {
        self.cache_delete(&CacheKey::derived(name)).await;
    }
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheClient;
    use crate::scheduler::ManualScheduler;
    use crate::store::InMemoryStore;

    fn context(cache: Arc<InMemoryCacheClient>) -> CacheContext {
        let queue = BatchUpdateQueue::new(Arc::new(ManualScheduler::new()), Duration::from_secs(10));
        CacheContext::new(
            Arc::new(InMemoryStore::new()),
            cache,
            queue,
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_derived_roundtrip() {
        let cache = Arc::new(InMemoryCacheClient::new());
        let ctx = context(cache.clone());

        assert_eq!(ctx.get_derived::<Vec<String>>("all_tags").await, None);
        ctx.set_derived("all_tags", &vec!["a", "b"], Duration::from_secs(60))
            .await;
        assert_eq!(
            ctx.get_derived::<Vec<String>>("all_tags").await,
            Some(vec!["a".to_string(), "b".to_string()])
        );

        ctx.invalidate_derived("all_tags").await;
        assert!(!cache.contains(&CacheKey::derived("all_tags")));
    }

    #[tokio::test]
    async fn test_undecodable_derived_entry_is_dropped() {
        let cache = Arc::new(InMemoryCacheClient::new());
        let ctx = context(cache.clone());
        cache.inject_raw(&CacheKey::derived("all_tags"), b"\xff\x00".to_vec());

        assert_eq!(ctx.get_derived::<Vec<String>>("all_tags").await, None);
        assert!(!cache.contains(&CacheKey::derived("all_tags")));
    }

    #[tokio::test]
    async fn test_oversized_derived_value_is_skipped() {
        let cache = Arc::new(InMemoryCacheClient::with_max_item_bytes(8));
        let ctx = context(cache.clone());
        ctx.set_derived("big", &"x".repeat(64), Duration::from_secs(60))
            .await;
        assert_eq!(ctx.get_derived::<String>("big").await, None);
    }
}
