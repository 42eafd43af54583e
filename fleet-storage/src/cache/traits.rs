//! Cache client trait.
//!
//! A cache client is a best-effort byte store with per-entry expiry. The
//! engine treats every error it returns as a miss (reads) or a no-op
//! (writes), so implementations must never be the source of truth.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::CacheError;

use super::key::CacheKey;

/// Pluggable cache backend (memcache-style, in-memory, LMDB).
///
/// Implementations must be safe to share across tasks. Payloads larger than
/// the backend's item limit are rejected with [`CacheError::Oversized`].
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Fetch the payload stored under `key`, or None if absent or expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of successful sets.
    pub sets: u64,
    /// Number of deletes that removed an entry.
    pub deletes: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped on expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
