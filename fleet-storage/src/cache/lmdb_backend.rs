//! LMDB-backed cache client.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! cache that survives process restarts. Useful for single-host deployments
//! where no memcache daemon is available.
//!
//! # Value Format
//!
//! `[expires_at_ms: 8 bytes LE][payload]`. Expired entries are removed on
//! read or by [`LmdbCacheClient::purge_expired`].

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleet_core::config::DEFAULT_CACHE_MAX_ITEM_BYTES;
use fleet_core::CacheError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::key::CacheKey;
use super::traits::{CacheClient, CacheStats};

const EXPIRY_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

/// LMDB-backed cache client.
///
/// # Example
///
/// ```ignore
/// use fleet_storage::cache::{CacheClient, CacheKey, LmdbCacheClient};
///
/// let cache = LmdbCacheClient::new("/var/cache/fleet", 256)?;
/// cache.set(&CacheKey::derived("all_tags"), payload, ttl).await?;
/// ```
pub struct LmdbCacheClient {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
    max_item_bytes: usize,
}

impl LmdbCacheClient {
    /// Open (or create) a cache under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
            max_item_bytes: DEFAULT_CACHE_MAX_ITEM_BYTES,
        })
    }

    /// Override the largest payload accepted by `set`.
    pub fn with_max_item_bytes(mut self, max_item_bytes: usize) -> Self {
        self.max_item_bytes = max_item_bytes;
        self
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut keys = Vec::new();
            for (key, value) in iter.flatten() {
                if is_expired(value, now_ms) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut removed = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                removed += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += removed;
        }
        Ok(removed)
    }

    fn remove(&self, encoded_key: &[u8]) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, encoded_key)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

/// Entries with a malformed header count as expired.
fn is_expired(value: &[u8], now_ms: i64) -> bool {
    match value.get(..EXPIRY_LEN).and_then(|b| <[u8; 8]>::try_from(b).ok()) {
        Some(bytes) => i64::from_le_bytes(bytes) <= now_ms,
        None => true,
    }
}

#[async_trait]
impl CacheClient for LmdbCacheClient {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let encoded_key = key.encode();
        let now_ms = Utc::now().timestamp_millis();

        let found = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            self.db
                .get(&rtxn, encoded_key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
                .map(|bytes| bytes.to_vec())
        };

        match found {
            Some(bytes) if !is_expired(&bytes, now_ms) => {
                self.record(|s| s.hits += 1);
                Ok(Some(bytes[EXPIRY_LEN..].to_vec()))
            }
            Some(_) => {
                self.remove(encoded_key)?;
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

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let mut full_bytes = Vec::with_capacity(EXPIRY_LEN + value.len());
        full_bytes.extend_from_slice(&expires_at.to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.encode(), &full_bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.record(|s| s.sets += 1);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        if self.remove(key.encode())? {
            self.record(|s| s.deletes += 1);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let (entry_count, memory_bytes) = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let count = self
                .db
                .len(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let bytes: usize = iter.flatten().map(|(k, v)| k.len() + v.len()).sum();
            (count, bytes as u64)
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
