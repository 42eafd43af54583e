//! Configuration for the entity cache.
//!
//! Loaded from environment variables with defaults suitable for development.

use std::time::Duration;

use crate::ConfigError;

/// Default seconds an entry stays in the cache.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Default delay before a batch-update drain runs.
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 10;
/// Default row limit for filtered fetches.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;
/// Default page size when walking a query with cursors.
pub const DEFAULT_QUERY_PAGE_SIZE: usize = 500;
/// Largest payload the cache accepts (memcache's item limit).
pub const DEFAULT_CACHE_MAX_ITEM_BYTES: usize = 1024 * 1024;
/// Days a computer may stay silent before it is considered inactive.
pub const DEFAULT_COMPUTER_ACTIVE_DAYS: u64 = 30;

/// Entity cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied to cache entries unless overridden per call.
    pub entry_ttl: Duration,
    /// Delay between the first write notification and the batch drain.
    pub batch_delay: Duration,
    /// Maximum entities returned by a filtered fetch.
    pub query_limit: usize,
    /// Entities fetched per store round trip.
    pub page_size: usize,
    /// Largest payload written to the cache.
    pub max_item_bytes: usize,
    /// Silence window after which a computer is marked inactive.
    pub inactive_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            batch_delay: Duration::from_secs(DEFAULT_BATCH_DELAY_SECS),
            query_limit: DEFAULT_QUERY_LIMIT,
            page_size: DEFAULT_QUERY_PAGE_SIZE,
            max_item_bytes: DEFAULT_CACHE_MAX_ITEM_BYTES,
            inactive_after: Duration::from_secs(DEFAULT_COMPUTER_ACTIVE_DAYS * 86_400),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FLEET_CACHE_TTL_SECS`: Cache entry TTL (default: 300)
    /// - `FLEET_BATCH_DELAY_SECS`: Batch drain delay (default: 10)
    /// - `FLEET_QUERY_LIMIT`: Filtered fetch limit (default: 1000)
    /// - `FLEET_QUERY_PAGE_SIZE`: Cursor page size (default: 500)
    /// - `FLEET_CACHE_MAX_ITEM_BYTES`: Largest cache payload (default: 1048576)
    /// - `FLEET_COMPUTER_ACTIVE_DAYS`: Inactivity window in days (default: 30)
    pub fn from_env() -> Self {
        let entry_ttl =
            Duration::from_secs(env_or("FLEET_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS));
        let batch_delay =
            Duration::from_secs(env_or("FLEET_BATCH_DELAY_SECS", DEFAULT_BATCH_DELAY_SECS));
        let query_limit = env_or("FLEET_QUERY_LIMIT", DEFAULT_QUERY_LIMIT);
        let page_size = env_or("FLEET_QUERY_PAGE_SIZE", DEFAULT_QUERY_PAGE_SIZE);
        let max_item_bytes = env_or("FLEET_CACHE_MAX_ITEM_BYTES", DEFAULT_CACHE_MAX_ITEM_BYTES);
        let inactive_after = Duration::from_secs(
            env_or("FLEET_COMPUTER_ACTIVE_DAYS", DEFAULT_COMPUTER_ACTIVE_DAYS) * 86_400,
        );

        Self {
            entry_ttl,
            batch_delay,
            query_limit,
            page_size,
            max_item_bytes,
            inactive_after,
        }
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the batch drain delay.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Set the filtered fetch limit.
    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit;
        self
    }

    /// Set the cursor page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the largest cache payload.
    pub fn with_max_item_bytes(mut self, bytes: usize) -> Self {
        self.max_item_bytes = bytes;
        self
    }

    /// Set the computer inactivity window.
    pub fn with_inactive_after(mut self, window: Duration) -> Self {
        self.inactive_after = window;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_ttl.is_zero() {
            return Err(invalid("entry_ttl", "0", "must be greater than zero"));
        }
        if self.query_limit == 0 {
            return Err(invalid("query_limit", "0", "must be greater than zero"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "0", "must be greater than zero"));
        }
        if self.max_item_bytes == 0 {
            return Err(invalid("max_item_bytes", "0", "must be greater than zero"));
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
