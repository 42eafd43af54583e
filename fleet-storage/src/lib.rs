//! Fleet Storage - Entity Cache Engine
//!
//! Read-through/write-through caching of fleet entities over a durable
//! store, with a memcache-style cache client, corruption-tolerant payload
//! codec, and a deferred batch-update queue for derived aggregates.

pub mod batch;
pub mod cache;
pub mod codec;
pub mod context;
pub mod engine;
pub mod lookup;
pub mod scheduler;
pub mod store;

pub use batch::{BatchTask, BatchUpdateQueue, QueueState};
pub use cache::{
    CacheClient, CacheKey, CacheStats, InMemoryCacheClient, KeyScope, LmdbCacheClient,
    LmdbCacheError,
};
pub use codec::{EntityCodec, FORMAT_VERSION};
pub use context::CacheContext;
pub use engine::{DeleteTarget, EntityCache};
pub use lookup::Lookup;
pub use scheduler::{Job, ManualScheduler, Scheduler, TokioScheduler};
pub use store::{Cursor, DurableStore, InMemoryStore, QueryPage, StoreStats};
