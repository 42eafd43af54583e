//! Cache clients and key namespaces.
//!
//! The cache is a best-effort accelerator in front of the durable store.
//! Keys are built only through [`CacheKey`]'s namespace constructors, so
//! whole-entity, single-field, filtered-fetch and derived entries can never
//! overwrite each other.

pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod traits;

pub use key::{CacheKey, KeyScope};
pub use lmdb_backend::{LmdbCacheClient, LmdbCacheError};
pub use memory_backend::InMemoryCacheClient;
pub use traits::{CacheClient, CacheStats};
