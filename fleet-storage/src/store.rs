//! Durable store abstraction and in-memory implementation.
//!
//! The durable store is authoritative. The cache layer only ever populates
//! entries after a write here has succeeded.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use fleet_core::{matches_all, Entity, FilterExpr, FleetResult, StoreError};

/// Opaque position in a query result stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub entities: Vec<Entity>,
    /// Present when more matching entities may follow.
    pub next_cursor: Option<Cursor>,
}

/// Durable key-value store for entities.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch an entity by kind and key name.
    async fn get_by_key(&self, kind: &str, key_name: &str) -> FleetResult<Option<Entity>>;

    /// Insert or fully replace an entity.
    async fn put(&self, entity: &Entity) -> FleetResult<()>;

    /// Delete an entity. Deleting an absent entity is not an error.
    async fn delete(&self, kind: &str, key_name: &str) -> FleetResult<()>;

    /// Fetch up to `limit` entities matching every filter, ordered by key name,
    /// starting after `cursor`.
    async fn query(
        &self,
        kind: &str,
        filters: &[FilterExpr],
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> FleetResult<QueryPage>;
}

/// Operation counters for [`InMemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub queries: u64,
}

/// In-memory store for testing and local development.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entities: RwLock<BTreeMap<(String, String), Entity>>,
    fail_writes: AtomicBool,
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
}

impl InMemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent put and delete fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entities across all kinds.
    pub fn len(&self) -> usize {
        self.entities.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut entities) = self.entities.write() {
            entities.clear();
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }

    fn check_writable(&self, entity_kind: &str, key_name: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed {
                kind: entity_kind.to_string(),
                key_name: key_name.to_string(),
                reason: "writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn get_by_key(&self, kind: &str, key_name: &str) -> FleetResult<Option<Entity>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let entities = self.entities.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entities
            .get(&(kind.to_string(), key_name.to_string()))
            .cloned())
    }

    async fn put(&self, entity: &Entity) -> FleetResult<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.check_writable(entity.kind(), entity.key_name())?;
        let mut entities = self.entities.write().map_err(|_| StoreError::LockPoisoned)?;
        entities.insert(
            (entity.kind().to_string(), entity.key_name().to_string()),
            entity.clone(),
        );
        Ok(())
    }

    async fn delete(&self, kind: &str, key_name: &str) -> FleetResult<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::DeleteFailed {
                kind: kind.to_string(),
                key_name: key_name.to_string(),
                reason: "writes disabled".to_string(),
            }
            .into());
        }
        let mut entities = self.entities.write().map_err(|_| StoreError::LockPoisoned)?;
        entities.remove(&(kind.to_string(), key_name.to_string()));
        Ok(())
    }

    async fn query(
        &self,
        kind: &str,
        filters: &[FilterExpr],
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> FleetResult<QueryPage> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let start = match cursor {
            Some(c) if c.as_str().is_empty() => {
                return Err(StoreError::InvalidCursor {
                    kind: kind.to_string(),
                    cursor: String::new(),
                }
                .into());
            }
            Some(c) => Bound::Excluded((kind.to_string(), c.as_str().to_string())),
            None => Bound::Included((kind.to_string(), String::new())),
        };

        let entities = self.entities.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matching = entities
            .range((start, Bound::Unbounded))
            .take_while(|((k, _), _)| k == kind)
            .filter(|(_, entity)| matches_all(filters, entity))
            .map(|(_, entity)| entity);

        let page: Vec<Entity> = matching.by_ref().take(limit).cloned().collect();
        let has_more = matching.next().is_some();
        let next_cursor = match page.last() {
            Some(last) if has_more => Some(Cursor::new(last.key_name())),
            _ => None,
        };

        Ok(QueryPage {
            entities: page,
            next_cursor,
        })
    }
}
