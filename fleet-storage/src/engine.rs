//! Read-through/write-through entity cache.
//!
//! One [`EntityCache`] serves one entity kind. Reads consult the cache
//! first and fall back to the durable store; writes go to the store first
//! and populate the cache only after the store accepted them.
//!
//! # Corruption
//!
//! A cached payload that fails to decode is deleted and the read retried
//! once. If the retry also finds a corrupt payload (another writer keeps
//! planting bad bytes, or the cache itself is broken), the entity is read
//! straight from the store and the cache is left alone.

use std::time::Duration;

use chrono::Utc;
use fleet_core::{
    Entity, Field, FilterExpr, FleetResult, Schema, UsageError, ValidationError, Value,
};

use crate::cache::CacheKey;
use crate::codec::EntityCodec;
use crate::context::CacheContext;
use crate::lookup::Lookup;
use crate::store::{Cursor, QueryPage};

/// What to delete: a key name, or an entity already in hand.
#[derive(Debug, Clone, Copy)]
pub enum DeleteTarget<'a> {
    KeyName(&'a str),
    Entity(&'a Entity),
}

impl<'a> From<&'a str> for DeleteTarget<'a> {
    fn from(key_name: &'a str) -> Self {
        DeleteTarget::KeyName(key_name)
    }
}

impl<'a> From<&'a Entity> for DeleteTarget<'a> {
    fn from(entity: &'a Entity) -> Self {
        DeleteTarget::Entity(entity)
    }
}

/// Result of probing one cache key.
enum Probe<T> {
    Hit(T),
    Miss,
    Corrupt,
}

/// Cache engine for one entity kind.
#[derive(Debug, Clone)]
pub struct EntityCache {
    schema: &'static Schema,
    codec: EntityCodec,
    ctx: CacheContext,
    ttl: Duration,
}

impl EntityCache {
    pub fn new(schema: &'static Schema, ctx: CacheContext) -> Self {
        let ttl = ctx.config().entry_ttl;
        Self {
            schema,
            codec: EntityCodec::new(schema),
            ctx,
            ttl,
        }
    }

    /// Same engine, writing cache entries with a different TTL.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl,
            ..self.clone()
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn kind(&self) -> &'static str {
        self.schema.kind()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn context(&self) -> &CacheContext {
        &self.ctx
    }

    fn check_key(&self, key_name: &str) -> Result<(), UsageError> {
        if key_name.is_empty() {
            return Err(UsageError::EmptyKeyName {
                kind: self.kind().to_string(),
            });
        }
        Ok(())
    }

    fn check_field(&self, field: &Field) -> Result<(), ValidationError> {
        if field.kind() != self.kind() {
            return Err(ValidationError::KindMismatch {
                field: field.name().to_string(),
                expected: self.kind().to_string(),
                got: field.kind().to_string(),
            });
        }
        Ok(())
    }

    fn check_entity(&self, entity: &Entity) -> Result<(), UsageError> {
        if entity.kind() != self.kind() {
            return Err(UsageError::KindMismatch {
                expected: self.kind().to_string(),
                got: entity.kind().to_string(),
            });
        }
        self.check_key(entity.key_name())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch a whole entity, cache first.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = self.kind(), key_name = %key_name))]
    pub async fn get(&self, key_name: &str) -> FleetResult<Lookup<Entity>> {
        self.check_key(key_name)?;
        let key = CacheKey::entity(self.kind(), key_name);

        let mut retried = false;
        loop {
            match self.probe_entity(&key).await {
                Probe::Hit(entity) => return Ok(Lookup::Found(entity)),
                Probe::Miss => return self.load_entity(key_name, &key).await,
                Probe::Corrupt => {
                    self.ctx.cache_delete(&key).await;
                    if retried {
                        tracing::warn!("Cache entry corrupt again after retry, reading store directly");
                        let entity = self.ctx.store().get_by_key(self.kind(), key_name).await?;
                        return Ok(entity.into());
                    }
                    retried = true;
                }
            }
        }
    }

    /// Fetch a single field value, cache first.
    ///
    /// Populates only the field-level entry; the entity-level entry is not
    /// touched.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = self.kind(), key_name = %key_name, field = field.name()))]
    pub async fn get_field(&self, key_name: &str, field: &Field) -> FleetResult<Lookup<Value>> {
        self.check_key(key_name)?;
        self.check_field(field)?;
        let key = CacheKey::field(field, key_name);

        let mut retried = false;
        loop {
            match self.probe_field(&key, field).await {
                Probe::Hit(value) => return Ok(Lookup::Found(value)),
                Probe::Miss => return self.load_field(key_name, field, Some(&key)).await,
                Probe::Corrupt => {
                    self.ctx.cache_delete(&key).await;
                    if retried {
                        tracing::warn!("Cache entry corrupt again after retry, reading store directly");
                        return self.load_field(key_name, field, None).await;
                    }
                    retried = true;
                }
            }
        }
    }

    async fn probe_entity(&self, key: &CacheKey) -> Probe<Entity> {
        let Some(bytes) = self.ctx.cache_get(key).await else {
            return Probe::Miss;
        };
        match self.codec.decode(&bytes) {
            Ok(entity) => Probe::Hit(entity),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Invalid cache payload");
                Probe::Corrupt
            }
        }
    }

    async fn probe_field(&self, key: &CacheKey, field: &Field) -> Probe<Value> {
        let Some(bytes) = self.ctx.cache_get(key).await else {
            return Probe::Miss;
        };
        match EntityCodec::decode_value(field, &bytes) {
            Ok(value) => Probe::Hit(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Invalid cache payload");
                Probe::Corrupt
            }
        }
    }

    async fn load_entity(&self, key_name: &str, key: &CacheKey) -> FleetResult<Lookup<Entity>> {
        let Some(entity) = self.ctx.store().get_by_key(self.kind(), key_name).await? else {
            return Ok(Lookup::NotFound);
        };
        self.cache_entity(key, &entity).await;
        Ok(Lookup::Found(entity))
    }

    /// Read a field from the store, caching it under `key` when given.
    async fn load_field(
        &self,
        key_name: &str,
        field: &Field,
        key: Option<&CacheKey>,
    ) -> FleetResult<Lookup<Value>> {
        let Some(entity) = self.ctx.store().get_by_key(self.kind(), key_name).await? else {
            return Ok(Lookup::NotFound);
        };
        let Some(value) = entity.get(field).cloned() else {
            tracing::error!("Retrieving missing field");
            return Ok(Lookup::MissingField);
        };
        if let Some(key) = key {
            self.cache_value(key, &value).await;
        }
        Ok(Lookup::Found(value))
    }

    async fn cache_entity(&self, key: &CacheKey, entity: &Entity) {
        match self.codec.encode(entity) {
            Ok(bytes) => self.ctx.cache_set(key, bytes, self.ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode entity for cache"),
        }
    }

    async fn cache_value(&self, key: &CacheKey, value: &Value) {
        match EntityCodec::encode_value(value) {
            Ok(bytes) => self.ctx.cache_set(key, bytes, self.ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode value for cache"),
        }
    }

    /// Drop every field-level entry of one entity.
    async fn sweep_fields(&self, key_name: &str) {
        for field in self.schema.all_fields() {
            self.ctx.cache_delete(&CacheKey::field(&field, key_name)).await;
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Set one field, creating the entity if it does not exist.
    ///
    /// The store write happens first. Both the field-level and the
    /// entity-level cache entries are rewritten afterwards, and the batch
    /// queue is notified. Returns the entity as persisted.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = self.kind(), key_name = %key_name, field = field.name()))]
    pub async fn set(
        &self,
        key_name: &str,
        field: &Field,
        value: impl Into<Value>,
    ) -> FleetResult<Entity> {
        self.check_key(key_name)?;
        self.check_field(field)?;
        let value = value.into();
        field.check(&value)?;

        let existing = self.ctx.store().get_by_key(self.kind(), key_name).await?;
        let is_new = existing.is_none();
        let mut entity = existing.unwrap_or_else(|| Entity::new(self.schema, key_name));
        entity.set(field, value)?;
        self.schema.stamp(&mut entity, Utc::now(), is_new);

        self.ctx.store().put(&entity).await?;

        if let Some(stored) = entity.get(field) {
            self.cache_value(&CacheKey::field(field, key_name), stored)
                .await;
        }
        self.cache_entity(&CacheKey::entity(self.kind(), key_name), &entity)
            .await;
        self.ctx.queue().notify_write(self.kind());
        Ok(entity)
    }

    /// Persist a whole entity.
    ///
    /// Rewrites the entity-level entry and drops the field-level entries,
    /// since any of them may have changed.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = self.kind(), key_name = %entity.key_name()))]
    pub async fn save(&self, entity: &mut Entity) -> FleetResult<()> {
        self.check_entity(entity)?;
        self.schema.validate(entity)?;
        self.schema.stamp(entity, Utc::now(), false);

        self.ctx.store().put(entity).await?;

        self.cache_entity(&CacheKey::entity(self.kind(), entity.key_name()), entity)
            .await;
        self.sweep_fields(entity.key_name()).await;
        self.ctx.queue().notify_write(self.kind());
        Ok(())
    }

    /// Delete an entity and every cache entry derived from its key.
    ///
    /// Deleting by key name tolerates an absent entity; the cache entries
    /// are cleared either way.
    pub async fn delete<'a>(&self, target: impl Into<DeleteTarget<'a>>) -> FleetResult<()> {
        let (key_name, exists) = match target.into() {
            DeleteTarget::KeyName(key_name) => {
                self.check_key(key_name)?;
                let exists = self
                    .ctx
                    .store()
                    .get_by_key(self.kind(), key_name)
                    .await?
                    .is_some();
                (key_name, exists)
            }
            DeleteTarget::Entity(entity) => {
                self.check_entity(entity)?;
                (entity.key_name(), true)
            }
        };
        tracing::debug!(kind = self.kind(), key_name, exists, "Deleting entity");

        if exists {
            self.ctx.store().delete(self.kind(), key_name).await?;
        }

        self.ctx
            .cache_delete(&CacheKey::entity(self.kind(), key_name))
            .await;
        self.sweep_fields(key_name).await;

        if exists {
            self.ctx.queue().notify_write(self.kind());
        }
        Ok(())
    }

    /// Reload an entity from the store into the entity-level entry.
    pub async fn refresh(&self, key_name: &str) -> FleetResult<Option<Entity>> {
        self.check_key(key_name)?;
        let key = CacheKey::entity(self.kind(), key_name);
        match self.ctx.store().get_by_key(self.kind(), key_name).await? {
            Some(entity) => {
                self.cache_entity(&key, &entity).await;
                Ok(Some(entity))
            }
            None => {
                self.ctx.cache_delete(&key).await;
                Ok(None)
            }
        }
    }

    /// Cached entity, or a fresh unsaved one with defaults applied.
    pub async fn get_or_new(&self, key_name: &str) -> FleetResult<Entity> {
        Ok(self
            .get(key_name)
            .await?
            .found()
            .unwrap_or_else(|| Entity::new(self.schema, key_name)))
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Entities matching every filter, cached under a key built from the
    /// filters and the limit.
    ///
    /// Each filter value must have its field's type; see [`FilterExpr::check`].
    ///
    /// `limit` defaults to the configured query limit. Cached lists are not
    /// invalidated by writes and go stale until their TTL lapses.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = self.kind(), filters = filters.len()))]
    pub async fn get_all_by_filter(
        &self,
        filters: &[FilterExpr],
        limit: Option<usize>,
    ) -> FleetResult<Vec<Entity>> {
        for filter in filters {
            filter.check(&self.schema.field(&filter.field)?)?;
        }
        let limit = limit.unwrap_or(self.ctx.config().query_limit);
        let key = CacheKey::query(self.kind(), filters, limit);

        if let Some(bytes) = self.ctx.cache_get(&key).await {
            match self.codec.decode_list(&bytes) {
                Ok(entities) => return Ok(entities),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Invalid cache payload");
                    self.ctx.cache_delete(&key).await;
                }
            }
        }

        let entities = self.collect(filters, limit).await?;
        match self.codec.encode_list(&entities) {
            Ok(bytes) => self.ctx.cache_set(&key, bytes, self.ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode result list"),
        }
        Ok(entities)
    }

    /// One uncached page of a filtered query.
    pub async fn query_page(
        &self,
        filters: &[FilterExpr],
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> FleetResult<QueryPage> {
        self.ctx
            .store()
            .query(self.kind(), filters, limit, cursor)
            .await
    }

    /// Walk the store in pages until `limit` entities are collected.
    async fn collect(&self, filters: &[FilterExpr], limit: usize) -> FleetResult<Vec<Entity>> {
        let page_size = self.ctx.config().page_size.max(1);
        let mut entities = Vec::new();
        let mut cursor: Option<Cursor> = None;

        while entities.len() < limit {
            let want = page_size.min(limit - entities.len());
            let page = self.query_page(filters, want, cursor.as_ref()).await?;
            entities.extend(page.entities);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(entities)
    }
}

// ============================================================================
// TESTS
// ============================================================================
