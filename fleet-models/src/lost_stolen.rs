//! Lost/stolen computer reports and the cached UUID set.

use std::collections::BTreeSet;

use chrono::Utc;
use fleet_core::{
    Entity, EntityRef, Field, FieldDef, FieldDefault, FleetResult, Schema, Stamp, Value,
    ValueType,
};
use fleet_storage::{BatchTask, CacheContext, EntityCache};

use crate::computer::COMPUTER;
use crate::scan;

/// A lost or stolen report, keyed by the computer's UUID.
pub static COMPUTER_LOST_STOLEN: Schema = Schema::new(
    "ComputerLostStolen",
    1,
    &[
        FieldDef::new("uuid", ValueType::Str),
        FieldDef::new("computer", ValueType::Str),
        FieldDef::new("connections", ValueType::List).with_default(FieldDefault::EmptyList),
        FieldDef::new("lost_stolen_datetime", ValueType::Timestamp).stamped(Stamp::OnCreate),
        FieldDef::new("mtime", ValueType::Timestamp),
    ],
);

/// Derived cache name of the lost/stolen UUID set.
pub const LOST_STOLEN_UUIDS: &str = "loststolen_uuids";

#[derive(Debug, Clone)]
pub struct LostStolenRegistry {
    engine: EntityCache,
    computers: EntityCache,
    uuid: Field,
    computer: Field,
    connections: Field,
    mtime: Field,
}

impl LostStolenRegistry {
    pub fn new(ctx: &CacheContext) -> FleetResult<Self> {
        Ok(Self {
            engine: ctx.entity_cache(&COMPUTER_LOST_STOLEN),
            computers: ctx.entity_cache(&COMPUTER),
            uuid: COMPUTER_LOST_STOLEN.field("uuid")?,
            computer: COMPUTER_LOST_STOLEN.field("computer")?,
            connections: COMPUTER_LOST_STOLEN.field("connections")?,
            mtime: COMPUTER_LOST_STOLEN.field("mtime")?,
        })
    }

    /// UUIDs of every lost/stolen computer.
    ///
    /// Served from the derived cache unless it is absent, empty, or
    /// `force_refresh` is set, in which case it is rebuilt from the store.
    pub async fn uuids(&self, force_refresh: bool) -> FleetResult<BTreeSet<String>> {
        let ctx = self.engine.context();
        if !force_refresh {
            if let Some(uuids) = ctx.get_derived::<BTreeSet<String>>(LOST_STOLEN_UUIDS).await {
                if !uuids.is_empty() {
                    return Ok(uuids);
                }
            }
        }

        let uuids: BTreeSet<String> = scan(&self.engine, &[])
            .await?
            .into_iter()
            .map(|entry| entry.key_name().to_string())
            .collect();
        tracing::debug!(count = uuids.len(), force_refresh, "Rebuilt lost/stolen UUID set");
        ctx.set_derived(LOST_STOLEN_UUIDS, &uuids, self.engine.ttl())
            .await;
        Ok(uuids)
    }

    pub async fn is_lost_stolen(&self, uuid: &str) -> FleetResult<bool> {
        Ok(self.uuids(false).await?.contains(uuid))
    }

    /// Report `uuid` as lost/stolen. Returns false, changing nothing, when
    /// it already is.
    pub async fn set_lost_stolen(&self, uuid: &str) -> FleetResult<bool> {
        if self.engine.get(uuid).await?.is_found() {
            tracing::warn!(uuid, "UUID already set as lost/stolen");
            return Ok(false);
        }

        let mut entry = Entity::new(&COMPUTER_LOST_STOLEN, uuid);
        entry.set(&self.uuid, Value::from(uuid))?;
        match self.computers.get(uuid).await?.found() {
            Some(computer) => entry.set(&self.computer, computer.entity_ref().to_value())?,
            None => tracing::warn!(uuid, "Lost/stolen UUID has no computer record"),
        }
        self.engine.save(&mut entry).await?;
        self.uuids(true).await?;
        Ok(true)
    }

    /// Record a connection from a lost/stolen computer, appending
    /// `"{time} from {ip}"` to its connection log.
    pub async fn log_connection(&self, uuid: &str, ip_address: &str) -> FleetResult<Entity> {
        let existing = self.engine.get(uuid).await?.found();
        let is_new = existing.is_none();
        let mut entry = existing.unwrap_or_else(|| Entity::new(&COMPUTER_LOST_STOLEN, uuid));

        let now = Utc::now();
        let mut connections = entry
            .get(&self.connections)
            .and_then(Value::as_list)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        connections.push(Value::Str(format!(
            "{} from {}",
            now.format("%Y-%m-%d %H:%M:%S%.6f"),
            ip_address
        )));

        entry.set(&self.uuid, Value::from(uuid))?;
        entry.set(&self.computer, EntityRef::new(COMPUTER.kind(), uuid).to_value())?;
        entry.set(&self.connections, Value::List(connections))?;
        entry.set(&self.mtime, Value::from(now))?;
        self.engine.save(&mut entry).await?;

        if is_new {
            self.engine
                .context()
                .invalidate_derived(LOST_STOLEN_UUIDS)
                .await;
        }
        Ok(entry)
    }

    /// Rebuild the UUID set on the batch queue after lost/stolen writes.
    pub fn register_refresh_task(&self) {
        let registry = self.clone();
        let task = BatchTask::new("refresh_lost_stolen_uuids", move || {
            let registry = registry.clone();
            async move { registry.uuids(true).await.map(|_| ()) }
        });
        self.engine
            .context()
            .queue()
            .register_task(COMPUTER_LOST_STOLEN.kind(), task);
    }
}
