//! Client computers and the inactivity sweep.

use chrono::{DateTime, TimeDelta, Utc};
use fleet_core::{
    Entity, Field, FieldDef, FieldDefault, FilterExpr, FleetResult, Schema, Timestamp, Value,
    ValueType,
};
use fleet_storage::{CacheContext, Cursor, EntityCache, Lookup};

use crate::scan;

/// A managed client, keyed by its UUID.
pub static COMPUTER: Schema = Schema::new(
    "Computer",
    1,
    &[
        FieldDef::new("active", ValueType::Bool).with_default(FieldDefault::Bool(true)),
        FieldDef::new("hostname", ValueType::Str),
        FieldDef::new("serial", ValueType::Str),
        FieldDef::new("ip_address", ValueType::Str),
        FieldDef::new("uuid", ValueType::Str),
        FieldDef::new("owner", ValueType::Str),
        FieldDef::new("os_version", ValueType::Str),
        FieldDef::new("site", ValueType::Str),
        FieldDef::new("office", ValueType::Str),
        FieldDef::new("track", ValueType::Str),
        FieldDef::new("preflight_datetime", ValueType::Timestamp),
        FieldDef::new("postflight_datetime", ValueType::Timestamp),
        FieldDef::new("pkgs_to_install", ValueType::List).with_default(FieldDefault::EmptyList),
        FieldDef::new("connections_on_corp", ValueType::Int).with_default(FieldDefault::Int(0)),
        FieldDef::new("connections_off_corp", ValueType::Int).with_default(FieldDefault::Int(0)),
    ],
);

#[derive(Debug, Clone)]
pub struct ComputerRegistry {
    engine: EntityCache,
    active: Field,
    preflight: Field,
}

impl ComputerRegistry {
    pub fn new(ctx: &CacheContext) -> FleetResult<Self> {
        Ok(Self {
            engine: ctx.entity_cache(&COMPUTER),
            active: COMPUTER.field("active")?,
            preflight: COMPUTER.field("preflight_datetime")?,
        })
    }

    pub fn engine(&self) -> &EntityCache {
        &self.engine
    }

    pub async fn get(&self, uuid: &str) -> FleetResult<Lookup<Entity>> {
        self.engine.get(uuid).await
    }

    /// Persist a computer, first deriving `active` from its last preflight.
    pub async fn save(&self, computer: &mut Entity) -> FleetResult<()> {
        self.update_active(computer, Utc::now())?;
        self.engine.save(computer).await
    }

    /// Set `active` from `preflight_datetime` relative to `now`. Computers
    /// that never ran preflight keep their current flag.
    pub fn update_active(&self, computer: &mut Entity, now: Timestamp) -> FleetResult<()> {
        let Some(preflight) = computer.get(&self.preflight).and_then(Value::as_timestamp) else {
            return Ok(());
        };
        let active = preflight > self.cutoff(now);
        computer.set(&self.active, Value::Bool(active))?;
        Ok(())
    }

    /// Every computer currently flagged active. Uncached.
    pub async fn all_active(&self) -> FleetResult<Vec<Entity>> {
        scan(&self.engine, &[FilterExpr::eq(&self.active, true)]).await
    }

    /// Mark active computers whose last preflight is older than the
    /// inactivity window as inactive. Returns how many were changed.
    pub async fn mark_inactive(&self, now: Timestamp) -> FleetResult<usize> {
        let cutoff = self.cutoff(now);
        let filters = [
            FilterExpr::eq(&self.active, true),
            FilterExpr::lt(&self.preflight, cutoff),
        ];
        let page_size = self.engine.context().config().page_size.max(1);
        let mut cursor: Option<Cursor> = None;
        let mut count = 0;

        loop {
            let page = self
                .engine
                .query_page(&filters, page_size, cursor.as_ref())
                .await?;
            for mut computer in page.entities {
                computer.set(&self.active, Value::Bool(false))?;
                self.engine.save(&mut computer).await?;
                count += 1;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(count, cutoff = %cutoff, "Marked stale computers inactive");
        Ok(count)
    }

    fn cutoff(&self, now: Timestamp) -> Timestamp {
        TimeDelta::from_std(self.engine.context().config().inactive_after)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
