//! Tags and the cached tag-name index.

use fleet_core::{
    Entity, EntityRef, Field, FieldDef, FieldDefault, FilterExpr, FleetResult, Schema, Stamp,
    Value, ValueType,
};
use fleet_storage::{CacheContext, EntityCache};

use crate::scan;

/// A named tag. The key name is the tag name; `keys` holds the
/// `Kind:key_name` references of the tagged entities.
pub static TAG: Schema = Schema::new(
    "Tag",
    1,
    &[
        FieldDef::new("keys", ValueType::List).with_default(FieldDefault::EmptyList),
        FieldDef::new("user", ValueType::Str),
        FieldDef::new("mrtime", ValueType::Timestamp).stamped(Stamp::OnWrite),
    ],
);

/// Derived cache name of the sorted tag-name list.
pub const ALL_TAGS: &str = "all_tags";

#[derive(Debug, Clone)]
pub struct TagIndex {
    engine: EntityCache,
    keys: Field,
    user: Field,
}

impl TagIndex {
    pub fn new(ctx: &CacheContext) -> FleetResult<Self> {
        Ok(Self {
            engine: ctx.entity_cache(&TAG),
            keys: TAG.field("keys")?,
            user: TAG.field("user")?,
        })
    }

    /// Every tag name, sorted case-insensitively.
    ///
    /// Served from the `all_tags` derived cache; an absent or empty cached
    /// list is recomputed from the store.
    pub async fn all_tag_names(&self) -> FleetResult<Vec<String>> {
        let ctx = self.engine.context();
        if let Some(names) = ctx.get_derived::<Vec<String>>(ALL_TAGS).await {
            if !names.is_empty() {
                return Ok(names);
            }
        }

        let mut names: Vec<String> = scan(&self.engine, &[])
            .await?
            .into_iter()
            .map(|tag| tag.key_name().to_string())
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        tracing::debug!(count = names.len(), "Rebuilt tag name index");

        ctx.set_derived(ALL_TAGS, &names, self.engine.ttl()).await;
        Ok(names)
    }

    /// Names of the tags referencing `target`. Always a live query.
    pub async fn all_tag_names_for_key(&self, target: &EntityRef) -> FleetResult<Vec<String>> {
        let filters = [FilterExpr::eq(&self.keys, target.to_value())];
        Ok(scan(&self.engine, &filters)
            .await?
            .into_iter()
            .map(|tag| tag.key_name().to_string())
            .collect())
    }

    pub async fn all_tag_names_for_entity(&self, entity: &Entity) -> FleetResult<Vec<String>> {
        self.all_tag_names_for_key(&entity.entity_ref()).await
    }

    /// Persist a tag, then drop the name index.
    pub async fn save_tag(&self, tag: &mut Entity) -> FleetResult<()> {
        self.engine.save(tag).await?;
        self.engine.context().invalidate_derived(ALL_TAGS).await;
        Ok(())
    }

    /// Delete a tag by name, then drop the name index.
    pub async fn delete_tag(&self, name: &str) -> FleetResult<()> {
        self.engine.delete(name).await?;
        self.engine.context().invalidate_derived(ALL_TAGS).await;
        Ok(())
    }

    /// Add `target` to the tag `name`, creating the tag if needed.
    pub async fn add_key(
        &self,
        name: &str,
        target: &EntityRef,
        user: Option<&str>,
    ) -> FleetResult<Entity> {
        let mut tag = self.engine.get_or_new(name).await?;
        let reference = target.to_value();
        let mut keys = tag
            .get(&self.keys)
            .and_then(Value::as_list)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        if !keys.contains(&reference) {
            keys.push(reference);
        }
        tag.set(&self.keys, Value::List(keys))?;
        if let Some(user) = user {
            tag.set(&self.user, Value::from(user))?;
        }
        self.save_tag(&mut tag).await?;
        Ok(tag)
    }
}
