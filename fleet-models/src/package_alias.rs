//! Package aliases: short names that resolve to Munki package names.

use fleet_core::{Entity, Field, FieldDef, FieldDefault, FleetResult, Schema, Value, ValueType};
use fleet_storage::{CacheContext, EntityCache, Lookup};

/// Keyed by the alias name.
pub static PACKAGE_ALIAS: Schema = Schema::new(
    "PackageAlias",
    1,
    &[
        FieldDef::new("munki_pkg_name", ValueType::Str),
        FieldDef::new("enabled", ValueType::Bool).with_default(FieldDefault::Bool(true)),
    ],
);

#[derive(Debug, Clone)]
pub struct PackageAliases {
    engine: EntityCache,
    munki_pkg_name: Field,
    enabled: Field,
}

impl PackageAliases {
    pub fn new(ctx: &CacheContext) -> FleetResult<Self> {
        Ok(Self {
            engine: ctx.entity_cache(&PACKAGE_ALIAS),
            munki_pkg_name: PACKAGE_ALIAS.field("munki_pkg_name")?,
            enabled: PACKAGE_ALIAS.field("enabled")?,
        })
    }

    /// Package name for `alias`, or `None` when the alias is unknown,
    /// disabled, or has no package name.
    pub async fn resolve_package_name(&self, alias: &str) -> FleetResult<Option<String>> {
        let entity = match self.engine.get(alias).await? {
            Lookup::Found(entity) => entity,
            Lookup::NotFound | Lookup::MissingField => {
                tracing::error!(pkg_alias = alias, "Unknown pkg_alias requested");
                return Ok(None);
            }
        };
        if entity.bool_field(&self.enabled) != Some(true) {
            return Ok(None);
        }
        Ok(entity
            .str_field(&self.munki_pkg_name)
            .filter(|name| !name.is_empty())
            .map(str::to_string))
    }

    /// Create or replace an alias.
    pub async fn set_alias(
        &self,
        alias: &str,
        munki_pkg_name: &str,
        enabled: bool,
    ) -> FleetResult<Entity> {
        let mut entity = self.engine.get_or_new(alias).await?;
        entity.set(&self.munki_pkg_name, Value::from(munki_pkg_name))?;
        entity.set(&self.enabled, Value::Bool(enabled))?;
        self.engine.save(&mut entity).await?;
        Ok(entity)
    }

    pub async fn delete_alias(&self, alias: &str) -> FleetResult<()> {
        self.engine.delete(alias).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_test_utils::fixtures::Harness;

    #[tokio::test]
    async fn test_resolve_enabled_alias() {
        let harness = Harness::new();
        let aliases = PackageAliases::new(&harness.ctx).unwrap();
        aliases.set_alias("ff", "Firefox", true).await.unwrap();

        assert_eq!(
            aliases.resolve_package_name("ff").await.unwrap(),
            Some("Firefox".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_disabled_and_empty_aliases_resolve_to_none() {
        let harness = Harness::new();
        let aliases = PackageAliases::new(&harness.ctx).unwrap();
        aliases.set_alias("off", "Chrome", false).await.unwrap();
        aliases.set_alias("blank", "", true).await.unwrap();

        assert_eq!(aliases.resolve_package_name("nope").await.unwrap(), None);
        assert_eq!(aliases.resolve_package_name("off").await.unwrap(), None);
        assert_eq!(aliases.resolve_package_name("blank").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_alias_without_name_resolves_to_none() {
        let harness = Harness::new();
        let aliases = PackageAliases::new(&harness.ctx).unwrap();
        let mut bare = Entity::new(&PACKAGE_ALIAS, "bare");
        harness.engine(&PACKAGE_ALIAS).save(&mut bare).await.unwrap();

        assert_eq!(aliases.resolve_package_name("bare").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolution_follows_updates_and_deletes() {
        let harness = Harness::new();
        let aliases = PackageAliases::new(&harness.ctx).unwrap();
        aliases.set_alias("ed", "TextEdit", true).await.unwrap();
        assert_eq!(
            aliases.resolve_package_name("ed").await.unwrap().as_deref(),
            Some("TextEdit")
        );

        aliases.set_alias("ed", "BBEdit", true).await.unwrap();
        assert_eq!(
            aliases.resolve_package_name("ed").await.unwrap().as_deref(),
            Some("BBEdit")
        );

        aliases.delete_alias("ed").await.unwrap();
        assert_eq!(aliases.resolve_package_name("ed").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolution_survives_store_outage_once_cached() {
        let harness = Harness::new();
        let aliases = PackageAliases::new(&harness.ctx).unwrap();
        aliases.set_alias("vlc", "VLC", true).await.unwrap();

        harness.store.clear();
        assert_eq!(
            aliases.resolve_package_name("vlc").await.unwrap().as_deref(),
            Some("VLC")
        );
    }
}
