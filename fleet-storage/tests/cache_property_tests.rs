//! Property-Based Tests for the Entity Cache
//!
//! **Property 1: Read-your-writes** - after a successful Set, Get returns
//! the written value, whether served from cache or store.
//!
//! **Property 2: Idempotent Set** - applying the same Set twice leaves the
//! same observable state as applying it once.
//!
//! **Property 3: Delete-then-absent** - after Delete, Get reports NotFound
//! and no cache entry for the key survives.
//!
//! **Property 4: Corruption self-healing** - any garbage planted under an
//! entity key is replaced by a valid payload on the next Get.
//!
//! **Property 5: Every value type survives the cache** - a value of each
//! field's declared type comes back unchanged from both Get and GetField.
//!
//! **Property 6: Nested lists and references survive the cache** - list
//! fields holding nested values and reference fields read back unchanged.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    CacheConfig, Entity, EntityRef, FieldDef, FieldDefault, Schema, Value, ValueType,
};
use fleet_storage::{
    BatchUpdateQueue, CacheClient, CacheContext, CacheKey, DurableStore, EntityCache,
    InMemoryCacheClient, InMemoryStore, Lookup, ManualScheduler,
};
use fleet_test_utils::generators::{arb_entity_ref, arb_value, arb_value_of};
use proptest::prelude::*;
use tokio::runtime::Runtime;

static NODE: Schema = Schema::new(
    "Node",
    1,
    &[
        FieldDef::new("active", ValueType::Bool).with_default(FieldDefault::Bool(true)),
        FieldDef::new("label", ValueType::Str),
        FieldDef::new("rack", ValueType::Int),
        FieldDef::new("seen", ValueType::Timestamp),
        FieldDef::new("firmware", ValueType::Bytes),
        FieldDef::new("aliases", ValueType::List),
        FieldDef::new("site", ValueType::Str),
    ],
);

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

struct Setup {
    store: Arc<InMemoryStore>,
    cache: Arc<InMemoryCacheClient>,
    engine: EntityCache,
}

fn setup() -> Setup {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(InMemoryCacheClient::new());
    let queue = BatchUpdateQueue::new(Arc::new(ManualScheduler::new()), Duration::from_secs(10));
    let ctx = CacheContext::new(store.clone(), cache.clone(), queue, CacheConfig::default());
    Setup {
        store,
        cache,
        engine: ctx.entity_cache(&NODE),
    }
}

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

fn key_name_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,24}"
}

fn label_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9 ._-]{0,40}",
        Just(String::new()),
        "[a-z]{200,400}",
    ]
}

fn garbage_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// One value per field of NODE, each of the field's declared type.
fn typed_values_strategy() -> impl Strategy<Value = Vec<(&'static str, Value)>> {
    NODE.all_fields()
        .map(|field| {
            let name = field.name();
            arb_value_of(field.value_type()).prop_map(move |value| (name, value))
        })
        .collect::<Vec<_>>()
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// **Property 1: Read-your-writes**
    #[test]
    fn prop_set_then_get_returns_value(
        key in key_name_strategy(),
        label in label_strategy(),
        rack in any::<i64>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup();
            let label_field = NODE.field("label").unwrap();
            let rack_field = NODE.field("rack").unwrap();

            s.engine.set(&key, &label_field, label.clone()).await.unwrap();
            s.engine.set(&key, &rack_field, rack).await.unwrap();

            let cached = s.engine.get(&key).await.unwrap().found().unwrap();
            prop_assert_eq!(cached.str_field(&label_field), Some(label.as_str()));
            prop_assert_eq!(cached.int_field(&rack_field), Some(rack));

            // Same answer once the cache is gone.
            s.cache.clear();
            let stored = s.engine.get(&key).await.unwrap().found().unwrap();
            prop_assert_eq!(stored, cached);

            prop_assert_eq!(
                s.engine.get_field(&key, &label_field).await.unwrap(),
                Lookup::Found(Value::from(label))
            );
            Ok(())
        })?;
    }

    /// **Property 2: Idempotent Set**
    #[test]
    fn prop_set_is_idempotent(
        key in key_name_strategy(),
        active in any::<bool>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup();
            let active_field = NODE.field("active").unwrap();

            s.engine.set(&key, &active_field, active).await.unwrap();
            let once = s.store.get_by_key("Node", &key).await.unwrap();
            s.engine.set(&key, &active_field, active).await.unwrap();
            let twice = s.store.get_by_key("Node", &key).await.unwrap();

            prop_assert_eq!(once, twice);
            prop_assert_eq!(s.store.len(), 1);
            prop_assert_eq!(
                s.engine.get_field(&key, &active_field).await.unwrap(),
                Lookup::Found(Value::Bool(active))
            );
            Ok(())
        })?;
    }

    /// **Property 3: Delete-then-absent**
    #[test]
    fn prop_delete_leaves_nothing_behind(
        key in key_name_strategy(),
        label in label_strategy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup();
            let label_field = NODE.field("label").unwrap();
            let rack_field = NODE.field("rack").unwrap();

            s.engine.set(&key, &label_field, label).await.unwrap();
            s.engine.get_field(&key, &rack_field).await.unwrap();
            s.engine.delete(key.as_str()).await.unwrap();

            prop_assert_eq!(s.engine.get(&key).await.unwrap(), Lookup::NotFound);
            prop_assert!(!s.cache.contains(&CacheKey::entity("Node", &key)));
            prop_assert!(!s.cache.contains(&CacheKey::field(&label_field, &key)));
            prop_assert!(s.cache.is_empty());
            Ok(())
        })?;
    }

    /// **Property 4: Corruption self-healing**
    #[test]
    fn prop_garbage_entry_is_replaced(
        key in key_name_strategy(),
        garbage in garbage_strategy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup();
            let mut entity = Entity::new(&NODE, key.clone());
            entity.set(&NODE.field("rack").unwrap(), Value::Int(7)).unwrap();
            s.store.put(&entity).await.unwrap();

            let entity_key = CacheKey::entity("Node", &key);
            s.cache.inject_raw(&entity_key, garbage);

            prop_assert_eq!(
                s.engine.get(&key).await.unwrap(),
                Lookup::Found(entity.clone())
            );

            // The entry under the key now decodes.
            let bytes = s.cache.get(&entity_key).await.unwrap().unwrap();
            let codec = fleet_storage::EntityCodec::new(&NODE);
            prop_assert_eq!(codec.decode(&bytes).unwrap(), entity);
            Ok(())
        })?;
    }

    /// **Property 5: Every value type survives the cache**
    #[test]
    fn prop_every_value_type_round_trips(
        key in key_name_strategy(),
        values in typed_values_strategy(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup();
            for (name, value) in &values {
                let field = NODE.field(name).unwrap();
                s.engine.set(&key, &field, value.clone()).await.unwrap();
            }

            let cached = s.engine.get(&key).await.unwrap().found().unwrap();
            for (name, value) in &values {
                let field = NODE.field(name).unwrap();
                prop_assert_eq!(cached.get(&field), Some(value));
                prop_assert_eq!(
                    s.engine.get_field(&key, &field).await.unwrap(),
                    Lookup::Found(value.clone())
                );
            }

            // Store reads decode to the same values.
            s.cache.clear();
            let stored = s.engine.get(&key).await.unwrap().found().unwrap();
            prop_assert_eq!(&stored, &cached);
            for (name, value) in &values {
                let field = NODE.field(name).unwrap();
                prop_assert_eq!(
                    s.engine.get_field(&key, &field).await.unwrap(),
                    Lookup::Found(value.clone())
                );
            }
            Ok(())
        })?;
    }

    /// **Property 6: Nested lists and references survive the cache**
    #[test]
    fn prop_nested_lists_and_refs_round_trip(
        key in key_name_strategy(),
        aliases in prop::collection::vec(arb_value(), 0..4),
        site in arb_entity_ref("Site"),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let s = setup();
            let aliases_field = NODE.field("aliases").unwrap();
            let site_field = NODE.field("site").unwrap();

            s.engine.set(&key, &aliases_field, Value::List(aliases.clone())).await.unwrap();
            s.engine.set(&key, &site_field, site.to_value()).await.unwrap();

            s.cache.clear();
            let stored = s.engine.get(&key).await.unwrap().found().unwrap();
            prop_assert_eq!(stored.get(&aliases_field), Some(&Value::List(aliases.clone())));

            let cached = s.engine.get(&key).await.unwrap().found().unwrap();
            prop_assert_eq!(&cached, &stored);
            let reference = cached.str_field(&site_field).and_then(EntityRef::parse);
            prop_assert_eq!(reference, Some(site));
            prop_assert_eq!(
                s.engine.get_field(&key, &aliases_field).await.unwrap(),
                Lookup::Found(Value::List(aliases))
            );
            Ok(())
        })?;
    }
}
