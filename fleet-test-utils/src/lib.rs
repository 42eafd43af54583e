//! Fleet Test Utilities
//!
//! Shared test infrastructure for the fleet workspace:
//! - Proptest generators for values, key names and addresses
//! - A harness wiring an entity cache over in-memory backends
//! - Assertions for cached lookups and error variants

use std::sync::Arc;
use std::time::Duration;

pub use fleet_core::{
    CacheConfig, Entity, EntityRef, FleetError, FleetResult, Schema, Timestamp, UsageError,
    ValidationError, Value, ValueType,
};
pub use fleet_storage::{
    BatchUpdateQueue, CacheContext, EntityCache, InMemoryCacheClient, InMemoryStore, Lookup,
    ManualScheduler,
};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for entity values and inputs.

    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    /// Generate a plausible entity key name.
    pub fn arb_key_name() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9._-]{0,31}"
    }

    /// Generate a UTC timestamp with whole-second precision between 2001 and 2100.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_000_000_000i64..4_102_444_800i64)
            .prop_filter_map("timestamp out of range", |secs| {
                DateTime::from_timestamp(secs, 0)
            })
    }

    /// Generate a scalar (non-list) value.
    pub fn arb_scalar_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            ".{0,40}".prop_map(Value::Str),
            any::<i64>().prop_map(Value::Int),
            any::<bool>().prop_map(Value::Bool),
            arb_timestamp().prop_map(Value::Timestamp),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
        ]
    }

    /// Generate any value, including nested lists.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar_value().prop_recursive(3, 24, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(Value::List)
        })
    }

    /// Generate a value of the given type.
    pub fn arb_value_of(value_type: ValueType) -> BoxedStrategy<Value> {
        match value_type {
            ValueType::Str => ".{0,40}".prop_map(Value::Str).boxed(),
            ValueType::Int => any::<i64>().prop_map(Value::Int).boxed(),
            ValueType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
            ValueType::Timestamp => arb_timestamp().prop_map(Value::Timestamp).boxed(),
            ValueType::Bytes => prop::collection::vec(any::<u8>(), 0..64)
                .prop_map(Value::Bytes)
                .boxed(),
            ValueType::List => prop::collection::vec(arb_scalar_value(), 0..6)
                .prop_map(Value::List)
                .boxed(),
        }
    }

    /// Generate a dotted-quad IPv4 address.
    pub fn arb_ipv4() -> impl Strategy<Value = String> {
        any::<[u8; 4]>().prop_map(|[a, b, c, d]| format!("{a}.{b}.{c}.{d}"))
    }

    /// Generate a CIDR block in `a.b.c.d/len` form with host bits cleared.
    pub fn arb_cidr() -> impl Strategy<Value = String> {
        (any::<u32>(), 0u32..=32).prop_map(|(addr, len)| {
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            let [a, b, c, d] = (addr & mask).to_be_bytes();
            format!("{a}.{b}.{c}.{d}/{len}")
        })
    }

    /// Generate a reference to an entity of `kind`.
    pub fn arb_entity_ref(kind: &'static str) -> impl Strategy<Value = EntityRef> {
        arb_key_name().prop_map(move |key| EntityRef::new(kind, key))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired backends for engine and model tests.

    use super::*;

    /// In-memory store, in-memory cache and a manual scheduler behind one
    /// [`CacheContext`].
    ///
    /// Batch drains only run when the test calls
    /// `harness.scheduler.run_pending()`.
    #[derive(Debug)]
    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub cache: Arc<InMemoryCacheClient>,
        pub scheduler: Arc<ManualScheduler>,
        pub ctx: CacheContext,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(test_config())
        }

        pub fn with_config(config: CacheConfig) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let cache = Arc::new(InMemoryCacheClient::with_max_item_bytes(
                config.max_item_bytes,
            ));
            let scheduler = Arc::new(ManualScheduler::new());
            let queue = BatchUpdateQueue::new(scheduler.clone(), config.batch_delay);
            let ctx = CacheContext::new(store.clone(), cache.clone(), queue, config);
            Self {
                store,
                cache,
                scheduler,
                ctx,
            }
        }

        /// Engine for one kind, sharing this harness's backends.
        pub fn engine(&self, schema: &'static Schema) -> EntityCache {
            self.ctx.entity_cache(schema)
        }
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Default configuration with a small page size so paging paths run.
    pub fn test_config() -> CacheConfig {
        CacheConfig::default()
            .with_page_size(2)
            .with_batch_delay(Duration::from_secs(10))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for lookups and error variants.

    use super::*;

    /// Assert that a lookup found a value and return it.
    #[track_caller]
    pub fn assert_found<T: std::fmt::Debug>(result: FleetResult<Lookup<T>>) -> T {
        match result {
            Ok(Lookup::Found(value)) => value,
            other => panic!("Expected Found, got: {:?}", other),
        }
    }

    /// Assert that a lookup reported an absent entity.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &FleetResult<Lookup<T>>) {
        match result {
            Ok(Lookup::NotFound) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a lookup reported a field missing from an existing entity.
    #[track_caller]
    pub fn assert_missing_field<T: std::fmt::Debug>(result: &FleetResult<Lookup<T>>) {
        match result {
            Ok(Lookup::MissingField) => {}
            other => panic!("Expected MissingField, got: {:?}", other),
        }
    }

    /// Assert that a result is a usage error.
    #[track_caller]
    pub fn assert_usage_error<T: std::fmt::Debug>(result: &FleetResult<T>) {
        match result {
            Err(FleetError::Usage(_)) => {}
            other => panic!("Expected Usage error, got: {:?}", other),
        }
    }

    /// Assert that a result is a validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &FleetResult<T>) {
        match result {
            Err(FleetError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a result is a durable store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &FleetResult<T>) {
        match result {
            Err(FleetError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{FieldDef, FieldDefault};
    use proptest::prelude::*;

    static PROBE: Schema = Schema::new(
        "Probe",
        1,
        &[
            FieldDef::new("enabled", ValueType::Bool).with_default(FieldDefault::Bool(true)),
            FieldDef::new("label", ValueType::Str),
        ],
    );

    #[tokio::test]
    async fn test_harness_engine_roundtrip() {
        let harness = fixtures::Harness::new();
        let engine = harness.engine(&PROBE);
        let label = PROBE.field("label").unwrap();

        engine.set("p1", &label, "hello").await.unwrap();
        let entity = assertions::assert_found(engine.get("p1").await);
        assert_eq!(entity.str_field(&label), Some("hello"));
        assert_eq!(harness.store.len(), 1);
    }

    #[tokio::test]
    async fn test_assertion_not_found() {
        let harness = fixtures::Harness::new();
        let engine = harness.engine(&PROBE);
        assertions::assert_not_found(&engine.get("nobody").await);
    }

    #[tokio::test]
    async fn test_assertion_usage_error() {
        let harness = fixtures::Harness::new();
        let engine = harness.engine(&PROBE);
        assertions::assert_usage_error(&engine.get("").await);
    }

    #[test]
    fn test_config_fixture_is_valid() {
        assert!(fixtures::test_config().validate().is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_value_matches_requested_type(
            (value_type, value) in prop_oneof![
                Just(ValueType::Str),
                Just(ValueType::Int),
                Just(ValueType::Bool),
                Just(ValueType::Timestamp),
                Just(ValueType::Bytes),
                Just(ValueType::List),
            ]
            .prop_flat_map(|t| (Just(t), generators::arb_value_of(t)))
        ) {
            prop_assert_eq!(value.value_type(), value_type);
        }

        #[test]
        fn prop_generated_cidr_has_clear_host_bits(cidr in generators::arb_cidr()) {
            let (addr, len) = cidr.split_once('/').unwrap();
            let len: u32 = len.parse().unwrap();
            let addr: std::net::Ipv4Addr = addr.parse().unwrap();
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            prop_assert_eq!(u32::from(addr) & !mask, 0);
        }

        #[test]
        fn prop_generated_ipv4_parses(ip in generators::arb_ipv4()) {
            prop_assert!(ip.parse::<std::net::Ipv4Addr>().is_ok());
        }

        #[test]
        fn prop_generated_key_names_are_nonempty(key in generators::arb_key_name()) {
            prop_assert!(!key.is_empty());
        }
    }
}
