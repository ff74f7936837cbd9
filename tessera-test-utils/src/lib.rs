//! Tessera Test Utilities
//!
//! Shared test infrastructure for the Tessera workspace:
//! - Proptest generators for schema objects
//! - Fixtures for common scenarios
//! - Assertions for Tessera error variants
//! - A tracing initializer that writes through the test harness

pub use tessera_core::{
    AccessPolicy, Accessor, CacheConfig, Column, ConvergenceConfig, EntityId, Mutator, ObjectType,
    RateLimitConfig, RateLimitThresholds, StorageError, StoreConfig, StoredObject, TenantId,
    TesseraError, TesseraResult, Timestamp, PASSTHROUGH_NORMALIZER_ID, PASSTHROUGH_TRANSFORMER_ID,
};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a `tracing` subscriber for tests, once per binary.
///
/// Honors `RUST_LOG`; defaults to `warn`. Output goes through the test writer
/// so it is captured per test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for schema objects.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random non-nil UUID.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        any::<[u8; 16]>()
            .prop_filter("id must not be nil", |bytes| bytes.iter().any(|b| *b != 0))
            .prop_map(Uuid::from_bytes)
    }

    /// Generate a tenant id.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        arb_entity_id()
    }

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate an identifier accepted by object validation.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,24}"
    }

    pub fn arb_object_type() -> impl Strategy<Value = ObjectType> {
        prop_oneof![
            Just(ObjectType::Column),
            Just(ObjectType::Accessor),
            Just(ObjectType::Mutator),
            Just(ObjectType::AccessPolicy),
            Just(ObjectType::Transformer),
            Just(ObjectType::SearchIndex),
        ]
    }

    /// Generate a valid column.
    pub fn arb_column() -> impl Strategy<Value = Column> {
        (
            arb_entity_id(),
            arb_identifier(),
            arb_identifier(),
            prop_oneof![Just("string"), Just("int"), Just("timestamp"), Just("bool")],
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(id, table, name, data_type, is_array, immutable)| {
                let mut column = Column::new(table, name, data_type);
                column.base.id = id;
                column.is_array = is_array;
                column.immutable = immutable;
                column
            })
    }

    /// Generate a valid accessor over up to eight columns.
    pub fn arb_accessor() -> impl Strategy<Value = Accessor> {
        (
            arb_entity_id(),
            arb_identifier(),
            prop::collection::vec(arb_entity_id(), 0..8),
            0i64..16,
        )
            .prop_map(|(id, name, column_ids, version)| {
                let transformer_ids = vec![PASSTHROUGH_TRANSFORMER_ID; column_ids.len()];
                let mut accessor = Accessor::new(name, column_ids, transformer_ids);
                accessor.base.id = id;
                accessor.version = version;
                accessor
            })
    }

    /// Generate a valid mutator over up to eight columns.
    pub fn arb_mutator() -> impl Strategy<Value = Mutator> {
        (
            arb_entity_id(),
            arb_identifier(),
            prop::collection::vec(arb_entity_id(), 0..8),
            0i64..16,
        )
            .prop_map(|(id, name, column_ids, version)| {
                let normalizer_ids = vec![PASSTHROUGH_NORMALIZER_ID; column_ids.len()];
                let mut mutator = Mutator::new(name, column_ids, normalizer_ids);
                mutator.base.id = id;
                mutator.version = version;
                mutator
            })
    }

    /// Generate thresholds that pass validation against the default config.
    pub fn arb_thresholds() -> impl Strategy<Value = RateLimitThresholds> {
        prop_oneof![
            Just(RateLimitThresholds::new(0, 0)),
            (1i64..100, 5i64..=60, any::<bool>()).prop_map(|(max, window, announce)| {
                let mut thresholds = RateLimitThresholds::new(max, window);
                thresholds.announce_max_execution_failure = announce;
                thresholds
            }),
        ]
    }

    pub fn arb_access_policy() -> impl Strategy<Value = AccessPolicy> {
        (arb_entity_id(), arb_identifier(), arb_thresholds()).prop_map(|(id, name, thresholds)| {
            let mut policy = AccessPolicy::new(name, thresholds);
            policy.base.id = id;
            policy
        })
    }

    /// Generate a cache config that passes validation.
    pub fn arb_cache_config() -> impl Strategy<Value = CacheConfig> {
        (1u64..600, 1u64..600, 2u64..120, 0u64..200).prop_flat_map(
            |(object_secs, collection_secs, sentinel_secs, delay_ms)| {
                (1u64..=sentinel_secs).prop_map(move |tombstone_secs| {
                    CacheConfig::default()
                        .with_object_ttl(std::time::Duration::from_secs(object_secs))
                        .with_collection_ttl(std::time::Duration::from_secs(collection_secs))
                        .with_sentinel_ttl(std::time::Duration::from_secs(sentinel_secs))
                        .with_tombstone_ttl(std::time::Duration::from_secs(tombstone_secs))
                        .with_invalidation_delay(std::time::Duration::from_millis(delay_ms))
                })
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built objects for common scenarios.

    use super::*;
    use uuid::Uuid;

    /// Fixed tenant so keys are stable across runs.
    pub fn test_tenant() -> TenantId {
        Uuid::from_u128(0x7e55_e7a0_0000_4000_8000_0000_0000_0001)
    }

    /// Store config for [`test_tenant`] with near-immediate invalidation.
    pub fn test_store_config() -> StoreConfig {
        StoreConfig::new(test_tenant()).with_cache(CacheConfig::for_tests())
    }

    pub fn email_column() -> Column {
        Column::new("users", "email", "string")
    }

    pub fn created_at_column() -> Column {
        Column::new("users", "created_at", "timestamp").immutable()
    }

    /// Accessor over `columns`, each through the passthrough transformer.
    pub fn passthrough_accessor(name: &str, columns: &[&Column]) -> Accessor {
        let column_ids: Vec<EntityId> = columns.iter().map(|c| c.id()).collect();
        let transformer_ids = vec![PASSTHROUGH_TRANSFORMER_ID; column_ids.len()];
        Accessor::new(name, column_ids, transformer_ids)
    }

    /// Mutator over `columns`, each through the passthrough normalizer.
    pub fn passthrough_mutator(name: &str, columns: &[&Column]) -> Mutator {
        let column_ids: Vec<EntityId> = columns.iter().map(|c| c.id()).collect();
        let normalizer_ids = vec![PASSTHROUGH_NORMALIZER_ID; column_ids.len()];
        Mutator::new(name, column_ids, normalizer_ids)
    }

    /// Three executions per ten seconds.
    pub fn limited_policy(name: &str) -> AccessPolicy {
        AccessPolicy::new(name, RateLimitThresholds::new(3, 10))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Tessera error variants.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TesseraResult<T>, object_type: ObjectType) {
        match result {
            Err(TesseraError::Storage(StorageError::NotFound { object_type: ot, .. }))
            | Err(TesseraError::Storage(StorageError::NotFoundByName { object_type: ot, .. })) => {
                assert_eq!(*ot, object_type, "Wrong object type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", object_type, other),
        }
    }

    /// Assert a conflict, and whether it was an identical duplicate.
    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &TesseraResult<T>, identical: bool) {
        match result {
            Err(TesseraError::Storage(StorageError::Conflict { identical: got, .. })) => {
                assert_eq!(*got, identical, "Conflict identical flag mismatch");
            }
            other => panic!("Expected Conflict error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a convergence loop gave up after `attempts` attempts.
    #[track_caller]
    pub fn assert_convergence_exhausted<T: std::fmt::Debug>(result: &TesseraResult<T>, attempts: u32) {
        match result {
            Err(TesseraError::Storage(StorageError::ConvergenceExhausted { attempts: got, .. })) => {
                assert_eq!(*got, attempts, "Wrong attempt count");
            }
            other => panic!("Expected ConvergenceExhausted error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_generated_objects_validate(
            column in generators::arb_column(),
            accessor in generators::arb_accessor(),
            mutator in generators::arb_mutator(),
            policy in generators::arb_access_policy(),
        ) {
            prop_assert!(column.validate().is_ok());
            prop_assert!(accessor.validate().is_ok());
            prop_assert!(mutator.validate().is_ok());
            prop_assert!(policy.validate().is_ok());
        }

        #[test]
        fn prop_generated_thresholds_fit_default_config(thresholds in generators::arb_thresholds()) {
            prop_assert!(thresholds.validate(&RateLimitConfig::default()).is_ok());
        }

        #[test]
        fn prop_generated_cache_config_validates(config in generators::arb_cache_config()) {
            prop_assert!(config.validate().is_ok());
        }
    }
}
