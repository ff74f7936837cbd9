//! Cache provider contract and cacheable item keys.
//!
//! This module defines the traits implemented by cache backends and by the
//! objects they hold.

use std::time::Duration;

use async_trait::async_trait;
use tessera_core::{
    Accessor, AccessPolicy, CacheConfig, CacheError, Column, Mutator, ObjectType, StoredObject,
};

use super::key::{CacheKey, KeyNamespace};
use super::sentinel::{LockType, Sentinel};

/// Result of reading one slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotRead {
    /// Data payload, when the slot holds one.
    pub value: Option<String>,
    /// Sentinel occupying the slot in place of data, or `NoLock`.
    pub conflict: Sentinel,
    /// Read sentinel claimed by this call on a miss, or `NoLock`.
    pub sentinel: Sentinel,
}

impl SlotRead {
    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }
}

/// Cache backend contract.
///
/// Implementations must apply each call atomically with respect to other
/// calls on the same backend, including calls from other processes when the
/// backend is shared.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// True when the provider fronts a shared tier with a process-local one.
    fn is_layered(&self) -> bool {
        false
    }

    /// Read one slot, claiming it with a read sentinel if `lock_on_miss` and empty.
    async fn get_value(&self, key: &CacheKey, lock_on_miss: bool) -> Result<SlotRead, CacheError>;

    /// Read several slots in one round trip. `lock_on_miss` is per key.
    async fn get_values(
        &self,
        keys: &[CacheKey],
        lock_on_miss: &[bool],
    ) -> Result<Vec<SlotRead>, CacheError>;

    /// Write `value` into every key of `keys_to_set` if and only if `lock_key`
    /// still holds `sentinel`. Returns whether the write happened.
    async fn set_value(
        &self,
        lock_key: &CacheKey,
        keys_to_set: &[CacheKey],
        value: &str,
        sentinel: &Sentinel,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Remove keys, or replace them with tombstones when `set_tombstone`.
    /// Without `force`, slots holding an in-flight token are left alone.
    async fn delete_value(
        &self,
        keys: &[CacheKey],
        set_tombstone: bool,
        force: bool,
    ) -> Result<(), CacheError>;

    /// Mint a sentinel of `lock_type` and write it into `keys` following the
    /// precedence rules. Read locks cover only the first key and return
    /// `NoLock` when it is not empty.
    async fn write_sentinel(
        &self,
        lock_type: LockType,
        keys: &[CacheKey],
    ) -> Result<Sentinel, CacheError>;

    /// Clear every slot in `keys` still holding `sentinel`.
    async fn release_sentinel(&self, keys: &[CacheKey], sentinel: &Sentinel)
        -> Result<(), CacheError>;

    /// Record `dependents` in the dependency list at each of `dependency_keys`,
    /// so that clearing the list later drops them. Fails with
    /// `DependencyTombstoned` when a list is tombstoned: the object it belongs
    /// to is being deleted and nothing derived from it may be cached.
    async fn add_dependency(
        &self,
        dependency_keys: &[CacheKey],
        dependents: &[CacheKey],
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove every key listed at `key`, then remove the list itself or
    /// tombstone it when `set_tombstone`. Dependents holding a writer's token
    /// are left in place. Returns the keys removed.
    async fn clear_dependencies(
        &self,
        key: &CacheKey,
        set_tombstone: bool,
    ) -> Result<Vec<CacheKey>, CacheError>;

    /// Drop every key starting with `prefix`. Returns the number removed.
    async fn flush(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Admit one execution if the counters in `keys` sum below `limit`.
    /// The last key is the current bucket; it is created with `ttl`.
    async fn reserve_rate_limit_slot(
        &self,
        keys: &[CacheKey],
        limit: i64,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Give back one execution by decrementing the earliest non-empty bucket.
    async fn release_rate_limit_slot(&self, keys: &[CacheKey]) -> Result<bool, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Misses that were flagged dirty and forced a leader read.
    pub dirty_misses: u64,
    /// Populates discarded because the slot no longer held the caller's sentinel.
    pub lost_populates: u64,
    /// Backend failures swallowed by the cache layer.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key derivation for objects held in the look-aside cache.
///
/// Every method has a default built from the object's identity; types only
/// override what differs.
pub trait CacheableItem: StoredObject {
    fn primary_key(&self, ns: &KeyNamespace) -> CacheKey {
        ns.object_key(Self::OBJECT_TYPE, self.id())
    }

    fn secondary_keys(&self, ns: &KeyNamespace) -> Vec<CacheKey> {
        let natural = self.natural_key();
        if natural.is_empty() {
            Vec::new()
        } else {
            vec![ns.components_key(Self::OBJECT_TYPE, &natural)]
        }
    }

    fn global_collection_key(ns: &KeyNamespace) -> CacheKey {
        ns.collection_key(Self::OBJECT_TYPE)
    }

    /// Dependency list of cached cursor pages of this type.
    fn global_collection_pages_key(ns: &KeyNamespace) -> CacheKey {
        ns.collection_pages_key(Self::OBJECT_TYPE)
    }

    /// Where keys derived from this item are listed.
    fn dependencies_key(&self, ns: &KeyNamespace) -> CacheKey {
        ns.dependencies_key(Self::OBJECT_TYPE, self.id())
    }

    /// Dependency lists of the objects this item is built from. A cached copy
    /// is dropped whenever one of them changes.
    fn dependency_keys(&self, _ns: &KeyNamespace) -> Vec<CacheKey> {
        Vec::new()
    }

    /// Collection keys scoped to this item, invalidated only on delete.
    fn per_item_collection_keys(&self, _ns: &KeyNamespace) -> Vec<CacheKey> {
        Vec::new()
    }

    fn is_modified_key(&self, ns: &KeyNamespace) -> CacheKey {
        self.primary_key(ns).is_modified()
    }

    fn is_modified_collection_key(ns: &KeyNamespace) -> CacheKey {
        Self::global_collection_key(ns).is_modified()
    }

    fn ttl(&self, config: &CacheConfig) -> Duration {
        config.object_ttl
    }

    /// Primary key followed by secondary keys.
    fn data_keys(&self, ns: &KeyNamespace) -> Vec<CacheKey> {
        let mut keys = vec![self.primary_key(ns)];
        keys.extend(self.secondary_keys(ns));
        keys
    }
}

impl CacheableItem for Column {}

impl CacheableItem for Accessor {
    fn dependency_keys(&self, ns: &KeyNamespace) -> Vec<CacheKey> {
        self.column_ids
            .iter()
            .map(|id| ns.dependencies_key(ObjectType::Column, *id))
            .collect()
    }
}

impl CacheableItem for Mutator {
    fn dependency_keys(&self, ns: &KeyNamespace) -> Vec<CacheKey> {
        self.column_ids
            .iter()
            .map(|id| ns.dependencies_key(ObjectType::Column, *id))
            .collect()
    }
}

impl CacheableItem for AccessPolicy {
    /// Per-policy collection of rate-limit counters goes stale with the policy.
    fn per_item_collection_keys(&self, ns: &KeyNamespace) -> Vec<CacheKey> {
        vec![ns.static_key(Self::OBJECT_TYPE, &format!("limits-{}", self.id()))]
    }
}
