//! Look-aside object cache.
//!
//! [`CacheManager`] owns the key namespace of one tenant and a shared
//! [`CacheProvider`]. Callers read through it first and fall back to the
//! primary store themselves. Every write path is fenced by sentinels:
//!
//! - readers that miss on an empty slot claim it with a read sentinel and may
//!   populate it only while the slot still holds that sentinel;
//! - writers lock every key derived from the item before touching the primary
//!   store, which voids any pending populate;
//! - deleters tombstone every derived key once the primary store has changed,
//!   which forces leader reads until the tombstones expire;
//! - items built from other objects register their keys in those objects'
//!   dependency lists before populating, and writers clear the lists.
//!
//! Cache failures never reach callers. They are logged and the operation
//! degrades to a miss.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tessera_core::{CacheConfig, CacheError, EntityId, TesseraResult};

use super::key::{CacheKey, KeyNamespace};
use super::lookup::{BatchLookup, CacheLookup};
use super::sentinel::{LockType, Sentinel};
use super::traits::{CacheProvider, CacheStats, CacheableItem};

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    dirty_misses: AtomicU64,
    lost_populates: AtomicU64,
    errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Tenant-scoped look-aside cache over a shared provider.
pub struct CacheManager {
    provider: Arc<dyn CacheProvider>,
    namespace: KeyNamespace,
    config: CacheConfig,
    stats: StatCounters,
}

impl CacheManager {
    pub fn new(provider: Arc<dyn CacheProvider>, namespace: KeyNamespace, config: CacheConfig) -> Self {
        Self {
            provider,
            namespace,
            config,
            stats: StatCounters::default(),
        }
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            dirty_misses: self.stats.dirty_misses.load(Ordering::Relaxed),
            lost_populates: self.stats.lost_populates.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    /// Record a swallowed cache failure.
    pub(crate) fn log_failure(&self, operation: &str, error: &CacheError) {
        bump(&self.stats.errors);
        if error.is_cancelled() {
            tracing::warn!(operation, provider = self.provider.name(), error = %error, "cache operation cancelled");
        } else {
            tracing::error!(operation, provider = self.provider.name(), error = %error, "cache operation failed");
        }
    }

    fn record(&self, hit: bool, dirty: bool) {
        if hit {
            bump(&self.stats.hits);
        } else {
            bump(&self.stats.misses);
            if dirty {
                bump(&self.stats.dirty_misses);
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read `key` and its is-modified companion in one round trip.
    ///
    /// A tombstone on either key is a dirty miss. With `lock_on_miss`, an
    /// empty data slot is claimed with a read sentinel returned in the lookup.
    pub async fn get_item_from_cache_with_modified_key<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        is_modified_key: &CacheKey,
        lock_on_miss: bool,
    ) -> CacheLookup<T> {
        let keys = [key.clone(), is_modified_key.clone()];
        let reads = match self.provider.get_values(&keys, &[lock_on_miss, false]).await {
            Ok(reads) => reads,
            Err(e) => {
                self.log_failure("get_item", &e);
                return CacheLookup::miss();
            }
        };
        let (Some(data), Some(marker)) = (reads.first(), reads.get(1)) else {
            return CacheLookup::miss();
        };

        if marker.conflict.is_tombstone() || data.conflict.is_tombstone() {
            self.record(false, true);
            return CacheLookup::dirty(data.sentinel);
        }

        if let Some(payload) = &data.value {
            match serde_json::from_str::<T>(payload) {
                Ok(item) => {
                    self.record(true, false);
                    return CacheLookup::hit(item);
                }
                Err(e) => {
                    self.log_failure("decode_item", &CacheError::Serialization { reason: e.to_string() });
                    self.record(false, false);
                    return CacheLookup::miss();
                }
            }
        }

        self.record(false, false);
        CacheLookup {
            item: None,
            conflict: data.conflict,
            sentinel: data.sentinel,
        }
    }

    /// Read an item by id.
    pub async fn get_item_from_cache<T: CacheableItem>(&self, id: EntityId, lock_on_miss: bool) -> CacheLookup<T> {
        let key = self.namespace.object_key(T::OBJECT_TYPE, id);
        let marker = key.is_modified();
        self.get_item_from_cache_with_modified_key(&key, &marker, lock_on_miss)
            .await
    }

    /// Read several items by id. With `lock_on_miss`, each empty primary
    /// slot is claimed with its own read sentinel.
    pub async fn get_items_from_cache<T: CacheableItem>(
        &self,
        ids: &[EntityId],
        lock_on_miss: bool,
    ) -> BatchLookup<T> {
        let mut keys = Vec::with_capacity(ids.len() * 2);
        let mut locks = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            let key = self.namespace.object_key(T::OBJECT_TYPE, *id);
            keys.push(key.is_modified());
            keys.push(key);
            locks.extend([false, lock_on_miss]);
        }
        let reads = match self.provider.get_values(&keys, &locks).await {
            Ok(reads) => reads,
            Err(e) => {
                self.log_failure("get_items", &e);
                return BatchLookup::empty(ids.len());
            }
        };

        let mut batch = BatchLookup::empty(0);
        for pair in reads.chunks(2) {
            let [marker, data] = pair else {
                batch.items.push(None);
                batch.sentinels.push(Sentinel::NoLock);
                continue;
            };
            batch.sentinels.push(data.sentinel);
            if marker.conflict.is_tombstone() || data.conflict.is_tombstone() {
                batch.dirty = true;
                self.record(false, true);
                batch.items.push(None);
                continue;
            }
            let item = data
                .value
                .as_deref()
                .and_then(|payload| serde_json::from_str::<T>(payload).ok());
            self.record(item.is_some(), false);
            batch.items.push(item);
        }
        batch.items.resize_with(ids.len(), || None);
        batch.sentinels.resize(ids.len(), Sentinel::NoLock);
        batch
    }

    // ========================================================================
    // Populate
    // ========================================================================

    /// Write `item` into its primary and secondary keys if the primary slot
    /// still holds `sentinel`.
    ///
    /// With `clear_collection`, also tombstones the collection key, the
    /// item's is-modified key, the collection's is-modified key and every key
    /// in `extra_keys`, whether or not the populate went through. Keys cached
    /// from other objects that depend on this item are dropped as well.
    /// Returns whether the populate went through.
    pub async fn save_item_to_cache<T: CacheableItem>(
        &self,
        item: &T,
        sentinel: &Sentinel,
        clear_collection: bool,
        extra_keys: &[CacheKey],
    ) -> bool {
        let written = self.populate(item, sentinel).await;
        if clear_collection {
            let mut doomed = vec![item.is_modified_key(&self.namespace)];
            doomed.extend_from_slice(extra_keys);
            self.invalidate_collection::<T>(&doomed).await;
            self.clear_dependencies(&item.dependencies_key(&self.namespace), false)
                .await;
        }
        written
    }

    async fn populate<T: CacheableItem>(&self, item: &T, sentinel: &Sentinel) -> bool {
        let primary = item.primary_key(&self.namespace);
        self.populate_under(item, &primary, sentinel).await
    }

    /// Write `item` into its primary and secondary keys if `lock_key` still
    /// holds `sentinel`.
    ///
    /// `lock_key` is the slot the caller claimed before reading the primary
    /// store: the primary key, the name key of a by-name read, or the
    /// collection key when members come from a listing.
    ///
    /// The item's keys are registered with every object it depends on first,
    /// so a change to one of them after this point drops the claim and the
    /// write below loses. Nothing is written while one of them is being
    /// deleted.
    pub async fn populate_under<T: CacheableItem>(&self, item: &T, lock_key: &CacheKey, sentinel: &Sentinel) -> bool {
        if sentinel.token().is_none() {
            return false;
        }
        let payload = match serde_json::to_string(item) {
            Ok(payload) => payload,
            Err(e) => {
                self.log_failure("encode_item", &CacheError::Serialization { reason: e.to_string() });
                return false;
            }
        };
        let keys = item.data_keys(&self.namespace);
        let ttl = item.ttl(&self.config);
        let dependencies = item.dependency_keys(&self.namespace);
        if !dependencies.is_empty() {
            match self.provider.add_dependency(&dependencies, &keys, ttl).await {
                Ok(()) => {}
                Err(e) if e.is_dependency_tombstoned() => {
                    tracing::debug!(key = %lock_key, error = %e, "populate skipped, dependency being deleted");
                    return false;
                }
                Err(e) => {
                    self.log_failure("add_dependency", &e);
                    return false;
                }
            }
        }
        match self
            .provider
            .set_value(lock_key, &keys, &payload, sentinel, ttl)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                bump(&self.stats.lost_populates);
                tracing::debug!(key = %lock_key, "populate lost to a newer sentinel");
                false
            }
            Err(e) => {
                self.log_failure("save_item", &e);
                false
            }
        }
    }

    /// Tombstone the collection key of `T`, its is-modified key and
    /// `extra_keys`, then drop every cached cursor page of `T`.
    pub async fn invalidate_collection<T: CacheableItem>(&self, extra_keys: &[CacheKey]) {
        let collection = T::global_collection_key(&self.namespace);
        let mut keys = vec![T::is_modified_collection_key(&self.namespace), collection];
        keys.extend_from_slice(extra_keys);
        if let Err(e) = self.provider.delete_value(&keys, true, true).await {
            self.log_failure("invalidate_collection", &e);
        }
        self.clear_dependencies(&T::global_collection_pages_key(&self.namespace), false)
            .await;
    }

    /// Drop every key listed at `key`, tombstoning the list when
    /// `set_tombstone`.
    pub async fn clear_dependencies(&self, key: &CacheKey, set_tombstone: bool) {
        match self.provider.clear_dependencies(key, set_tombstone).await {
            Ok(removed) if !removed.is_empty() => {
                tracing::debug!(key = %key, removed = removed.len(), "dropped dependent keys");
            }
            Ok(_) => {}
            Err(e) => self.log_failure("clear_dependencies", &e),
        }
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Every key a write of `lock_type` must fence for `item`.
    pub fn item_lock_keys<T: CacheableItem>(&self, item: &T, lock_type: LockType) -> Vec<CacheKey> {
        let mut keys = item.data_keys(&self.namespace);
        keys.push(T::global_collection_key(&self.namespace));
        if lock_type == LockType::Delete {
            keys.extend(item.per_item_collection_keys(&self.namespace));
        }
        keys
    }

    /// Write a sentinel of `lock_type` into every key. `NoLock` on failure.
    pub async fn take_lock(&self, lock_type: LockType, keys: &[CacheKey]) -> Sentinel {
        match self.provider.write_sentinel(lock_type, keys).await {
            Ok(sentinel) => sentinel,
            Err(e) => {
                self.log_failure("take_lock", &e);
                Sentinel::NoLock
            }
        }
    }

    /// Lock every key derived from `item`. The primary-store write proceeds
    /// even when this returns `NoLock`.
    ///
    /// A delete also tombstones the item's dependency list, so nothing built
    /// from it can be cached until the tombstone expires.
    pub async fn take_item_lock<T: CacheableItem>(&self, lock_type: LockType, item: &T) -> Sentinel {
        let keys = self.item_lock_keys(item, lock_type);
        let sentinel = self.take_lock(lock_type, &keys).await;
        if lock_type == LockType::Delete {
            self.clear_dependencies(&item.dependencies_key(&self.namespace), true)
                .await;
        }
        sentinel
    }

    /// Clear the slots in `keys` still holding `sentinel`.
    pub async fn release_item_lock(&self, keys: &[CacheKey], sentinel: &Sentinel) {
        if sentinel.token().is_none() {
            return;
        }
        if let Err(e) = self.provider.release_sentinel(keys, sentinel).await {
            self.log_failure("release_lock", &e);
        }
    }

    // ========================================================================
    // Write paths
    // ========================================================================

    /// Tombstone every key derived from `item`, including is-modified keys
    /// and the collection keys it belongs to.
    pub async fn delete_item_from_cache<T: CacheableItem>(&self, item: &T) {
        let mut keys = Vec::new();
        for key in item.data_keys(&self.namespace) {
            keys.push(key.is_modified());
            keys.push(key);
        }
        let collection = T::global_collection_key(&self.namespace);
        keys.push(collection.is_modified());
        keys.push(collection);
        keys.extend(item.per_item_collection_keys(&self.namespace));
        if let Err(e) = self.provider.delete_value(&keys, true, true).await {
            self.log_failure("delete_item", &e);
        }
        self.clear_dependencies(&item.dependencies_key(&self.namespace), true)
            .await;
        self.clear_dependencies(&T::global_collection_pages_key(&self.namespace), false)
            .await;
    }

    /// Create `item` through `insert` under a create lock.
    ///
    /// On success the created item is populated and the collection is
    /// invalidated. On failure the collection is still invalidated and the
    /// insert error is returned.
    pub async fn create_item_server<T, F, Fut>(&self, item: T, insert: F) -> TesseraResult<T>
    where
        T: CacheableItem,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = TesseraResult<T>>,
    {
        item.validate()?;
        let keys = self.item_lock_keys(&item, LockType::Create);
        let sentinel = self.take_lock(LockType::Create, &keys).await;

        match insert(item).await {
            Ok(created) => {
                self.save_item_to_cache(&created, &sentinel, true, &[]).await;
                self.release_item_lock(&keys, &sentinel).await;
                Ok(created)
            }
            Err(e) => {
                self.release_item_lock(&keys, &sentinel).await;
                self.invalidate_collection::<T>(&[]).await;
                Err(e)
            }
        }
    }

    /// Drop every cached slot of this tenant.
    pub async fn flush(&self) -> u64 {
        match self.provider.flush(self.namespace.tenant_prefix()).await {
            Ok(removed) => removed,
            Err(e) => {
                self.log_failure("flush", &e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryProvider;
    use std::time::Duration;
    use tessera_core::{Accessor, Column, StorageError, StoredObject, TesseraError};
    use uuid::Uuid;

    fn manager() -> CacheManager {
        let config = CacheConfig::for_tests();
        CacheManager::new(
            Arc::new(InMemoryProvider::new(&config)),
            KeyNamespace::new(Uuid::from_u128(11)),
            config,
        )
    }

    /// Populate `column` the way a reader would: claim, then save.
    async fn seed(cache: &CacheManager, column: &Column) {
        let miss = cache.get_item_from_cache::<Column>(column.id(), true).await;
        assert!(cache.save_item_to_cache(column, &miss.sentinel, false, &[]).await);
    }

    #[tokio::test]
    async fn test_miss_then_populate_then_hit() {
        let cache = manager();
        let column = Column::new("users", "email", "string");

        let miss = cache.get_item_from_cache::<Column>(column.id(), true).await;
        assert!(!miss.is_hit());
        assert!(miss.sentinel.token().is_some());

        assert!(cache.save_item_to_cache(&column, &miss.sentinel, false, &[]).await);
        let hit = cache.get_item_from_cache::<Column>(column.id(), true).await;
        assert_eq!(hit.item.map(|c| c.name), Some("email".to_string()));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_populate_after_write_lock_is_lost() {
        let cache = manager();
        let column = Column::new("users", "email", "string");

        let miss = cache.get_item_from_cache::<Column>(column.id(), true).await;
        cache.take_item_lock(LockType::Update, &column).await;
        assert!(!cache.save_item_to_cache(&column, &miss.sentinel, false, &[]).await);
        assert_eq!(cache.stats().lost_populates, 1);
    }

    #[tokio::test]
    async fn test_populate_under_name_key_is_fenced_by_writers() {
        let cache = manager();
        let column = Column::new("users", "email", "string");
        let by_name = cache.namespace().components_key(Column::OBJECT_TYPE, &column.natural_key());

        let reader: CacheLookup<Column> = cache
            .get_item_from_cache_with_modified_key(&by_name, &by_name.is_modified(), true)
            .await;
        assert!(reader.sentinel.token().is_some());

        // A writer that comes and goes after the claim still voids it.
        let writer = cache.take_item_lock(LockType::Update, &column).await;
        cache.release_item_lock(&cache.item_lock_keys(&column, LockType::Update), &writer).await;
        assert!(!cache.populate_under(&column, &by_name, &reader.sentinel).await);
        assert!(!cache.get_item_from_cache::<Column>(column.id(), false).await.is_hit());

        let fresh: CacheLookup<Column> = cache
            .get_item_from_cache_with_modified_key(&by_name, &by_name.is_modified(), true)
            .await;
        assert!(cache.populate_under(&column, &by_name, &fresh.sentinel).await);
        assert!(cache.get_item_from_cache::<Column>(column.id(), false).await.is_hit());
    }

    /// Claim `accessor` and populate it, returning whether the write went through.
    async fn cache_accessor(cache: &CacheManager, accessor: &Accessor) -> bool {
        let miss = cache.get_item_from_cache::<Accessor>(accessor.id(), true).await;
        cache.save_item_to_cache(accessor, &miss.sentinel, false, &[]).await
    }

    #[tokio::test]
    async fn test_column_update_drops_accessors_built_on_it() {
        let cache = manager();
        let email = Column::new("users", "email", "string");
        let other = Column::new("users", "name", "string");
        let reader = Accessor::new("reader", vec![email.id()], vec![Uuid::nil()]);
        let unrelated = Accessor::new("namer", vec![other.id()], vec![Uuid::nil()]);
        assert!(cache_accessor(&cache, &reader).await);
        assert!(cache_accessor(&cache, &unrelated).await);

        let mut retyped = email.clone();
        retyped.data_type = "text".into();
        let writer = cache.take_item_lock(LockType::Update, &retyped).await;
        cache.save_item_to_cache(&retyped, &writer, true, &[]).await;

        assert!(!cache.get_item_from_cache::<Accessor>(reader.id(), false).await.is_hit());
        assert!(cache.get_item_from_cache::<Accessor>(unrelated.id(), false).await.is_hit());
    }

    #[tokio::test]
    async fn test_column_change_during_read_voids_accessor_populate() {
        let cache = manager();
        let email = Column::new("users", "email", "string");
        let reader = Accessor::new("reader", vec![email.id()], vec![Uuid::nil()]);

        let miss = cache.get_item_from_cache::<Accessor>(reader.id(), true).await;
        let ns = cache.namespace();
        cache
            .provider()
            .add_dependency(&reader.dependency_keys(ns), &reader.data_keys(ns), Duration::from_secs(60))
            .await
            .expect("add");
        let writer = cache.take_item_lock(LockType::Update, &email).await;
        cache.save_item_to_cache(&email, &writer, true, &[]).await;

        assert!(!cache.save_item_to_cache(&reader, &miss.sentinel, false, &[]).await);
        assert!(!cache.get_item_from_cache::<Accessor>(reader.id(), false).await.is_hit());
    }

    #[tokio::test]
    async fn test_column_delete_blocks_dependent_populates() {
        let cache = manager();
        let email = Column::new("users", "email", "string");
        let reader = Accessor::new("reader", vec![email.id()], vec![Uuid::nil()]);

        cache.take_item_lock(LockType::Delete, &email).await;
        assert!(!cache_accessor(&cache, &reader).await);
        assert!(!cache.get_item_from_cache::<Accessor>(reader.id(), false).await.is_hit());
        assert_eq!(cache.stats().errors, 0, "a tombstoned dependency is not a failure");

        // Objects with no dependencies are unaffected.
        seed(&cache, &Column::new("users", "name", "string")).await;
    }

    #[tokio::test]
    async fn test_populate_with_no_lock_is_noop() {
        let cache = manager();
        let column = Column::new("users", "email", "string");
        assert!(!cache.save_item_to_cache(&column, &Sentinel::NoLock, false, &[]).await);
        assert!(!cache.get_item_from_cache::<Column>(column.id(), false).await.is_hit());
    }

    #[tokio::test]
    async fn test_delete_makes_reads_dirty() {
        let cache = manager();
        let column = Column::new("users", "email", "string");
        seed(&cache, &column).await;

        cache.take_item_lock(LockType::Delete, &column).await;
        cache.delete_item_from_cache(&column).await;

        let lookup = cache.get_item_from_cache::<Column>(column.id(), true).await;
        assert!(lookup.is_dirty());
        assert!(lookup.sentinel.is_no_lock());

        let by_name = cache.namespace().components_key(Column::OBJECT_TYPE, &column.natural_key());
        let lookup: CacheLookup<Column> = cache
            .get_item_from_cache_with_modified_key(&by_name, &by_name.is_modified(), false)
            .await;
        assert!(lookup.is_dirty());
        assert_eq!(cache.stats().dirty_misses, 2);
    }

    #[tokio::test]
    async fn test_get_items_reports_dirty() {
        let cache = manager();
        let kept = Column::new("t", "kept", "int");
        let gone = Column::new("t", "gone", "int");
        seed(&cache, &kept).await;
        cache.delete_item_from_cache(&gone).await;

        let batch = cache
            .get_items_from_cache::<Column>(&[kept.id(), gone.id(), Uuid::now_v7()], true)
            .await;
        assert!(batch.dirty);
        assert_eq!(batch.items.len(), 3);
        assert!(batch.items[0].is_some());
        assert!(batch.items[1].is_none());
        // Only the empty slot is claimed; a tombstone is never overwritten.
        assert!(batch.sentinel(0).is_no_lock());
        assert!(batch.sentinel(1).is_no_lock());
        assert!(batch.sentinel(2).token().is_some());
    }

    #[tokio::test]
    async fn test_create_item_server_populates_and_invalidates() {
        let cache = manager();
        let column = Column::new("users", "email", "string");

        let created = cache
            .create_item_server(column.clone(), |c| async move { Ok(c) })
            .await
            .expect("create should succeed");
        assert_eq!(created.id(), column.id());

        // The collection and the item's is-modified key are tombstoned.
        let collection: CacheLookup<Vec<Column>> = cache
            .get_item_from_cache_with_modified_key(
                &Column::global_collection_key(cache.namespace()),
                &Column::is_modified_collection_key(cache.namespace()),
                false,
            )
            .await;
        assert!(collection.is_dirty());
        assert!(cache.get_item_from_cache::<Column>(column.id(), false).await.is_dirty());
    }

    #[tokio::test]
    async fn test_create_item_server_failure_still_invalidates() {
        let cache = manager();
        let column = Column::new("users", "email", "string");

        let result = cache
            .create_item_server(column.clone(), |_| async {
                Err::<Column, _>(TesseraError::Storage(StorageError::InsertFailed {
                    object_type: Column::OBJECT_TYPE,
                    reason: "duplicate".into(),
                }))
            })
            .await;
        assert!(result.is_err());

        let read = cache
            .provider()
            .get_value(&Column::global_collection_key(cache.namespace()), false)
            .await
            .expect("get");
        assert!(read.conflict.is_tombstone());
        // The create lock was released from the item's own keys.
        let read = cache.provider().get_value(&column.primary_key(cache.namespace()), false).await.expect("get");
        assert!(read.conflict.is_no_lock());
    }

    #[tokio::test]
    async fn test_create_item_server_rejects_invalid_item() {
        let cache = manager();
        let column = Column::new("", "email", "string");
        let result = cache.create_item_server(column, |c| async move { Ok(c) }).await;
        assert!(matches!(result, Err(TesseraError::Validation(_))));
    }

    #[tokio::test]
    async fn test_flush_scoped_to_tenant() {
        let cache = manager();
        let column = Column::new("users", "email", "string");
        seed(&cache, &column).await;
        assert_eq!(cache.flush().await, 2);
    }
}
