//! Cached object store: the primary store fronted by the look-aside cache.
//!
//! This is the only surface the rest of the system uses to read and write
//! schema objects. It decides when to trust the cache, when to fall back to a
//! replica and when only the leader will do, and it keeps the fencing and
//! invalidation steps of every write path in the right order.

use std::sync::Arc;

use tessera_core::{EntityId, StorageError, TesseraError, TesseraResult, Version};

use crate::cache::{CacheKey, CacheManager, CacheableItem, LockType, Page, PageRequest, Sentinel};
use crate::store::{ObjectStore, ReadMode};

/// Primary store plus optional shared cache for one object type.
pub struct CachedObjectStore<T: CacheableItem> {
    store: Arc<dyn ObjectStore<T>>,
    cache: Option<Arc<CacheManager>>,
}

impl<T: CacheableItem> Clone for CachedObjectStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
        }
    }
}

impl<T: CacheableItem> CachedObjectStore<T> {
    pub fn new(store: Arc<dyn ObjectStore<T>>, cache: Option<Arc<CacheManager>>) -> Self {
        Self { store, cache }
    }

    /// A store with no cache in front; every read goes to the primary store.
    pub fn uncached(store: Arc<dyn ObjectStore<T>>) -> Self {
        Self::new(store, None)
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore<T>> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Latest live version of `id`.
    pub async fn get_latest(&self, id: EntityId) -> TesseraResult<T> {
        let Some(cache) = &self.cache else {
            return self.store.get_latest(id, ReadMode::Replica).await;
        };

        let lookup = cache.get_item_from_cache::<T>(id, true).await;
        if let Some(item) = lookup.item {
            return Ok(item);
        }

        match self.store.get_latest(id, lookup.read_mode()).await {
            Ok(item) => {
                if !cache.save_item_to_cache(&item, &lookup.sentinel, false, &[]).await {
                    self.release_claims(cache, &[(id, lookup.sentinel)]).await;
                }
                Ok(item)
            }
            Err(e) => {
                self.release_claims(cache, &[(id, lookup.sentinel)]).await;
                Err(e)
            }
        }
    }

    /// Live object whose natural key equals `components` (case-insensitive).
    pub async fn get_by_name<S: AsRef<str>>(&self, components: &[S]) -> TesseraResult<T> {
        let components: Vec<String> = components.iter().map(|c| c.as_ref().to_lowercase()).collect();
        let Some(cache) = &self.cache else {
            return self.store.get_by_name(&components, ReadMode::Replica).await;
        };

        let key = cache.namespace().components_key(T::OBJECT_TYPE, &components);
        let lookup = cache
            .get_item_from_cache_with_modified_key::<T>(&key, &key.is_modified(), true)
            .await;
        if let Some(item) = lookup.item {
            return Ok(item);
        }

        match self.store.get_by_name(&components, lookup.read_mode()).await {
            Ok(item) => {
                // The name key was claimed before the read, so it fences the populate.
                if !cache.populate_under(&item, &key, &lookup.sentinel).await {
                    cache.release_item_lock(&[key], &lookup.sentinel).await;
                }
                Ok(item)
            }
            Err(e) => {
                cache.release_item_lock(&[key], &lookup.sentinel).await;
                Err(e)
            }
        }
    }

    /// Live objects for the ids that exist, in request order.
    pub async fn get_many(&self, ids: &[EntityId]) -> TesseraResult<Vec<T>> {
        let Some(cache) = &self.cache else {
            return self.store.get_many(ids, ReadMode::Replica).await;
        };

        let batch = cache.get_items_from_cache::<T>(ids, true).await;
        if batch.all_hit() {
            return Ok(batch.items.into_iter().flatten().collect());
        }

        let missing: Vec<(EntityId, Sentinel)> = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| batch.items[*i].is_none())
            .map(|(i, id)| (*id, batch.sentinel(i)))
            .collect();
        let missing_ids: Vec<EntityId> = missing.iter().map(|(id, _)| *id).collect();
        let fetched = match self.store.get_many(&missing_ids, batch.read_mode()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.release_claims(cache, &missing).await;
                return Err(e);
            }
        };
        for (id, sentinel) in &missing {
            let saved = match fetched.iter().find(|item| item.id() == *id) {
                Some(item) => cache.save_item_to_cache(item, sentinel, false, &[]).await,
                None => false,
            };
            if !saved {
                self.release_claims(cache, &[(*id, *sentinel)]).await;
            }
        }

        let mut out = Vec::with_capacity(ids.len());
        for (id, cached) in ids.iter().zip(batch.items) {
            match cached {
                Some(item) => out.push(item),
                None => {
                    if let Some(item) = fetched.iter().find(|item| item.id() == *id) {
                        out.push(item.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn release_claims(&self, cache: &CacheManager, claims: &[(EntityId, Sentinel)]) {
        for (id, sentinel) in claims {
            let primary = cache.namespace().object_key(T::OBJECT_TYPE, *id);
            cache.release_item_lock(&[primary], sentinel).await;
        }
    }

    /// One page of live objects ordered by id.
    ///
    /// A first page may be served from the collection cache unless
    /// `force_leader` is set. A complete first page read from the store
    /// populates the collection cache.
    pub async fn list(&self, page: &PageRequest, force_leader: bool) -> TesseraResult<Page<T>> {
        let forced = ReadMode::from_force_leader(force_leader);
        let Some(cache) = self.cache.as_ref() else {
            return self.store.list(page, forced).await;
        };
        if !page.is_collection_eligible() {
            return self.list_cursor_page(cache, page, force_leader).await;
        }

        let lookup = cache.get_collection_from_cache::<T>(true).await;
        if !force_leader {
            if let Some(items) = lookup.item {
                return Ok(Page::from_sorted(items, page, |item| item.id()));
            }
        }

        let mode = if force_leader || lookup.is_dirty() {
            ReadMode::Leader
        } else {
            ReadMode::Replica
        };
        let result = self.store.list(page, mode).await;
        if let Ok(fetched) = &result {
            cache.save_items_to_collection(fetched, &lookup.sentinel).await;
        }
        // An incomplete page leaves the read sentinel behind otherwise.
        let key = T::global_collection_key(cache.namespace());
        cache.release_item_lock(&[key], &lookup.sentinel).await;
        result
    }

    /// A page past the first, cached under its own key until the next write of `T`.
    async fn list_cursor_page(
        &self,
        cache: &CacheManager,
        page: &PageRequest,
        force_leader: bool,
    ) -> TesseraResult<Page<T>> {
        let lookup = cache.get_page_from_cache::<T>(page, true).await;
        if !force_leader {
            if let Some(cached) = lookup.item {
                return Ok(cached);
            }
        }

        let tracked = cache.track_page::<T>(page, &lookup.sentinel).await;
        let mode = if force_leader || lookup.is_dirty() {
            ReadMode::Leader
        } else {
            ReadMode::Replica
        };
        let result = self.store.list(page, mode).await;
        if let (true, Ok(fetched)) = (tracked, &result) {
            cache.save_page_to_cache(page, fetched, &lookup.sentinel).await;
        }
        cache
            .release_item_lock(&[cache.page_key::<T>(page)], &lookup.sentinel)
            .await;
        result
    }

    /// Every live object, following pages until the end.
    pub async fn list_all(&self, force_leader: bool) -> TesseraResult<Vec<T>> {
        let mut request = PageRequest::default();
        let mut all = Vec::new();
        loop {
            let page = self.list(&request, force_leader).await?;
            let last = page.items.last().map(|item| item.id());
            let has_next = page.has_next;
            all.extend(page.items);
            match (has_next, last) {
                (true, Some(last)) => request = PageRequest::after(request.limit, last),
                _ => return Ok(all),
            }
        }
    }

    /// True once `(id, version)` has been soft-deleted.
    pub async fn is_soft_deleted(&self, id: EntityId, version: Version) -> TesseraResult<bool> {
        Ok(self.store.deleted_at(id, version).await?.is_some())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create `item`, refusing duplicates of its id or natural key.
    ///
    /// A duplicate identical in content is reported as an identical conflict so
    /// that callers can treat a retried create as success.
    pub async fn create(&self, item: T) -> TesseraResult<T> {
        item.validate()?;
        self.check_conflicts(&item).await?;

        match &self.cache {
            Some(cache) => {
                let store = &self.store;
                cache.create_item_server(item, |item| store.insert(item)).await
            }
            None => self.store.insert(item).await,
        }
    }

    async fn check_conflicts(&self, item: &T) -> TesseraResult<()> {
        let type_name = T::OBJECT_TYPE.as_str();
        match self.store.get_latest(item.id(), ReadMode::Leader).await {
            Ok(existing) => {
                let identical = existing.content_equals(item);
                let message = if identical {
                    format!("This {} already exists", type_name)
                } else {
                    format!("A {} with ID {} already exists", type_name, item.id())
                };
                return Err(conflict::<T>(item.id(), identical, message));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let natural = item.natural_key();
        if natural.is_empty() {
            return Ok(());
        }
        match self.store.get_by_name(&natural, ReadMode::Leader).await {
            Ok(existing) => {
                let message = format!(
                    "A {} with the name '{}' already exists with ID {}",
                    type_name,
                    item.display_name(),
                    existing.id()
                );
                Err(conflict::<T>(existing.id(), existing.content_equals(item), message))
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Replace `previous` with `updated`. Versioned callers bump the version.
    ///
    /// Keys derived from `previous` but not from `updated` (a rename) are
    /// tombstoned along with their is-modified keys.
    pub async fn update(&self, previous: &T, updated: T) -> TesseraResult<T> {
        updated.validate()?;
        let Some(cache) = &self.cache else {
            return self.store.update(updated).await;
        };

        let ns = cache.namespace();
        let mut keys = cache.item_lock_keys(&updated, LockType::Update);
        let previous_only: Vec<CacheKey> = previous
            .data_keys(ns)
            .into_iter()
            .filter(|key| !keys.contains(key))
            .collect();
        keys.extend(previous_only.iter().cloned());

        let sentinel = cache.take_lock(LockType::Update, &keys).await;
        match self.store.update(updated).await {
            Ok(saved) => {
                let mut stale = Vec::with_capacity(previous_only.len() * 2);
                for key in previous_only {
                    stale.push(key.is_modified());
                    stale.push(key);
                }
                cache.save_item_to_cache(&saved, &sentinel, true, &stale).await;
                cache.release_item_lock(&keys, &sentinel).await;
                Ok(saved)
            }
            Err(e) => {
                cache.release_item_lock(&keys, &sentinel).await;
                Err(e)
            }
        }
    }

    /// Soft-delete one version of `id`.
    pub async fn delete_version(&self, id: EntityId, version: Version) -> TesseraResult<()> {
        self.delete(id, Some(version)).await
    }

    /// Soft-delete every version of `id`.
    pub async fn delete_all_versions(&self, id: EntityId) -> TesseraResult<()> {
        self.delete(id, None).await
    }

    async fn delete(&self, id: EntityId, version: Option<Version>) -> TesseraResult<()> {
        let affected = match &self.cache {
            Some(cache) => {
                let item = self.load_for_delete(cache, id, version).await;
                cache.take_item_lock(LockType::Delete, &item).await;
                let result = self.soft_delete(id, version).await;
                // Runs whether or not the delete went through.
                cache.delete_item_from_cache(&item).await;
                result?
            }
            None => self.soft_delete(id, version).await?,
        };

        if affected == 0 {
            return Err(StorageError::NotFound {
                object_type: T::OBJECT_TYPE,
                id,
            }
            .into());
        }
        tracing::debug!(object_type = %T::OBJECT_TYPE, id = %id, rows = affected, "soft-deleted");
        Ok(())
    }

    async fn soft_delete(&self, id: EntityId, version: Option<Version>) -> TesseraResult<u64> {
        match version {
            Some(version) => self.store.soft_delete_version(id, version).await,
            None => self.store.soft_delete_all(id).await,
        }
    }

    /// The object whose keys a delete must fence: cached copy, leader copy,
    /// or a stub carrying only the id.
    async fn load_for_delete(&self, cache: &CacheManager, id: EntityId, version: Option<Version>) -> T {
        if let Some(item) = cache.get_item_from_cache::<T>(id, false).await.item {
            return item;
        }
        let loaded = match version {
            Some(version) => self.store.get_version(id, version, ReadMode::Leader).await,
            None => self.store.get_latest(id, ReadMode::Leader).await,
        };
        match loaded {
            Ok(item) => item,
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!(id = %id, error = %e, "could not load object before delete, using stub");
                }
                T::stub(id)
            }
        }
    }

    /// Drop every cached slot of this tenant.
    pub async fn flush_cache(&self) -> u64 {
        match &self.cache {
            Some(cache) => cache.flush().await,
            None => 0,
        }
    }
}

fn conflict<T: CacheableItem>(id: EntityId, identical: bool, message: String) -> TesseraError {
    StorageError::Conflict {
        object_type: T::OBJECT_TYPE,
        id,
        identical,
        message,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryProvider, KeyNamespace};
    use crate::store::InMemoryObjectStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tessera_core::{CacheConfig, Column, StoredObject, Timestamp};
    use uuid::Uuid;

    /// Commits `pending` while a reader's primary-store read is in flight.
    ///
    /// The writer's own populate loses to a second writer, whose store write
    /// then fails and releases. Every slot ends up empty and the leader holds
    /// a value the in-flight reader never saw.
    struct RacingStore {
        inner: Arc<InMemoryObjectStore<Column>>,
        cache: Arc<CacheManager>,
        pending: Mutex<Option<Column>>,
    }

    impl RacingStore {
        async fn race(&self) -> TesseraResult<()> {
            let pending = self.pending.lock().map_err(|_| StorageError::LockPoisoned)?.take();
            let Some(newer) = pending else {
                return Ok(());
            };
            let keys = self.cache.item_lock_keys(&newer, LockType::Update);
            let first = self.cache.take_lock(LockType::Update, &keys).await;
            self.inner.update(newer.clone()).await?;
            let second = self.cache.take_lock(LockType::Update, &keys).await;
            assert!(!self.cache.save_item_to_cache(&newer, &first, false, &[]).await);
            self.cache.release_item_lock(&keys, &second).await;
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectStore<Column> for RacingStore {
        async fn get_latest(&self, id: EntityId, mode: ReadMode) -> TesseraResult<Column> {
            self.inner.get_latest(id, mode).await
        }
        async fn get_version(&self, id: EntityId, version: Version, mode: ReadMode) -> TesseraResult<Column> {
            self.inner.get_version(id, version, mode).await
        }
        async fn get_by_name(&self, components: &[String], mode: ReadMode) -> TesseraResult<Column> {
            let read = self.inner.get_by_name(components, mode).await;
            self.race().await?;
            read
        }
        async fn get_many(&self, ids: &[EntityId], mode: ReadMode) -> TesseraResult<Vec<Column>> {
            let read = self.inner.get_many(ids, mode).await;
            self.race().await?;
            read
        }
        async fn list(&self, page: &PageRequest, mode: ReadMode) -> TesseraResult<Page<Column>> {
            let read = self.inner.list(page, mode).await;
            self.race().await?;
            read
        }
        async fn insert(&self, item: Column) -> TesseraResult<Column> {
            self.inner.insert(item).await
        }
        async fn update(&self, item: Column) -> TesseraResult<Column> {
            self.inner.update(item).await
        }
        async fn soft_delete_version(&self, id: EntityId, version: Version) -> TesseraResult<u64> {
            self.inner.soft_delete_version(id, version).await
        }
        async fn soft_delete_all(&self, id: EntityId) -> TesseraResult<u64> {
            self.inner.soft_delete_all(id).await
        }
        async fn deleted_at(&self, id: EntityId, version: Version) -> TesseraResult<Option<Timestamp>> {
            self.inner.deleted_at(id, version).await
        }
    }

    /// A store holding `users.email` as a string, racing a retype to bigint.
    async fn racing_store() -> (CachedObjectStore<Column>, Column) {
        let config = CacheConfig::for_tests();
        let cache = Arc::new(CacheManager::new(
            Arc::new(InMemoryProvider::new(&config)),
            KeyNamespace::new(Uuid::from_u128(51)),
            config,
        ));
        let inner = Arc::new(InMemoryObjectStore::<Column>::new());
        let column = inner
            .insert(Column::new("users", "email", "string"))
            .await
            .expect("insert");
        let mut newer = column.clone();
        newer.data_type = "bigint".into();

        let racing = Arc::new(RacingStore {
            inner,
            cache: Arc::clone(&cache),
            pending: Mutex::new(Some(newer)),
        });
        (CachedObjectStore::new(racing, Some(cache)), column)
    }

    #[tokio::test]
    async fn test_get_by_name_does_not_cache_value_superseded_during_read() {
        let (store, column) = racing_store().await;
        let name = column.natural_key();

        let first = store.get_by_name(&name).await.expect("by name");
        assert_eq!(first.data_type, "string");

        let again = store.get_by_name(&name).await.expect("by name");
        assert_eq!(again.data_type, "bigint");
        let by_id = store.get_latest(column.id()).await.expect("by id");
        assert_eq!(by_id.data_type, "bigint");
    }

    #[tokio::test]
    async fn test_get_many_does_not_cache_value_superseded_during_read() {
        let (store, column) = racing_store().await;

        let first = store.get_many(&[column.id()]).await.expect("get many");
        assert_eq!(first[0].data_type, "string");

        let again = store.get_many(&[column.id()]).await.expect("get many");
        assert_eq!(again[0].data_type, "bigint");
        assert!(store.cache().expect("cached").stats().lost_populates >= 2);
    }

    #[tokio::test]
    async fn test_list_does_not_cache_member_superseded_during_read() {
        let (store, column) = racing_store().await;

        let first = store.list_all(false).await.expect("list");
        assert_eq!(first[0].data_type, "string");

        let cache = store.cache().expect("cached");
        assert!(!cache.get_item_from_cache::<Column>(column.id(), false).await.is_hit());
        assert_eq!(store.list_all(false).await.expect("list")[0].data_type, "bigint");
    }

    #[tokio::test]
    async fn test_cursor_page_served_from_cache_until_update() {
        let config = CacheConfig::for_tests();
        let cache = Arc::new(CacheManager::new(
            Arc::new(InMemoryProvider::new(&config)),
            KeyNamespace::new(Uuid::from_u128(52)),
            config,
        ));
        let inner = Arc::new(InMemoryObjectStore::<Column>::new());
        let store = CachedObjectStore::new(inner.clone(), Some(cache));
        let mut created = Vec::new();
        for name in ["a", "b", "c"] {
            created.push(store.create(Column::new("users", name, "string")).await.expect("create"));
        }
        created.sort_by_key(|c| c.id());
        let request = PageRequest::after(1, created[0].id());

        let first = store.list(&request, false).await.expect("list");
        assert_eq!(first.items.len(), 1);
        let reads = inner.leader_reads() + inner.replica_reads();
        assert_eq!(store.list(&request, false).await.expect("list"), first);
        assert_eq!(inner.leader_reads() + inner.replica_reads(), reads);

        let mut retyped = first.items[0].clone();
        retyped.data_type = "text".into();
        store.update(&first.items[0], retyped).await.expect("update");
        let refreshed = store.list(&request, false).await.expect("list");
        assert_eq!(refreshed.items[0].data_type, "text");
    }

    #[tokio::test]
    async fn test_get_many_releases_claims_for_missing_ids() {
        let (store, column) = racing_store().await;
        let ghost = Uuid::now_v7();
        store.get_many(&[ghost]).await.expect("get many");

        let cache = store.cache().expect("cached");
        let slot = cache
            .provider()
            .get_value(&cache.namespace().object_key(Column::OBJECT_TYPE, ghost), false)
            .await
            .expect("read slot");
        assert!(slot.conflict.is_no_lock());
        assert!(!slot.is_hit());
        assert_eq!(store.get_latest(column.id()).await.expect("get").data_type, "bigint");
    }
}
