//! Collection cache: one cached listing per object type.
//!
//! Only a complete listing may populate the collection key. A partial page
//! cached under the global key would later be served as if it were the whole
//! set. The read sentinel guarding the populate is taken on the collection
//! key before the primary-store read, so any member change in between voids
//! it.

use serde::{Deserialize, Serialize};
use tessera_core::EntityId;

use super::key::CacheKey;
use super::lookup::CacheLookup;
use super::look_aside::CacheManager;
use super::sentinel::Sentinel;
use super::traits::CacheableItem;

/// Largest page a list call may request.
pub const MAX_PAGE_SIZE: usize = 1000;

/// A page of a listing, in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    /// Return only items with ids after this one.
    pub starting_after: Option<EntityId>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: MAX_PAGE_SIZE,
            starting_after: None,
        }
    }
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            starting_after: None,
        }
    }

    pub fn after(limit: usize, id: EntityId) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            starting_after: Some(id),
        }
    }

    /// A first page may be answered from, and may fill, the collection cache.
    pub fn is_collection_eligible(&self) -> bool {
        self.starting_after.is_none()
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn single(items: Vec<T>) -> Self {
        Self {
            items,
            has_next: false,
            has_prev: false,
        }
    }

    /// True when the page holds the entire set.
    pub fn is_complete(&self) -> bool {
        !self.has_next && !self.has_prev
    }

    /// Slice a full ordered set the way a page request would.
    pub fn from_sorted(all: Vec<T>, request: &PageRequest, id_of: impl Fn(&T) -> EntityId) -> Self {
        let start = match request.starting_after {
            Some(after) => all.iter().position(|item| id_of(item) > after).unwrap_or(all.len()),
            None => 0,
        };
        let has_prev = start > 0;
        let has_next = all.len() > start + request.limit;
        let items = all.into_iter().skip(start).take(request.limit).collect();
        Self {
            items,
            has_next,
            has_prev,
        }
    }
}

impl CacheManager {
    /// Read the cached listing of `T`.
    ///
    /// A tombstoned collection (or collection is-modified key) is a dirty
    /// miss. With `lock_on_miss` an empty collection slot is claimed so that
    /// the caller may populate it after reading the primary store.
    pub async fn get_collection_from_cache<T: CacheableItem>(&self, lock_on_miss: bool) -> CacheLookup<Vec<T>> {
        let key = T::global_collection_key(self.namespace());
        let marker = T::is_modified_collection_key(self.namespace());
        self.get_item_from_cache_with_modified_key(&key, &marker, lock_on_miss)
            .await
    }

    /// Populate the collection key from a page read under `sentinel`.
    ///
    /// Incomplete pages are ignored. Members are also written to their own
    /// slots, each write fenced by the collection sentinel: any member write
    /// locks the collection key, so a member that changed since the listing
    /// was read is never cached from it. Returns whether the collection key
    /// was written.
    pub async fn save_items_to_collection<T: CacheableItem>(&self, page: &Page<T>, sentinel: &Sentinel) -> bool {
        if !page.is_complete() || sentinel.token().is_none() {
            return false;
        }

        let key = T::global_collection_key(self.namespace());
        for item in &page.items {
            if !self.populate_under(item, &key, sentinel).await {
                return false;
            }
        }

        let payload = match serde_json::to_string(&page.items) {
            Ok(payload) => payload,
            Err(e) => {
                self.log_failure(
                    "encode_collection",
                    &tessera_core::CacheError::Serialization { reason: e.to_string() },
                );
                return false;
            }
        };
        match self
            .provider()
            .set_value(&key, std::slice::from_ref(&key), &payload, sentinel, self.config().collection_ttl)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                self.log_failure("save_collection", &e);
                false
            }
        }
    }

    /// Key of the cached copy of one cursor page of `T`.
    pub fn page_key<T: CacheableItem>(&self, request: &PageRequest) -> CacheKey {
        self.namespace()
            .page_key(T::OBJECT_TYPE, request.limit, request.starting_after)
    }

    /// Read a cached cursor page. The collection's is-modified key makes the
    /// lookup dirty the same way it does for the full collection.
    pub async fn get_page_from_cache<T: CacheableItem>(
        &self,
        request: &PageRequest,
        lock_on_miss: bool,
    ) -> CacheLookup<Page<T>> {
        let key = self.page_key::<T>(request);
        let marker = T::is_modified_collection_key(self.namespace());
        self.get_item_from_cache_with_modified_key(&key, &marker, lock_on_miss)
            .await
    }

    /// List a claimed page key among the cursor pages of `T`, which every
    /// write of `T` drops. Must happen before the primary store is read: a
    /// write that lands after this point voids the claim. Returns whether the
    /// page may be saved.
    pub async fn track_page<T: CacheableItem>(&self, request: &PageRequest, sentinel: &Sentinel) -> bool {
        if sentinel.token().is_none() {
            return false;
        }
        let pages = T::global_collection_pages_key(self.namespace());
        let key = self.page_key::<T>(request);
        match self
            .provider()
            .add_dependency(&[pages], &[key], self.config().collection_ttl)
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_dependency_tombstoned() => false,
            Err(e) => {
                self.log_failure("track_page", &e);
                false
            }
        }
    }

    /// Write `page` into its key if the key still holds `sentinel`.
    pub async fn save_page_to_cache<T: CacheableItem>(
        &self,
        request: &PageRequest,
        page: &Page<T>,
        sentinel: &Sentinel,
    ) -> bool {
        let key = self.page_key::<T>(request);
        let payload = match serde_json::to_string(page) {
            Ok(payload) => payload,
            Err(e) => {
                self.log_failure(
                    "encode_page",
                    &tessera_core::CacheError::Serialization { reason: e.to_string() },
                );
                return false;
            }
        };
        match self
            .provider()
            .set_value(&key, std::slice::from_ref(&key), &payload, sentinel, self.config().collection_ttl)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                self.log_failure("save_page", &e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::KeyNamespace;
    use crate::cache::memory::InMemoryProvider;
    use crate::cache::sentinel::LockType;
    use std::sync::Arc;
    use tessera_core::{CacheConfig, Column, StoredObject};
    use uuid::Uuid;

    fn manager() -> CacheManager {
        let config = CacheConfig::for_tests();
        CacheManager::new(
            Arc::new(InMemoryProvider::new(&config)),
            KeyNamespace::new(Uuid::from_u128(12)),
            config,
        )
    }

    fn columns(n: usize) -> Vec<Column> {
        let mut all: Vec<Column> = (0..n)
            .map(|i| Column::new("orders", format!("c{i}"), "int"))
            .collect();
        all.sort_by_key(|c| c.id());
        all
    }

    #[test]
    fn test_page_slicing() {
        let all = columns(5);
        let ids: Vec<_> = all.iter().map(|c| c.id()).collect();

        let first = Page::from_sorted(all.clone(), &PageRequest::first(2), |c| c.id());
        assert_eq!(first.items.len(), 2);
        assert!(first.has_next && !first.has_prev);
        assert!(!first.is_complete());

        let last = Page::from_sorted(all.clone(), &PageRequest::after(10, ids[2]), |c| c.id());
        assert_eq!(last.items.len(), 2);
        assert!(last.has_prev && !last.has_next);

        let whole = Page::from_sorted(all, &PageRequest::default(), |c| c.id());
        assert!(whole.is_complete());
        assert!(PageRequest::default().is_collection_eligible());
        assert!(!PageRequest::after(1, ids[0]).is_collection_eligible());
    }

    #[tokio::test]
    async fn test_only_complete_pages_populate() {
        let cache = manager();
        let all = columns(3);

        let miss = cache.get_collection_from_cache::<Column>(true).await;
        assert!(miss.sentinel.token().is_some());

        let partial = Page::from_sorted(all.clone(), &PageRequest::first(2), |c| c.id());
        assert!(!cache.save_items_to_collection(&partial, &miss.sentinel).await);
        assert!(!cache.get_collection_from_cache::<Column>(false).await.is_hit());

        let complete = Page::single(all.clone());
        assert!(cache.save_items_to_collection(&complete, &miss.sentinel).await);
        let hit = cache.get_collection_from_cache::<Column>(false).await;
        assert_eq!(hit.item.map(|items| items.len()), Some(3));

        // Members were written to their own slots.
        assert!(cache.get_item_from_cache::<Column>(all[0].id(), false).await.is_hit());
    }

    #[tokio::test]
    async fn test_member_change_voids_pending_collection_populate() {
        let cache = manager();
        let all = columns(2);

        let miss = cache.get_collection_from_cache::<Column>(true).await;
        cache.take_item_lock(LockType::Create, &all[0]).await;
        assert!(!cache.save_items_to_collection(&Page::single(all), &miss.sentinel).await);
    }

    #[tokio::test]
    async fn test_member_changed_after_listing_is_not_cached() {
        let cache = manager();
        let all = columns(2);

        let miss = cache.get_collection_from_cache::<Column>(true).await;
        // The listing was read; then a writer updates a member and finishes.
        let mut newer = all[1].clone();
        newer.data_type = "bigint".into();
        let keys = cache.item_lock_keys(&newer, LockType::Update);
        let writer = cache.take_lock(LockType::Update, &keys).await;
        assert!(cache.save_item_to_cache(&newer, &writer, false, &[]).await);
        cache.release_item_lock(&keys, &writer).await;

        assert!(!cache.save_items_to_collection(&Page::single(all.clone()), &miss.sentinel).await);
        let cached = cache
            .get_item_from_cache::<Column>(newer.id(), false)
            .await
            .into_item()
            .expect("writer's copy should stay cached");
        assert_eq!(cached.data_type, "bigint");
        assert!(!cache.get_item_from_cache::<Column>(all[0].id(), false).await.is_hit());
    }

    #[tokio::test]
    async fn test_invalidated_collection_is_dirty() {
        let cache = manager();
        cache.invalidate_collection::<Column>(&[]).await;
        let lookup = cache.get_collection_from_cache::<Column>(true).await;
        assert!(lookup.is_dirty());
        assert!(lookup.sentinel.is_no_lock());
    }

    #[tokio::test]
    async fn test_cursor_page_cached_until_collection_changes() {
        let cache = manager();
        let all = columns(4);
        let request = PageRequest::after(2, all[0].id());
        let page = Page::from_sorted(all.clone(), &request, |c| c.id());

        let miss = cache.get_page_from_cache::<Column>(&request, true).await;
        assert!(miss.sentinel.token().is_some());
        assert!(cache.track_page::<Column>(&request, &miss.sentinel).await);
        assert!(cache.save_page_to_cache(&request, &page, &miss.sentinel).await);

        let hit = cache.get_page_from_cache::<Column>(&request, false).await;
        assert_eq!(hit.item.as_ref(), Some(&page));
        // Another cursor is its own slot.
        let other = PageRequest::after(2, all[1].id());
        assert!(!cache.get_page_from_cache::<Column>(&other, false).await.is_hit());

        let created = Column::new("orders", "late", "int");
        let writer = cache.take_item_lock(LockType::Create, &created).await;
        cache.save_item_to_cache(&created, &writer, true, &[]).await;

        let after_write = cache.get_page_from_cache::<Column>(&request, true).await;
        assert!(!after_write.is_hit());
        assert!(after_write.is_dirty());
    }

    #[tokio::test]
    async fn test_write_during_page_read_voids_page_populate() {
        let cache = manager();
        let all = columns(3);
        let request = PageRequest::after(1, all[0].id());

        let miss = cache.get_page_from_cache::<Column>(&request, true).await;
        assert!(cache.track_page::<Column>(&request, &miss.sentinel).await);
        // The page is read, then a member is deleted before it is saved.
        cache.take_item_lock(LockType::Delete, &all[1]).await;
        cache.delete_item_from_cache(&all[1]).await;

        let stale = Page::from_sorted(all, &request, |c| c.id());
        assert!(!cache.save_page_to_cache(&request, &stale, &miss.sentinel).await);
        assert!(!cache.get_page_from_cache::<Column>(&request, false).await.is_hit());
    }

    #[tokio::test]
    async fn test_untracked_claim_is_not_saved() {
        let cache = manager();
        let request = PageRequest::after(1, Uuid::now_v7());
        assert!(!cache.track_page::<Column>(&request, &Sentinel::NoLock).await);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    proptest! {
        #[test]
        fn prop_following_pages_visits_every_item_once(
            raw in prop::collection::btree_set(1u128..u128::MAX, 0..60),
            limit in 1usize..20,
        ) {
            let all: Vec<EntityId> = raw.into_iter().map(Uuid::from_u128).collect();
            let mut seen = Vec::new();
            let mut request = PageRequest::first(limit);
            loop {
                let page = Page::from_sorted(all.clone(), &request, |id| *id);
                prop_assert!(page.items.len() <= limit);
                prop_assert_eq!(page.has_prev, request.starting_after.is_some() && !seen.is_empty());
                let last = page.items.last().copied();
                seen.extend(page.items);
                match (page.has_next, last) {
                    (true, Some(last)) => request = PageRequest::after(limit, last),
                    _ => break,
                }
            }
            prop_assert_eq!(seen, all);
        }
    }
}
