//! Look-aside cache with sentinel fencing and multi-tenant key isolation.
//!
//! The cache sits beside the primary store, not in front of it: callers read
//! the cache, fall back to the store themselves, and populate the cache only
//! while holding the sentinel they were handed on the miss. Writers and
//! deleters fence every derived key before touching the store, so a reader
//! that raced them cannot write stale data back.
//!
//! Objects built from other objects (an accessor over its columns) list
//! their keys in those objects' dependency lists before populating. Changing
//! a column clears its list; deleting it tombstones the list, which keeps
//! anything derived from it out of the cache until the tombstone expires.
//!
//! # Tenant Isolation
//!
//! [`CacheKey`] values can only be built through a [`KeyNamespace`], which is
//! constructed from a tenant id. Every key carries the tenant prefix, and a
//! tenant can be flushed by that prefix alone.
//!
//! # Providers
//!
//! - [`InMemoryProvider`]: one process, or one instance shared by handles.
//! - [`LmdbProvider`]: memory-mapped store shared by processes on a host.
//! - [`LayeredProvider`]: process-local tier in front of any shared provider,
//!   kept coherent through an [`InvalidationBus`].
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheManager::new(provider, KeyNamespace::new(tenant_id), config);
//!
//! let lookup = cache.get_item_from_cache::<Column>(id, true).await;
//! let column = match lookup.item {
//!     Some(column) => column,
//!     None => {
//!         let column = store.get_latest(id, lookup.read_mode()).await?;
//!         cache.save_item_to_cache(&column, &lookup.sentinel, false, &[]).await;
//!         column
//!     }
//! };
//! ```

pub mod collection;
pub mod invalidation;
pub mod key;
pub mod layered;
pub mod lmdb_backend;
pub mod look_aside;
pub mod lookup;
pub mod memory;
pub mod sentinel;
pub(crate) mod slot;
pub mod traits;

pub use collection::{Page, PageRequest, MAX_PAGE_SIZE};
pub use invalidation::{Invalidation, InvalidationBus, InvalidationScope};
pub use key::{CacheKey, KeyNamespace};
pub use layered::LayeredProvider;
pub use lmdb_backend::{LmdbCacheError, LmdbProvider};
pub use look_aside::CacheManager;
pub use lookup::{BatchLookup, CacheLookup};
pub use memory::InMemoryProvider;
pub use sentinel::{
    generate_tombstone_sentinel, is_tombstone_sentinel, LockType, Sentinel, SentinelToken,
};
pub use traits::{CacheProvider, CacheStats, CacheableItem, SlotRead};
