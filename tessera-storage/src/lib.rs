//! Tessera Storage - Cache Consistency and Convergence
//!
//! Schema objects live in a primary store with an asynchronously replicated
//! read replica. This crate puts a shared look-aside cache beside that store
//! and keeps the two consistent without transactions:
//!
//! - [`cache`]: key namespaces, the sentinel protocol, providers and the
//!   look-aside and collection caches.
//! - [`store`]: the primary-store contract and an in-memory implementation.
//! - [`cached_store`]: the read and write paths every caller goes through.
//! - [`rate_limit`]: sliding-window execution limits over cache counters.
//! - [`retry`] and [`column_manager`]: the optimistic convergence loop that
//!   keeps the default accessor and mutator in step with the column set.
//!
//! [`TenantStorage`] wires these together for one tenant.

pub mod cache;
pub mod cached_store;
pub mod column_manager;
pub mod rate_limit;
pub mod retry;
pub mod store;

pub use cache::{
    CacheKey, CacheManager, CacheProvider, CacheStats, CacheableItem, InMemoryProvider,
    InvalidationBus, KeyNamespace, LayeredProvider, LmdbCacheError, LmdbProvider, LockType, Page,
    PageRequest, Sentinel,
};
pub use cached_store::CachedObjectStore;
pub use column_manager::ColumnManager;
pub use rate_limit::{RateLimitItem, RateLimitSubject, RateLimiter};
pub use retry::{retry_until_converged, RetryPolicy};
pub use store::{InMemoryObjectStore, ObjectStore, ReadMode};

use std::sync::Arc;

use tessera_core::{AccessPolicy, Accessor, Column, Mutator, StoreConfig, TenantId, TesseraResult};

/// Primary stores for every schema object type of one tenant.
#[derive(Clone)]
pub struct PrimaryStores {
    pub columns: Arc<dyn ObjectStore<Column>>,
    pub accessors: Arc<dyn ObjectStore<Accessor>>,
    pub mutators: Arc<dyn ObjectStore<Mutator>>,
    pub access_policies: Arc<dyn ObjectStore<AccessPolicy>>,
}

impl PrimaryStores {
    /// Fresh in-memory stores, each with its own replica.
    pub fn in_memory() -> Self {
        Self {
            columns: Arc::new(InMemoryObjectStore::<Column>::new()),
            accessors: Arc::new(InMemoryObjectStore::<Accessor>::new()),
            mutators: Arc::new(InMemoryObjectStore::<Mutator>::new()),
            access_policies: Arc::new(InMemoryObjectStore::<AccessPolicy>::new()),
        }
    }
}

/// Everything one process needs to serve one tenant.
///
/// The cache provider is passed in rather than looked up, so two
/// `TenantStorage` values built over the same provider and stores behave like
/// two processes of the same deployment.
pub struct TenantStorage {
    tenant_id: TenantId,
    cache: Option<Arc<CacheManager>>,
    columns: CachedObjectStore<Column>,
    accessors: CachedObjectStore<Accessor>,
    mutators: CachedObjectStore<Mutator>,
    access_policies: CachedObjectStore<AccessPolicy>,
    column_manager: ColumnManager,
    rate_limiter: Option<RateLimiter>,
}

impl TenantStorage {
    /// Validate `config`, build the facades and load the column maps.
    ///
    /// Without a provider every read goes to the primary store and rate
    /// limits admit everything.
    pub async fn new(
        config: StoreConfig,
        provider: Option<Arc<dyn CacheProvider>>,
        stores: PrimaryStores,
    ) -> TesseraResult<Self> {
        config.validate()?;

        let cache = provider.map(|provider| {
            Arc::new(CacheManager::new(
                provider,
                KeyNamespace::new(config.tenant_id),
                config.cache.clone(),
            ))
        });

        let columns = CachedObjectStore::new(stores.columns, cache.clone());
        let accessors = CachedObjectStore::new(stores.accessors, cache.clone());
        let mutators = CachedObjectStore::new(stores.mutators, cache.clone());
        let access_policies = CachedObjectStore::new(stores.access_policies, cache.clone());

        let column_manager = ColumnManager::new(
            columns.clone(),
            accessors.clone(),
            mutators.clone(),
            RetryPolicy::from(&config.convergence),
        )
        .await?;
        let rate_limiter = cache
            .as_ref()
            .map(|cache| RateLimiter::new(Arc::clone(cache), config.rate_limit))
            .transpose()?;

        tracing::debug!(
            tenant_id = %config.tenant_id,
            provider = cache.as_ref().map(|c| c.provider().name()).unwrap_or("none"),
            "tenant storage ready"
        );

        Ok(Self {
            tenant_id: config.tenant_id,
            cache,
            columns,
            accessors,
            mutators,
            access_policies,
            column_manager,
            rate_limiter,
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    pub fn columns(&self) -> &CachedObjectStore<Column> {
        &self.columns
    }

    pub fn accessors(&self) -> &CachedObjectStore<Accessor> {
        &self.accessors
    }

    pub fn mutators(&self) -> &CachedObjectStore<Mutator> {
        &self.mutators
    }

    pub fn access_policies(&self) -> &CachedObjectStore<AccessPolicy> {
        &self.access_policies
    }

    pub fn column_manager(&self) -> &ColumnManager {
        &self.column_manager
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// Drop every cached slot of this tenant.
    pub async fn flush_cache(&self) -> u64 {
        match &self.cache {
            Some(cache) => cache.flush().await,
            None => 0,
        }
    }
}
