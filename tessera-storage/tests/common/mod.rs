//! Shared harness: several "processes" of one deployment, each with its own
//! `TenantStorage`, over one shared cache and one replicated primary store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tessera_core::{AccessPolicy, Accessor, Column, Mutator, StoreConfig};
use tessera_storage::{
    CacheProvider, InMemoryObjectStore, InMemoryProvider, InvalidationBus, LayeredProvider,
    PrimaryStores, TenantStorage,
};
use tessera_test_utils::{fixtures, init_tracing};

pub struct Deployment {
    pub config: StoreConfig,
    pub shared: Arc<InMemoryProvider>,
    pub bus: InvalidationBus,
    pub columns: Arc<InMemoryObjectStore<Column>>,
    pub accessors: Arc<InMemoryObjectStore<Accessor>>,
    pub mutators: Arc<InMemoryObjectStore<Mutator>>,
    pub access_policies: Arc<InMemoryObjectStore<AccessPolicy>>,
}

impl Deployment {
    pub fn new() -> Self {
        init_tracing();
        let config = fixtures::test_store_config();
        Self {
            shared: Arc::new(InMemoryProvider::new(&config.cache).with_name("shared")),
            bus: InvalidationBus::default(),
            columns: Arc::new(InMemoryObjectStore::new()),
            accessors: Arc::new(InMemoryObjectStore::new()),
            mutators: Arc::new(InMemoryObjectStore::new()),
            access_policies: Arc::new(InMemoryObjectStore::new()),
            config,
        }
    }

    pub fn stores(&self) -> PrimaryStores {
        PrimaryStores {
            columns: self.columns.clone(),
            accessors: self.accessors.clone(),
            mutators: self.mutators.clone(),
            access_policies: self.access_policies.clone(),
        }
    }

    /// A process talking to the shared cache directly.
    pub async fn process(&self) -> TenantStorage {
        let provider: Arc<dyn CacheProvider> = self.shared.clone();
        TenantStorage::new(self.config.clone(), Some(provider), self.stores())
            .await
            .expect("process should start")
    }

    /// A process with its own local tier in front of the shared cache.
    pub async fn layered_process(&self) -> TenantStorage {
        let provider: Arc<dyn CacheProvider> = Arc::new(LayeredProvider::new(
            self.shared.clone(),
            self.bus.clone(),
            &self.config.cache,
        ));
        TenantStorage::new(self.config.clone(), Some(provider), self.stores())
            .await
            .expect("process should start")
    }

    /// Stop replicating writes, so replica reads return pre-write rows.
    pub fn pause_replication(&self) {
        for result in [
            self.columns.set_replica_paused(true),
            self.accessors.set_replica_paused(true),
            self.mutators.set_replica_paused(true),
            self.access_policies.set_replica_paused(true),
        ] {
            result.expect("pausing replication should not fail");
        }
    }

    /// Let write tombstones expire. Needs a paused clock.
    pub async fn settle(&self) {
        tokio::time::advance(self.config.cache.tombstone_ttl + Duration::from_secs(1)).await;
    }
}
