//! Layered provider: a process-local tier in front of a shared tier.
//!
//! The shared tier is the only arbitration point: sentinels, tombstones and
//! counters live there exclusively. The local tier only ever holds data copied
//! out of the shared tier, filled under a local read sentinel so that an
//! invalidation racing the fill wins.
//!
//! Changes to the shared tier are published on an [`InvalidationBus`]; the
//! writer then waits `invalidation_delay` so that other processes have dropped
//! their local copies before the writer's caller proceeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::{CacheConfig, CacheError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::invalidation::{InvalidationBus, InvalidationScope};
use super::key::CacheKey;
use super::memory::InMemoryProvider;
use super::sentinel::{LockType, Sentinel};
use super::traits::{CacheProvider, SlotRead};

pub struct LayeredProvider {
    origin: Uuid,
    name: String,
    local: Arc<InMemoryProvider>,
    shared: Arc<dyn CacheProvider>,
    bus: InvalidationBus,
    local_ttl: Duration,
    invalidation_delay: Duration,
    listener: JoinHandle<()>,
}

impl LayeredProvider {
    /// Build a layered provider and start its invalidation listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(shared: Arc<dyn CacheProvider>, bus: InvalidationBus, config: &CacheConfig) -> Self {
        let origin = Uuid::now_v7();
        let local = Arc::new(InMemoryProvider::new(config).with_name(format!("local-{}", origin)));
        let listener = tokio::spawn(listen(origin, Arc::clone(&local), bus.subscribe()));
        Self {
            origin,
            name: format!("layered({})", shared.name()),
            local,
            shared,
            bus,
            local_ttl: config.local_ttl,
            invalidation_delay: config.invalidation_delay,
            listener,
        }
    }

    /// Identity of this provider on the bus.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// The process-local tier.
    pub fn local(&self) -> &InMemoryProvider {
        &self.local
    }

    /// Drop keys locally, tell everyone else, and wait out the propagation delay.
    async fn invalidate(&self, scope: InvalidationScope, wait: bool) -> Result<(), CacheError> {
        apply(&self.local, &scope).await?;
        self.bus.publish(self.origin, scope);
        if wait && !self.invalidation_delay.is_zero() {
            tokio::time::sleep(self.invalidation_delay).await;
        }
        Ok(())
    }
}

impl Drop for LayeredProvider {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn apply(local: &InMemoryProvider, scope: &InvalidationScope) -> Result<(), CacheError> {
    match scope {
        InvalidationScope::Keys(keys) => local.delete_value(keys, false, true).await,
        InvalidationScope::Prefix(prefix) => local.flush(prefix).await.map(|_| ()),
    }
}

async fn listen(
    origin: Uuid,
    local: Arc<InMemoryProvider>,
    mut rx: tokio::sync::broadcast::Receiver<super::invalidation::Invalidation>,
) {
    loop {
        match rx.recv().await {
            Ok(message) if message.origin == origin => continue,
            Ok(message) => {
                if let Err(e) = apply(&local, &message.scope).await {
                    tracing::error!(error = %e, sequence = message.sequence, "failed to apply cache invalidation");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "invalidation listener lagged, dropping local tier");
                if let Err(e) = local.flush("").await {
                    tracing::error!(error = %e, "failed to drop local tier");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[async_trait]
impl CacheProvider for LayeredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_layered(&self) -> bool {
        true
    }

    async fn get_value(&self, key: &CacheKey, lock_on_miss: bool) -> Result<SlotRead, CacheError> {
        let mut reads = self
            .get_values(std::slice::from_ref(key), &[lock_on_miss])
            .await?;
        Ok(reads.pop().unwrap_or_default())
    }

    async fn get_values(
        &self,
        keys: &[CacheKey],
        lock_on_miss: &[bool],
    ) -> Result<Vec<SlotRead>, CacheError> {
        let all_lock = vec![true; keys.len()];
        let local_reads = match self.local.get_values(keys, &all_lock).await {
            Ok(reads) => reads,
            Err(e) => {
                tracing::warn!(error = %e, "local tier read failed");
                vec![SlotRead::default(); keys.len()]
            }
        };

        let mut missing = Vec::new();
        let mut missing_keys = Vec::new();
        let mut missing_locks = Vec::new();
        for (i, read) in local_reads.iter().enumerate() {
            if !read.is_hit() {
                missing.push(i);
                missing_keys.push(keys[i].clone());
                missing_locks.push(lock_on_miss.get(i).copied().unwrap_or(false));
            }
        }

        let mut results: Vec<SlotRead> = local_reads
            .iter()
            .map(|read| SlotRead {
                value: read.value.clone(),
                ..SlotRead::default()
            })
            .collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let shared_reads = match self.shared.get_values(&missing_keys, &missing_locks).await {
            Ok(reads) => reads,
            Err(e) => {
                for (&i, key) in missing.iter().zip(&missing_keys) {
                    let claim = &local_reads[i].sentinel;
                    if let Err(release_err) = self.local.release_sentinel(std::slice::from_ref(key), claim).await {
                        tracing::warn!(error = %release_err, key = %key, "failed to release local claim");
                    }
                }
                return Err(e);
            }
        };
        for ((i, key), shared) in missing.into_iter().zip(missing_keys).zip(shared_reads) {
            let local_sentinel = local_reads[i].sentinel;
            match &shared.value {
                Some(value) => {
                    self.local
                        .set_value(&key, std::slice::from_ref(&key), value, &local_sentinel, self.local_ttl)
                        .await?;
                }
                None => self.local.release_sentinel(std::slice::from_ref(&key), &local_sentinel).await?,
            }
            results[i] = shared;
        }
        Ok(results)
    }

    async fn set_value(
        &self,
        lock_key: &CacheKey,
        keys_to_set: &[CacheKey],
        value: &str,
        sentinel: &Sentinel,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let written = self
            .shared
            .set_value(lock_key, keys_to_set, value, sentinel, ttl)
            .await?;
        if written {
            self.bus
                .publish(self.origin, InvalidationScope::Keys(keys_to_set.to_vec()));
            let local_ttl = self.local_ttl.min(ttl);
            for key in keys_to_set {
                self.local.put_local(key, value, local_ttl)?;
            }
        }
        Ok(written)
    }

    async fn delete_value(
        &self,
        keys: &[CacheKey],
        set_tombstone: bool,
        force: bool,
    ) -> Result<(), CacheError> {
        self.shared.delete_value(keys, set_tombstone, force).await?;
        self.invalidate(InvalidationScope::Keys(keys.to_vec()), true).await
    }

    async fn write_sentinel(
        &self,
        lock_type: LockType,
        keys: &[CacheKey],
    ) -> Result<Sentinel, CacheError> {
        let sentinel = self.shared.write_sentinel(lock_type, keys).await?;
        if lock_type.is_write() {
            self.invalidate(InvalidationScope::Keys(keys.to_vec()), true).await?;
        }
        Ok(sentinel)
    }

    async fn release_sentinel(
        &self,
        keys: &[CacheKey],
        sentinel: &Sentinel,
    ) -> Result<(), CacheError> {
        self.shared.release_sentinel(keys, sentinel).await
    }

    async fn add_dependency(
        &self,
        dependency_keys: &[CacheKey],
        dependents: &[CacheKey],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.shared.add_dependency(dependency_keys, dependents, ttl).await
    }

    async fn clear_dependencies(
        &self,
        key: &CacheKey,
        set_tombstone: bool,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let removed = self.shared.clear_dependencies(key, set_tombstone).await?;
        let mut dropped = removed.clone();
        dropped.push(key.clone());
        self.invalidate(InvalidationScope::Keys(dropped), true).await?;
        Ok(removed)
    }

    async fn flush(&self, prefix: &str) -> Result<u64, CacheError> {
        let removed = self.shared.flush(prefix).await?;
        self.invalidate(InvalidationScope::Prefix(prefix.to_string()), true).await?;
        Ok(removed)
    }

    async fn reserve_rate_limit_slot(
        &self,
        keys: &[CacheKey],
        limit: i64,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.shared.reserve_rate_limit_slot(keys, limit, ttl).await
    }

    async fn release_rate_limit_slot(&self, keys: &[CacheKey]) -> Result<bool, CacheError> {
        self.shared.release_rate_limit_slot(keys).await
    }
}
