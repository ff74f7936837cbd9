//! LMDB-backed cache provider.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped slot store
//! that several processes on one host can open at once. Every trait call runs
//! in a single write transaction, which LMDB serializes across processes, so
//! check-and-set and lock precedence hold without any extra coordination.
//!
//! Values are `[expires_at_ms: i64 LE][tag][payload]` (see `Slot::encode`).
//! Expiry uses the wall clock so that every process agrees on it; expired
//! slots are dropped lazily when touched.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use tessera_core::{CacheConfig, CacheError};

use super::key::CacheKey;
use super::sentinel::{LockType, Sentinel, SentinelToken};
use super::slot::{lock_action, merge_dependents, LockAction, Slot};
use super::traits::{CacheProvider, SlotRead};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(#[from] heed::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

/// LMDB slot store.
pub struct LmdbProvider {
    env: Env,
    db: Database<Bytes, Bytes>,
    sentinel_ttl: Duration,
    tombstone_ttl: Duration,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl LmdbProvider {
    /// Open (or create) a provider under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        config: &CacheConfig,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path per process and the
        // memory map is never modified outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db,
            sentinel_ttl: config.sentinel_ttl,
            tombstone_ttl: config.tombstone_ttl,
        })
    }

    /// Run `f` inside one write transaction and commit it.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut RwTxn<'_>) -> Result<R, LmdbCacheError>,
    ) -> Result<R, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbCacheError::from)?;
        let out = f(&mut wtxn)?;
        wtxn.commit().map_err(LmdbCacheError::from)?;
        Ok(out)
    }

    /// Live slot at `key`, deleting it if expired or unreadable.
    fn current(&self, txn: &mut RwTxn<'_>, key: &CacheKey, now: i64) -> Result<Option<Slot>, LmdbCacheError> {
        let raw = key.as_str().as_bytes();
        let Some(bytes) = self.db.get(txn, raw)?.map(<[u8]>::to_vec) else {
            return Ok(None);
        };
        match Slot::decode(&bytes) {
            Some((slot, expires_at)) if expires_at > now => Ok(Some(slot)),
            _ => {
                self.db.delete(txn, raw)?;
                Ok(None)
            }
        }
    }

    fn put(&self, txn: &mut RwTxn<'_>, key: &CacheKey, slot: &Slot, expires_at: i64) -> Result<(), LmdbCacheError> {
        self.db.put(txn, key.as_str().as_bytes(), &slot.encode(expires_at))?;
        Ok(())
    }

    /// Expiry of a live slot, used when a counter is bumped in place.
    fn expiry(&self, txn: &mut RwTxn<'_>, key: &CacheKey) -> Result<Option<i64>, LmdbCacheError> {
        Ok(self
            .db
            .get(txn, key.as_str().as_bytes())?
            .and_then(Slot::decode)
            .map(|(_, expires_at)| expires_at))
    }
}

#[async_trait]
impl CacheProvider for LmdbProvider {
    fn name(&self) -> &str {
        "lmdb"
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
        let now = now_ms();
        self.write(|txn| {
            let mut reads = Vec::with_capacity(keys.len());
            for (i, key) in keys.iter().enumerate() {
                let read = match self.current(txn, key, now)? {
                    Some(slot) => SlotRead {
                        value: slot.value(),
                        conflict: slot.sentinel(),
                        sentinel: Sentinel::NoLock,
                    },
                    None if lock_on_miss.get(i).copied().unwrap_or(false) => {
                        let token = Sentinel::Token(SentinelToken::mint(LockType::Read));
                        self.put(txn, key, &Slot::Sentinel(token), deadline(now, self.sentinel_ttl))?;
                        SlotRead {
                            value: None,
                            conflict: Sentinel::NoLock,
                            sentinel: token,
                        }
                    }
                    None => SlotRead::default(),
                };
                reads.push(read);
            }
            Ok(reads)
        })
    }

    async fn set_value(
        &self,
        lock_key: &CacheKey,
        keys_to_set: &[CacheKey],
        value: &str,
        sentinel: &Sentinel,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        if sentinel.token().is_none() {
            return Ok(false);
        }
        let now = now_ms();
        self.write(|txn| {
            let holds = self
                .current(txn, lock_key, now)?
                .is_some_and(|slot| slot.holds(sentinel));
            if !holds {
                return Ok(false);
            }
            let data = Slot::Data(value.to_string());
            for key in keys_to_set {
                self.put(txn, key, &data, deadline(now, ttl))?;
            }
            Ok(true)
        })
    }

    async fn delete_value(
        &self,
        keys: &[CacheKey],
        set_tombstone: bool,
        force: bool,
    ) -> Result<(), CacheError> {
        let now = now_ms();
        self.write(|txn| {
            for key in keys {
                let locked = self.current(txn, key, now)?.is_some_and(|slot| slot.is_token());
                if locked && !force {
                    continue;
                }
                if set_tombstone {
                    self.put(
                        txn,
                        key,
                        &Slot::Sentinel(Sentinel::Tombstone),
                        deadline(now, self.tombstone_ttl),
                    )?;
                } else {
                    self.db.delete(txn, key.as_str().as_bytes())?;
                }
            }
            Ok(())
        })
    }

    async fn write_sentinel(
        &self,
        lock_type: LockType,
        keys: &[CacheKey],
    ) -> Result<Sentinel, CacheError> {
        let now = now_ms();
        let token = Sentinel::Token(SentinelToken::mint(lock_type));
        let sentinel_slot = Slot::Sentinel(token);
        let covered: &[CacheKey] = if lock_type == LockType::Read {
            keys.get(..1).unwrap_or(&[])
        } else {
            keys
        };
        if covered.is_empty() && lock_type == LockType::Read {
            return Ok(Sentinel::NoLock);
        }

        self.write(|txn| {
            for key in covered {
                let slot = self.current(txn, key, now)?;
                match lock_action(lock_type, slot.as_ref()) {
                    LockAction::Write => {
                        self.put(txn, key, &sentinel_slot, deadline(now, self.sentinel_ttl))?
                    }
                    LockAction::RefreshTombstone => self.put(
                        txn,
                        key,
                        &Slot::Sentinel(Sentinel::Tombstone),
                        deadline(now, self.tombstone_ttl),
                    )?,
                    LockAction::Skip if lock_type == LockType::Read => return Ok(Sentinel::NoLock),
                    LockAction::Skip => {}
                }
            }
            Ok(token)
        })
    }

    async fn release_sentinel(
        &self,
        keys: &[CacheKey],
        sentinel: &Sentinel,
    ) -> Result<(), CacheError> {
        if sentinel.token().is_none() {
            return Ok(());
        }
        let now = now_ms();
        self.write(|txn| {
            for key in keys {
                if self.current(txn, key, now)?.is_some_and(|slot| slot.holds(sentinel)) {
                    self.db.delete(txn, key.as_str().as_bytes())?;
                }
            }
            Ok(())
        })
    }

    async fn add_dependency(
        &self,
        dependency_keys: &[CacheKey],
        dependents: &[CacheKey],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = now_ms();
        let tombstoned = self.write(|txn| {
            for key in dependency_keys {
                if self.current(txn, key, now)?.is_some_and(|slot| slot.is_tombstone()) {
                    return Ok(Some(key.to_string()));
                }
            }
            for key in dependency_keys {
                let (existing, expires_at) = match self.current(txn, key, now)? {
                    Some(Slot::Dependents(listed)) => {
                        let kept = self.expiry(txn, key)?.unwrap_or(now);
                        (listed, kept.max(deadline(now, ttl)))
                    }
                    _ => (Vec::new(), deadline(now, ttl)),
                };
                let mut live = Vec::with_capacity(existing.len());
                for listed in existing {
                    if self.current(txn, &listed, now)?.is_some() {
                        live.push(listed);
                    }
                }
                self.put(txn, key, &Slot::Dependents(merge_dependents(live, dependents)), expires_at)?;
            }
            Ok(None)
        })?;
        match tombstoned {
            Some(key) => Err(CacheError::DependencyTombstoned { key }),
            None => Ok(()),
        }
    }

    async fn clear_dependencies(
        &self,
        key: &CacheKey,
        set_tombstone: bool,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let now = now_ms();
        self.write(|txn| {
            let listed = match self.current(txn, key, now)? {
                Some(Slot::Dependents(listed)) => listed,
                _ => Vec::new(),
            };
            let mut removed = Vec::with_capacity(listed.len());
            for dependent in listed {
                match self.current(txn, &dependent, now)? {
                    Some(slot) if slot.is_write_token() => {}
                    Some(_) => {
                        self.db.delete(txn, dependent.as_str().as_bytes())?;
                        removed.push(dependent);
                    }
                    None => {}
                }
            }

            if set_tombstone {
                self.put(
                    txn,
                    key,
                    &Slot::Sentinel(Sentinel::Tombstone),
                    deadline(now, self.tombstone_ttl),
                )?;
            } else if !self.current(txn, key, now)?.is_some_and(|slot| slot.is_tombstone()) {
                self.db.delete(txn, key.as_str().as_bytes())?;
            }
            Ok(removed)
        })
    }

    async fn flush(&self, prefix: &str) -> Result<u64, CacheError> {
        let prefix = prefix.as_bytes();
        self.write(|txn| {
            let doomed: Vec<Vec<u8>> = self
                .db
                .iter(txn)?
                .filter_map(Result::ok)
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.to_vec())
                .collect();
            let mut removed = 0u64;
            for key in &doomed {
                if self.db.delete(txn, key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    async fn reserve_rate_limit_slot(
        &self,
        keys: &[CacheKey],
        limit: i64,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let Some(bucket) = keys.last() else {
            return Err(CacheError::InvalidKey {
                key: String::new(),
                reason: "rate limit reservation needs at least one bucket".to_string(),
            });
        };
        let now = now_ms();
        self.write(|txn| {
            let mut total = 0i64;
            for key in keys {
                total += self.current(txn, key, now)?.map_or(0, |slot| slot.counter_value());
            }
            if total >= limit {
                return Ok(false);
            }
            let current = self.current(txn, bucket, now)?;
            let (count, expires_at) = match current {
                Some(slot) => (
                    slot.counter_value() + 1,
                    self.expiry(txn, bucket)?.unwrap_or_else(|| deadline(now, ttl)),
                ),
                None => (1, deadline(now, ttl)),
            };
            self.put(txn, bucket, &Slot::Counter(count), expires_at)?;
            Ok(true)
        })
    }

    async fn release_rate_limit_slot(&self, keys: &[CacheKey]) -> Result<bool, CacheError> {
        let now = now_ms();
        self.write(|txn| {
            for key in keys {
                let count = self.current(txn, key, now)?.map_or(0, |slot| slot.counter_value());
                if count > 0 {
                    let expires_at = self.expiry(txn, key)?.unwrap_or(now);
                    self.put(txn, key, &Slot::Counter(count - 1), expires_at)?;
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::KeyNamespace;
    use tempfile::TempDir;
    use tessera_core::ObjectType;
    use uuid::Uuid;

    const TTL: Duration = Duration::from_secs(60);

    fn create_test_provider() -> (LmdbProvider, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let provider = LmdbProvider::open(temp_dir.path(), 10, &CacheConfig::for_tests())
            .expect("provider creation should succeed");
        (provider, temp_dir)
    }

    fn key() -> CacheKey {
        KeyNamespace::new(Uuid::from_u128(9)).object_key(ObjectType::Column, Uuid::now_v7())
    }

    #[tokio::test]
    async fn test_populate_under_read_lock() {
        let (provider, _dir) = create_test_provider();
        let key = key();

        let read = provider.get_value(&key, true).await.expect("get should succeed");
        assert!(!read.is_hit());
        assert!(read.sentinel.token().is_some());

        let written = provider
            .set_value(&key, &[key.clone()], "{\"id\":1}", &read.sentinel, TTL)
            .await
            .expect("set should succeed");
        assert!(written);

        let hit = provider.get_value(&key, true).await.expect("get should succeed");
        assert_eq!(hit.value.as_deref(), Some("{\"id\":1}"));
        assert!(hit.sentinel.is_no_lock());
    }

    #[tokio::test]
    async fn test_delete_lock_defeats_pending_populate() {
        let (provider, _dir) = create_test_provider();
        let key = key();

        let read = provider.get_value(&key, true).await.expect("get should succeed");
        provider
            .write_sentinel(LockType::Delete, &[key.clone()])
            .await
            .expect("lock should succeed");
        let written = provider
            .set_value(&key, &[key.clone()], "stale", &read.sentinel, TTL)
            .await
            .expect("set should succeed");
        assert!(!written);
    }

    #[tokio::test]
    async fn test_update_lock_keeps_tombstone() {
        let (provider, _dir) = create_test_provider();
        let key = key();

        provider
            .delete_value(&[key.clone()], true, true)
            .await
            .expect("delete should succeed");
        let update = provider
            .write_sentinel(LockType::Update, &[key.clone()])
            .await
            .expect("lock should succeed");
        assert!(update.token().is_some());

        let read = provider.get_value(&key, false).await.expect("get should succeed");
        assert!(read.conflict.is_tombstone());
    }

    #[tokio::test]
    async fn test_read_lock_on_occupied_slot() {
        let (provider, _dir) = create_test_provider();
        let key = key();
        provider
            .write_sentinel(LockType::Create, &[key.clone()])
            .await
            .expect("lock should succeed");
        let read = provider
            .write_sentinel(LockType::Read, &[key.clone()])
            .await
            .expect("lock should succeed");
        assert!(read.is_no_lock());
    }

    #[tokio::test]
    async fn test_release_sentinel() {
        let (provider, _dir) = create_test_provider();
        let key = key();
        let sentinel = provider
            .write_sentinel(LockType::Update, &[key.clone()])
            .await
            .expect("lock should succeed");
        provider
            .release_sentinel(&[key.clone()], &sentinel)
            .await
            .expect("release should succeed");
        let read = provider.get_value(&key, false).await.expect("get should succeed");
        assert_eq!(read, SlotRead::default());
    }

    #[tokio::test]
    async fn test_tenant_flush() {
        let (provider, _dir) = create_test_provider();
        let tenant1 = KeyNamespace::new(Uuid::from_u128(1));
        let tenant2 = KeyNamespace::new(Uuid::from_u128(2));

        for _ in 0..5 {
            let key = tenant1.object_key(ObjectType::Accessor, Uuid::now_v7());
            provider.delete_value(&[key], true, true).await.expect("tombstone should succeed");
        }
        let survivor = tenant2.object_key(ObjectType::Accessor, Uuid::now_v7());
        provider
            .delete_value(&[survivor.clone()], true, true)
            .await
            .expect("tombstone should succeed");

        let removed = provider
            .flush(tenant1.tenant_prefix())
            .await
            .expect("flush should succeed");
        assert_eq!(removed, 5);

        let read = provider.get_value(&survivor, false).await.expect("get should succeed");
        assert!(read.conflict.is_tombstone(), "Tenant2's slots should not be affected");
    }

    #[tokio::test]
    async fn test_rate_limit_counters() {
        let (provider, _dir) = create_test_provider();
        let ns = KeyNamespace::new(Uuid::from_u128(3));
        let entity = Uuid::now_v7();
        let keys: Vec<_> = (0..2).map(|b| ns.rate_limit_key(entity, "user", b)).collect();

        assert!(provider.reserve_rate_limit_slot(&keys, 1, TTL).await.expect("reserve"));
        assert!(!provider.reserve_rate_limit_slot(&keys, 1, TTL).await.expect("reserve"));
        assert!(provider.release_rate_limit_slot(&keys).await.expect("release"));
        assert!(provider.reserve_rate_limit_slot(&keys, 1, TTL).await.expect("reserve"));
        assert!(!provider.release_rate_limit_slot(&keys[..1]).await.expect("release"));
    }

    #[tokio::test]
    async fn test_dependency_list_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let deps = KeyNamespace::new(Uuid::from_u128(9)).dependencies_key(ObjectType::Column, Uuid::now_v7());
        let cached = key();
        let writing = key();

        {
            let provider = LmdbProvider::open(temp_dir.path(), 10, &CacheConfig::for_tests())
                .expect("provider creation should succeed");
            let read = provider.get_value(&cached, true).await.expect("get");
            provider
                .add_dependency(&[deps.clone()], &[cached.clone(), writing.clone()], TTL)
                .await
                .expect("add");
            assert!(provider
                .set_value(&cached, &[cached.clone()], "v", &read.sentinel, TTL)
                .await
                .expect("set"));
            provider.write_sentinel(LockType::Delete, &[writing.clone()]).await.expect("lock");
        }

        let provider = LmdbProvider::open(temp_dir.path(), 10, &CacheConfig::for_tests())
            .expect("provider reopen should succeed");
        let removed = provider.clear_dependencies(&deps, true).await.expect("clear");
        assert_eq!(removed, vec![cached.clone()]);
        assert!(!provider.get_value(&cached, false).await.expect("get").is_hit());
        assert!(provider.get_value(&writing, false).await.expect("get").conflict.token().is_some());

        let result = provider.add_dependency(&[deps], &[cached], TTL).await;
        assert!(matches!(result, Err(e) if e.is_dependency_tombstoned()));
    }
}
