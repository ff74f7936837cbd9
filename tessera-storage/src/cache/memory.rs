//! In-process cache provider.
//!
//! All slots live in one map behind one mutex, so every trait call is atomic.
//! Shared through an `Arc`, a single instance behaves like a distributed tier
//! seen by several storage handles; it is also the local tier of
//! [`LayeredProvider`](super::layered::LayeredProvider).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::{CacheConfig, CacheError};
use tokio::time::Instant;

use super::key::CacheKey;
use super::sentinel::{LockType, Sentinel, SentinelToken};
use super::slot::{lock_action, merge_dependents, LockAction, Slot};
use super::traits::{CacheProvider, SlotRead};

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

type Entries = HashMap<CacheKey, Entry>;

/// Mutex-guarded map provider with lazy expiry.
#[derive(Debug)]
pub struct InMemoryProvider {
    name: String,
    entries: Mutex<Entries>,
    sentinel_ttl: Duration,
    tombstone_ttl: Duration,
}

impl InMemoryProvider {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            name: "in-memory".to_string(),
            entries: Mutex::new(HashMap::new()),
            sentinel_ttl: config.sentinel_ttl,
            tombstone_ttl: config.tombstone_ttl,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of live slots, including sentinels.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<MutexGuard<'_, Entries>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::Backend {
            reason: format!("{} cache lock poisoned", self.name),
        })
    }

    /// Write data unconditionally. Used only by a layered provider filling
    /// its private local tier, never for shared slots.
    pub(crate) fn put_local(&self, key: &CacheKey, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries()?;
        entries.insert(
            key.clone(),
            Entry {
                slot: Slot::Data(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// Live slot at `key`, dropping it if expired.
fn current(entries: &mut Entries, key: &CacheKey, now: Instant) -> Option<Slot> {
    match entries.get(key) {
        Some(entry) if entry.expires_at > now => Some(entry.slot.clone()),
        Some(_) => {
            entries.remove(key);
            None
        }
        None => None,
    }
}

fn put(entries: &mut Entries, key: &CacheKey, slot: Slot, expires_at: Instant) {
    entries.insert(key.clone(), Entry { slot, expires_at });
}

#[async_trait]
impl CacheProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.name
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
        let now = Instant::now();
        let mut entries = self.entries()?;
        let mut reads = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let read = match current(&mut entries, key, now) {
                Some(slot) => SlotRead {
                    value: slot.value(),
                    conflict: slot.sentinel(),
                    sentinel: Sentinel::NoLock,
                },
                None if lock_on_miss.get(i).copied().unwrap_or(false) => {
                    let token = Sentinel::Token(SentinelToken::mint(LockType::Read));
                    put(&mut entries, key, Slot::Sentinel(token), now + self.sentinel_ttl);
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
        let now = Instant::now();
        let mut entries = self.entries()?;
        let holds = current(&mut entries, lock_key, now).is_some_and(|slot| slot.holds(sentinel));
        if !holds {
            return Ok(false);
        }
        for key in keys_to_set {
            put(&mut entries, key, Slot::Data(value.to_string()), now + ttl);
        }
        Ok(true)
    }

    async fn delete_value(
        &self,
        keys: &[CacheKey],
        set_tombstone: bool,
        force: bool,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        for key in keys {
            let locked = current(&mut entries, key, now).is_some_and(|slot| slot.is_token());
            if locked && !force {
                continue;
            }
            if set_tombstone {
                put(
                    &mut entries,
                    key,
                    Slot::Sentinel(Sentinel::Tombstone),
                    now + self.tombstone_ttl,
                );
            } else {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn write_sentinel(
        &self,
        lock_type: LockType,
        keys: &[CacheKey],
    ) -> Result<Sentinel, CacheError> {
        let now = Instant::now();
        let token = Sentinel::Token(SentinelToken::mint(lock_type));
        let mut entries = self.entries()?;

        if lock_type == LockType::Read {
            let Some(key) = keys.first() else {
                return Ok(Sentinel::NoLock);
            };
            let slot = current(&mut entries, key, now);
            if lock_action(lock_type, slot.as_ref()) != LockAction::Write {
                return Ok(Sentinel::NoLock);
            }
            put(&mut entries, key, Slot::Sentinel(token), now + self.sentinel_ttl);
            return Ok(token);
        }

        for key in keys {
            let slot = current(&mut entries, key, now);
            match lock_action(lock_type, slot.as_ref()) {
                LockAction::Write => {
                    put(&mut entries, key, Slot::Sentinel(token), now + self.sentinel_ttl)
                }
                LockAction::RefreshTombstone => {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.expires_at = now + self.tombstone_ttl;
                    }
                }
                LockAction::Skip => {}
            }
        }
        Ok(token)
    }

    async fn release_sentinel(
        &self,
        keys: &[CacheKey],
        sentinel: &Sentinel,
    ) -> Result<(), CacheError> {
        if sentinel.token().is_none() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.entries()?;
        for key in keys {
            if current(&mut entries, key, now).is_some_and(|slot| slot.holds(sentinel)) {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn add_dependency(
        &self,
        dependency_keys: &[CacheKey],
        dependents: &[CacheKey],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        for key in dependency_keys {
            if current(&mut entries, key, now).is_some_and(|slot| slot.is_tombstone()) {
                return Err(CacheError::DependencyTombstoned {
                    key: key.to_string(),
                });
            }
        }

        for key in dependency_keys {
            let (existing, expires_at) = match entries.get(key) {
                Some(Entry {
                    slot: Slot::Dependents(listed),
                    expires_at,
                }) => (listed.clone(), (*expires_at).max(now + ttl)),
                _ => (Vec::new(), now + ttl),
            };
            let live: Vec<CacheKey> = existing
                .into_iter()
                .filter(|listed| current(&mut entries, listed, now).is_some())
                .collect();
            put(
                &mut entries,
                key,
                Slot::Dependents(merge_dependents(live, dependents)),
                expires_at,
            );
        }
        Ok(())
    }

    async fn clear_dependencies(
        &self,
        key: &CacheKey,
        set_tombstone: bool,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        let listed = match current(&mut entries, key, now) {
            Some(Slot::Dependents(listed)) => listed,
            _ => Vec::new(),
        };

        let mut removed = Vec::with_capacity(listed.len());
        for dependent in listed {
            match current(&mut entries, &dependent, now) {
                Some(slot) if slot.is_write_token() => {}
                Some(_) => {
                    entries.remove(&dependent);
                    removed.push(dependent);
                }
                None => {}
            }
        }

        if set_tombstone {
            put(
                &mut entries,
                key,
                Slot::Sentinel(Sentinel::Tombstone),
                now + self.tombstone_ttl,
            );
        } else if !current(&mut entries, key, now).is_some_and(|slot| slot.is_tombstone()) {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn flush(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|key, _| !key.has_prefix(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn reserve_rate_limit_slot(
        &self,
        keys: &[CacheKey],
        limit: i64,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let Some((bucket, earlier)) = keys.split_last() else {
            return Err(CacheError::InvalidKey {
                key: String::new(),
                reason: "rate limit reservation needs at least one bucket".to_string(),
            });
        };
        let now = Instant::now();
        let mut entries = self.entries()?;

        let mut total: i64 = earlier
            .iter()
            .filter_map(|key| current(&mut entries, key, now))
            .map(|slot| slot.counter_value())
            .sum();
        total += current(&mut entries, bucket, now).map_or(0, |slot| slot.counter_value());
        if total >= limit {
            return Ok(false);
        }

        if let Some(entry) = entries.get_mut(bucket) {
            entry.slot = Slot::Counter(entry.slot.counter_value() + 1);
        } else {
            put(&mut entries, bucket, Slot::Counter(1), now + ttl);
        }
        Ok(true)
    }

    async fn release_rate_limit_slot(&self, keys: &[CacheKey]) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        for key in keys {
            let count = current(&mut entries, key, now).map_or(0, |slot| slot.counter_value());
            if count > 0 {
                if let Some(entry) = entries.get_mut(key) {
                    entry.slot = Slot::Counter(count - 1);
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}
