//! In-memory primary store with an explicit replica.
//!
//! Writes always land on the leader. The replica copies the leader after each
//! write unless replication is paused, which lets tests reproduce the
//! read-your-write hazards of a lagging replica deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tessera_core::{
    is_alive, EntityId, StorageError, StoredObject, TesseraResult, Timestamp, Version,
};

use super::{ObjectStore, ReadMode};
use crate::cache::{Page, PageRequest};

/// Leader/replica pair of row tables for one object type.
#[derive(Debug)]
pub struct InMemoryObjectStore<T> {
    leader: RwLock<Vec<T>>,
    replica: RwLock<Vec<T>>,
    replica_paused: AtomicBool,
    leader_reads: AtomicU64,
    replica_reads: AtomicU64,
}

impl<T: StoredObject> Default for InMemoryObjectStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StoredObject> InMemoryObjectStore<T> {
    pub fn new() -> Self {
        Self {
            leader: RwLock::new(Vec::new()),
            replica: RwLock::new(Vec::new()),
            replica_paused: AtomicBool::new(false),
            leader_reads: AtomicU64::new(0),
            replica_reads: AtomicU64::new(0),
        }
    }

    /// Stop (or resume) copying writes to the replica. Resuming catches the
    /// replica up first.
    pub fn set_replica_paused(&self, paused: bool) -> TesseraResult<()> {
        self.replica_paused.store(paused, Ordering::SeqCst);
        if !paused {
            self.sync_replica()?;
        }
        Ok(())
    }

    /// Copy the leader to the replica now.
    pub fn sync_replica(&self) -> TesseraResult<()> {
        let leader = self.leader.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut replica = self.replica.write().map_err(|_| StorageError::LockPoisoned)?;
        replica.clone_from(&leader);
        Ok(())
    }

    pub fn leader_reads(&self) -> u64 {
        self.leader_reads.load(Ordering::Relaxed)
    }

    pub fn replica_reads(&self) -> u64 {
        self.replica_reads.load(Ordering::Relaxed)
    }

    /// Number of rows on the leader, live or not.
    pub fn row_count(&self) -> usize {
        self.leader.read().map(|rows| rows.len()).unwrap_or(0)
    }

    fn rows(&self, mode: ReadMode) -> TesseraResult<RwLockReadGuard<'_, Vec<T>>> {
        let (lock, counter) = match mode {
            ReadMode::Leader => (&self.leader, &self.leader_reads),
            ReadMode::Replica => (&self.replica, &self.replica_reads),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(lock.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn leader_mut(&self) -> TesseraResult<RwLockWriteGuard<'_, Vec<T>>> {
        Ok(self.leader.write().map_err(|_| StorageError::LockPoisoned)?)
    }

    /// Propagate a committed write to the replica unless paused.
    fn replicate(&self, leader: &[T]) -> TesseraResult<()> {
        if self.replica_paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut replica = self.replica.write().map_err(|_| StorageError::LockPoisoned)?;
        *replica = leader.to_vec();
        Ok(())
    }

    fn not_found(id: EntityId) -> StorageError {
        StorageError::NotFound {
            object_type: T::OBJECT_TYPE,
            id,
        }
    }

    fn find_live(rows: &[T], id: EntityId) -> Option<&T> {
        rows.iter()
            .filter(|row| row.id() == id && row.is_alive())
            .max_by_key(|row| row.version())
    }

    /// Live row other than `id` already using `item`'s natural key.
    fn name_taken(rows: &[T], item: &T) -> Option<EntityId> {
        let key = item.natural_key();
        if key.is_empty() {
            return None;
        }
        rows.iter()
            .find(|row| row.is_alive() && row.id() != item.id() && row.natural_key() == key)
            .map(|row| row.id())
    }

    fn soft_delete_where(&self, predicate: impl Fn(&T) -> bool) -> TesseraResult<u64> {
        let now = Utc::now();
        let mut leader = self.leader_mut()?;
        let mut affected = 0u64;
        for row in leader.iter_mut().filter(|row| row.is_alive() && predicate(row)) {
            row.set_deleted(now);
            affected += 1;
        }
        if affected > 0 {
            self.replicate(&leader)?;
        }
        Ok(affected)
    }
}

#[async_trait]
impl<T: StoredObject> ObjectStore<T> for InMemoryObjectStore<T> {
    async fn get_latest(&self, id: EntityId, mode: ReadMode) -> TesseraResult<T> {
        let rows = self.rows(mode)?;
        Self::find_live(&rows, id)
            .cloned()
            .ok_or_else(|| Self::not_found(id).into())
    }

    async fn get_version(&self, id: EntityId, version: Version, mode: ReadMode) -> TesseraResult<T> {
        let rows = self.rows(mode)?;
        rows.iter()
            .find(|row| row.id() == id && row.version() == version && row.is_alive())
            .cloned()
            .ok_or_else(|| Self::not_found(id).into())
    }

    async fn get_by_name(&self, components: &[String], mode: ReadMode) -> TesseraResult<T> {
        let wanted: Vec<String> = components.iter().map(|c| c.to_lowercase()).collect();
        let rows = self.rows(mode)?;
        rows.iter()
            .find(|row| row.is_alive() && row.natural_key() == wanted)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFoundByName {
                    object_type: T::OBJECT_TYPE,
                    name: wanted.join("."),
                }
                .into()
            })
    }

    async fn get_many(&self, ids: &[EntityId], mode: ReadMode) -> TesseraResult<Vec<T>> {
        let rows = self.rows(mode)?;
        Ok(ids
            .iter()
            .filter_map(|id| Self::find_live(&rows, *id).cloned())
            .collect())
    }

    async fn list(&self, page: &PageRequest, mode: ReadMode) -> TesseraResult<Page<T>> {
        let rows = self.rows(mode)?;
        let mut live: Vec<T> = rows.iter().filter(|row| row.is_alive()).cloned().collect();
        live.sort_by_key(|row| row.id());
        Ok(Page::from_sorted(live, page, |row| row.id()))
    }

    async fn insert(&self, item: T) -> TesseraResult<T> {
        let mut leader = self.leader_mut()?;
        if Self::find_live(&leader, item.id()).is_some() {
            return Err(StorageError::InsertFailed {
                object_type: T::OBJECT_TYPE,
                reason: format!("id {} already exists", item.id()),
            }
            .into());
        }
        if let Some(existing) = Self::name_taken(&leader, &item) {
            return Err(StorageError::InsertFailed {
                object_type: T::OBJECT_TYPE,
                reason: format!("name '{}' already used by {}", item.display_name(), existing),
            }
            .into());
        }
        leader.push(item.clone());
        self.replicate(&leader)?;
        Ok(item)
    }

    async fn update(&self, item: T) -> TesseraResult<T> {
        let id = item.id();
        let mut leader = self.leader_mut()?;
        if let Some(existing) = Self::name_taken(&leader, &item) {
            return Err(StorageError::UpdateFailed {
                object_type: T::OBJECT_TYPE,
                id,
                reason: format!("name '{}' already used by {}", item.display_name(), existing),
            }
            .into());
        }

        let expected = if T::VERSIONED { item.version() - 1 } else { item.version() };
        let Some(index) = leader
            .iter()
            .position(|row| row.id() == id && row.version() == expected && row.is_alive())
        else {
            return Err(StorageError::UpdateFailed {
                object_type: T::OBJECT_TYPE,
                id,
                reason: format!("no live row at version {expected}"),
            }
            .into());
        };

        if T::VERSIONED {
            leader[index].set_deleted(Utc::now());
            leader.push(item.clone());
        } else {
            leader[index] = item.clone();
        }
        self.replicate(&leader)?;
        Ok(item)
    }

    async fn soft_delete_version(&self, id: EntityId, version: Version) -> TesseraResult<u64> {
        self.soft_delete_where(|row| row.id() == id && row.version() == version)
    }

    async fn soft_delete_all(&self, id: EntityId) -> TesseraResult<u64> {
        self.soft_delete_where(|row| row.id() == id)
    }

    async fn deleted_at(&self, id: EntityId, version: Version) -> TesseraResult<Option<Timestamp>> {
        let rows = self.rows(ReadMode::Leader)?;
        let row = rows
            .iter()
            .find(|row| row.id() == id && row.version() == version)
            .ok_or_else(|| Self::not_found(id))?;
        let deleted = row.deleted();
        Ok((!is_alive(&deleted)).then_some(deleted))
    }
}
