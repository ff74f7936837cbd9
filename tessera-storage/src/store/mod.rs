//! Primary-store contract.
//!
//! The relational store behind the cache is an external collaborator with a
//! narrow contract: point lookups, conditional updates and soft deletes by
//! timestamp. Every read names the node it must be served from, so that
//! callers who saw a tombstone in the cache can insist on the leader.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_core::{EntityId, StoredObject, TesseraResult, Timestamp, Version};

use crate::cache::{Page, PageRequest};

pub use memory::InMemoryObjectStore;

/// Which node a read goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadMode {
    /// Any replica; may lag the leader.
    #[default]
    Replica,
    /// The leader; reflects every committed write.
    Leader,
}

impl ReadMode {
    pub fn from_force_leader(force_leader: bool) -> Self {
        if force_leader {
            Self::Leader
        } else {
            Self::Replica
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }
}

/// Storage of one object type.
///
/// Reads only ever return live rows (`deleted` unset). For versioned types the
/// live row is the latest version; superseded versions are soft-deleted.
#[async_trait]
pub trait ObjectStore<T: StoredObject>: Send + Sync {
    /// Latest live row for `id`, or `NotFound`.
    async fn get_latest(&self, id: EntityId, mode: ReadMode) -> TesseraResult<T>;

    /// Live row for `(id, version)`, or `NotFound`.
    async fn get_version(&self, id: EntityId, version: Version, mode: ReadMode) -> TesseraResult<T>;

    /// Live row whose natural key equals `components`, or `NotFoundByName`.
    async fn get_by_name(&self, components: &[String], mode: ReadMode) -> TesseraResult<T>;

    /// Live rows for the ids that exist, in request order.
    async fn get_many(&self, ids: &[EntityId], mode: ReadMode) -> TesseraResult<Vec<T>>;

    /// Live rows ordered by id.
    async fn list(&self, page: &PageRequest, mode: ReadMode) -> TesseraResult<Page<T>>;

    /// Insert a new row. Fails with `InsertFailed` on a duplicate id or natural key.
    async fn insert(&self, item: T) -> TesseraResult<T>;

    /// Replace the live row of `item.id()`.
    ///
    /// For versioned types the live row must be at `item.version() - 1`; it is
    /// soft-deleted and `item` becomes the live row. Fails with
    /// `UpdateFailed` otherwise.
    async fn update(&self, item: T) -> TesseraResult<T>;

    /// Soft-delete `(id, version)` if live. Returns rows affected.
    async fn soft_delete_version(&self, id: EntityId, version: Version) -> TesseraResult<u64>;

    /// Soft-delete every live version of `id`. Returns rows affected.
    async fn soft_delete_all(&self, id: EntityId) -> TesseraResult<u64>;

    /// Deletion timestamp of `(id, version)`: `None` while live, `NotFound`
    /// if the row never existed. Always served by the leader.
    async fn deleted_at(&self, id: EntityId, version: Version) -> TesseraResult<Option<Timestamp>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_mode() {
        assert_eq!(ReadMode::default(), ReadMode::Replica);
        assert!(ReadMode::from_force_leader(true).is_leader());
        assert!(!ReadMode::from_force_leader(false).is_leader());
    }
}
