//! Column manager: column lookups plus the default accessor and mutator.
//!
//! The default accessor reads every live column through the passthrough
//! transformer; the default mutator writes every mutable column through the
//! passthrough normalizer. Both are derived from the column set, and nothing
//! makes a column write and the recompute of the defaults atomic. Instead the
//! manager converges: it writes the defaults from its snapshot, re-reads the
//! column set from the leader, and retries from a reload when the two differ.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};

use tessera_core::{
    Accessor, BaseModel, Column, EntityId, Mutator, StorageError, StoredObject, TesseraError,
    TesseraResult, DEFAULT_ACCESSOR_ID, DEFAULT_ACCESSOR_NAME, DEFAULT_MUTATOR_ID,
    DEFAULT_MUTATOR_NAME, PASSTHROUGH_NORMALIZER_ID, PASSTHROUGH_TRANSFORMER_ID,
};

use crate::cached_store::CachedObjectStore;
use crate::retry::{retry_until_converged, RetryPolicy};
use crate::store::ReadMode;

const CONVERGE_OPERATION: &str = "update_default_accessor_and_mutator";

#[derive(Debug, Default)]
struct ColumnMaps {
    by_id: HashMap<EntityId, Column>,
    /// `lower(table) + "." + lower(name)` to id.
    by_name: HashMap<String, EntityId>,
}

impl ColumnMaps {
    fn from_columns(columns: Vec<Column>) -> Self {
        let mut maps = Self::default();
        for column in columns {
            maps.insert(column);
        }
        maps
    }

    fn insert(&mut self, column: Column) {
        if let Some(previous) = self.by_id.get(&column.id()) {
            self.by_name.remove(&name_key(&previous.table, &previous.name));
        }
        self.by_name.insert(name_key(&column.table, &column.name), column.id());
        self.by_id.insert(column.id(), column);
    }

    fn remove(&mut self, id: EntityId) {
        if let Some(column) = self.by_id.remove(&id) {
            self.by_name.remove(&name_key(&column.table, &column.name));
        }
    }
}

fn name_key(table: &str, name: &str) -> String {
    format!("{}.{}", table.to_lowercase(), name.to_lowercase())
}

/// Owns the column maps of one tenant and keeps the defaults in step.
pub struct ColumnManager {
    columns: CachedObjectStore<Column>,
    accessors: CachedObjectStore<Accessor>,
    mutators: CachedObjectStore<Mutator>,
    retry: RetryPolicy,
    maps: RwLock<ColumnMaps>,
}

impl ColumnManager {
    /// Build a manager and load the column set from the leader.
    pub async fn new(
        columns: CachedObjectStore<Column>,
        accessors: CachedObjectStore<Accessor>,
        mutators: CachedObjectStore<Mutator>,
        retry: RetryPolicy,
    ) -> TesseraResult<Self> {
        let manager = Self {
            columns,
            accessors,
            mutators,
            retry,
            maps: RwLock::new(ColumnMaps::default()),
        };
        manager.reload().await?;
        Ok(manager)
    }

    /// Replace the maps with the leader's live column set.
    pub async fn reload(&self) -> TesseraResult<Vec<Column>> {
        let all = self.columns.list_all(true).await?;
        let fresh = ColumnMaps::from_columns(all.clone());
        *self.maps.write().map_err(|_| StorageError::LockPoisoned)? = fresh;
        Ok(all)
    }

    fn maps(&self) -> TesseraResult<RwLockReadGuard<'_, ColumnMaps>> {
        Ok(self.maps.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn update_maps(&self, f: impl FnOnce(&mut ColumnMaps)) -> TesseraResult<()> {
        let mut maps = self.maps.write().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut maps);
        Ok(())
    }

    pub fn get_column(&self, id: EntityId) -> TesseraResult<Column> {
        self.maps()?
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound {
                    object_type: Column::OBJECT_TYPE,
                    id,
                }
                .into()
            })
    }

    pub fn get_column_by_table_and_name(&self, table: &str, name: &str) -> TesseraResult<Column> {
        let maps = self.maps()?;
        maps.by_name
            .get(&name_key(table, name))
            .and_then(|id| maps.by_id.get(id))
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFoundByName {
                    object_type: Column::OBJECT_TYPE,
                    name: format!("{table}.{name}"),
                }
                .into()
            })
    }

    /// Snapshot of the live columns, ordered by id.
    pub fn columns(&self) -> TesseraResult<Vec<Column>> {
        let mut all: Vec<Column> = self.maps()?.by_id.values().cloned().collect();
        all.sort_by_key(|column| column.id());
        Ok(all)
    }

    pub async fn create_column(&self, column: Column) -> TesseraResult<Column> {
        if let Ok(existing) = self.get_column_by_table_and_name(&column.table, &column.name) {
            let identical = existing.content_equals(&column);
            let message = if identical {
                "This column already exists".to_string()
            } else {
                format!(
                    "A column with the name '{}' already exists with ID {}",
                    column.display_name(),
                    existing.id()
                )
            };
            return Err(StorageError::Conflict {
                object_type: Column::OBJECT_TYPE,
                id: existing.id(),
                identical,
                message,
            }
            .into());
        }

        let created = self.columns.create(column).await?;
        self.update_maps(|maps| maps.insert(created.clone()))?;
        self.update_default_accessor_and_mutator().await?;
        Ok(created)
    }

    pub async fn update_column(&self, column: Column) -> TesseraResult<Column> {
        let previous = match self.get_column(column.id()) {
            Ok(previous) => previous,
            Err(_) => self.columns.store().get_latest(column.id(), ReadMode::Leader).await?,
        };
        let saved = self.columns.update(&previous, column).await?;
        self.update_maps(|maps| maps.insert(saved.clone()))?;
        self.update_default_accessor_and_mutator().await?;
        Ok(saved)
    }

    /// Delete a column no custom accessor or mutator reads or writes.
    pub async fn delete_column(&self, id: EntityId) -> TesseraResult<()> {
        let referenced_by = self.references_to(id).await?;
        if !referenced_by.is_empty() {
            return Err(StorageError::StillInUse {
                object_type: Column::OBJECT_TYPE,
                id,
                referenced_by: referenced_by.join(", "),
            }
            .into());
        }

        self.columns.delete_all_versions(id).await?;
        self.update_maps(|maps| maps.remove(id))?;
        self.update_default_accessor_and_mutator().await?;
        Ok(())
    }

    async fn references_to(&self, column_id: EntityId) -> TesseraResult<Vec<String>> {
        let mut refs = Vec::new();
        for accessor in self.accessors.list_all(true).await? {
            if accessor.id() != DEFAULT_ACCESSOR_ID && accessor.references_column(column_id) {
                refs.push(format!("accessor '{}' ({})", accessor.name, accessor.id()));
            }
        }
        for mutator in self.mutators.list_all(true).await? {
            if mutator.id() != DEFAULT_MUTATOR_ID && mutator.references_column(column_id) {
                refs.push(format!("mutator '{}' ({})", mutator.name, mutator.id()));
            }
        }
        Ok(refs)
    }

    /// Recompute the defaults until they match the leader's column set.
    /// Returns the number of attempts it took.
    pub async fn update_default_accessor_and_mutator(&self) -> TesseraResult<u32> {
        retry_until_converged(self.retry, CONVERGE_OPERATION, |attempt| self.converge_once(attempt)).await
    }

    async fn converge_once(&self, attempt: u32) -> TesseraResult<bool> {
        if attempt > 0 {
            self.reload().await?;
        }
        let snapshot = self.columns()?;

        let wrote_accessor = self.write_default_accessor(&snapshot).await?;
        let wrote_mutator = self.write_default_mutator(&snapshot).await?;
        if !(wrote_accessor && wrote_mutator) {
            return Ok(false);
        }

        let mut authoritative = self.columns.list_all(true).await?;
        authoritative.sort_by_key(|column| column.id());
        Ok(same_columns(&authoritative, &snapshot))
    }

    /// Write the default accessor for `columns`. `false` when another writer
    /// got there first.
    async fn write_default_accessor(&self, columns: &[Column]) -> TesseraResult<bool> {
        let column_ids: Vec<EntityId> = columns.iter().map(|column| column.id()).collect();
        let transformer_ids = vec![PASSTHROUGH_TRANSFORMER_ID; column_ids.len()];

        match self.accessors.store().get_latest(DEFAULT_ACCESSOR_ID, ReadMode::Leader).await {
            Ok(existing) => {
                if existing.column_ids == column_ids && existing.transformer_ids == transformer_ids {
                    return Ok(true);
                }
                let mut updated = existing.clone();
                updated.column_ids = column_ids;
                updated.transformer_ids = transformer_ids;
                updated.set_version(existing.version() + 1);
                lost_race(self.accessors.update(&existing, updated).await)
            }
            Err(e) if e.is_not_found() => {
                let mut accessor = Accessor::new(DEFAULT_ACCESSOR_NAME, column_ids, transformer_ids);
                accessor.base = BaseModel::new(DEFAULT_ACCESSOR_ID);
                accessor.is_system = true;
                lost_race(self.accessors.create(accessor).await)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_default_mutator(&self, columns: &[Column]) -> TesseraResult<bool> {
        let column_ids: Vec<EntityId> = columns
            .iter()
            .filter(|column| !column.immutable)
            .map(|column| column.id())
            .collect();
        let normalizer_ids = vec![PASSTHROUGH_NORMALIZER_ID; column_ids.len()];

        match self.mutators.store().get_latest(DEFAULT_MUTATOR_ID, ReadMode::Leader).await {
            Ok(existing) => {
                if existing.column_ids == column_ids && existing.normalizer_ids == normalizer_ids {
                    return Ok(true);
                }
                let mut updated = existing.clone();
                updated.column_ids = column_ids;
                updated.normalizer_ids = normalizer_ids;
                updated.set_version(existing.version() + 1);
                lost_race(self.mutators.update(&existing, updated).await)
            }
            Err(e) if e.is_not_found() => {
                let mut mutator = Mutator::new(DEFAULT_MUTATOR_NAME, column_ids, normalizer_ids);
                mutator.base = BaseModel::new(DEFAULT_MUTATOR_ID);
                mutator.is_system = true;
                lost_race(self.mutators.create(mutator).await)
            }
            Err(e) => Err(e),
        }
    }
}

/// Both sides sorted by id. Timestamps are ignored.
fn same_columns(authoritative: &[Column], seen: &[Column]) -> bool {
    authoritative.len() == seen.len()
        && authoritative
            .iter()
            .zip(seen)
            .all(|(leader, snapshot)| leader.content_equals(snapshot))
}

/// A conflicting create or a stale conditional update means a concurrent
/// writer moved the defaults; the caller retries from a reload.
fn lost_race<T>(result: TesseraResult<T>) -> TesseraResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(TesseraError::Storage(
            StorageError::Conflict { .. } | StorageError::InsertFailed { .. } | StorageError::UpdateFailed { .. },
        )) => Ok(false),
        Err(e) => Err(e),
    }
}
