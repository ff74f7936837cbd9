//! Error types for Tessera operations

use crate::{EntityId, ObjectType};
use thiserror::Error;

/// Storage layer errors.
///
/// These are the errors callers of the object store see. Cache failures are
/// deliberately absent: they are logged and swallowed where they occur.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{object_type} not found: {id}")]
    NotFound { object_type: ObjectType, id: EntityId },

    #[error("{object_type} not found by name: {name}")]
    NotFoundByName { object_type: ObjectType, name: String },

    /// Uniqueness violation on name or ID. `identical` is true when the
    /// conflicting object has the same content as the one being written.
    #[error("{message}")]
    Conflict {
        object_type: ObjectType,
        id: EntityId,
        identical: bool,
        message: String,
    },

    #[error("{object_type} {id} is still in use by {referenced_by}")]
    StillInUse {
        object_type: ObjectType,
        id: EntityId,
        referenced_by: String,
    },

    #[error("{operation} did not converge after {attempts} attempts")]
    ConvergenceExhausted { operation: String, attempts: u32 },

    #[error("Insert failed for {object_type}: {reason}")]
    InsertFailed { object_type: ObjectType, reason: String },

    #[error("Update failed for {object_type} with id {id}: {reason}")]
    UpdateFailed {
        object_type: ObjectType,
        id: EntityId,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid cache key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid sentinel value: {value}")]
    InvalidSentinel { value: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Dependency list {key} is tombstoned")]
    DependencyTombstoned { key: String },
}

impl CacheError {
    /// Cancellation is an expected outcome of a caller giving up, not a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled { .. })
    }

    /// The item being tracked was just deleted; its dependents must not be cached.
    pub fn is_dependency_tombstoned(&self) -> bool {
        matches!(self, CacheError::DependencyTombstoned { .. })
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TesseraError {
    /// True for both lookup-by-id and lookup-by-name misses.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TesseraError::Storage(StorageError::NotFound { .. })
                | TesseraError::Storage(StorageError::NotFoundByName { .. })
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TesseraError::Storage(StorageError::Conflict { .. }))
    }
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================
