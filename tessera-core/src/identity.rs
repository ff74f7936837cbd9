//! Identity types for Tessera objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Object identifier using UUIDv7 for timestamp-sortable IDs.
/// Stable across every version of the same logical object.
pub type EntityId = Uuid;

/// Tenant identifier. Every cache key is scoped to exactly one tenant.
pub type TenantId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Monotonic version number, bumped on each update of a versioned object.
pub type Version = i64;

/// The zero value of a `deleted` timestamp. A row carrying this value is alive;
/// any other value is the time it was soft-deleted.
pub const NOT_DELETED: Timestamp = DateTime::<Utc>::UNIX_EPOCH;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Returns true if a `deleted` timestamp marks a live row.
pub fn is_alive(deleted: &Timestamp) -> bool {
    *deleted == NOT_DELETED
}

/// Object type discriminator used for key derivation and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Column,
    Accessor,
    Mutator,
    AccessPolicy,
    Transformer,
    SearchIndex,
}

impl ObjectType {
    /// Short, stable prefix used inside cache keys.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            ObjectType::Column => "col",
            ObjectType::Accessor => "acc",
            ObjectType::Mutator => "mut",
            ObjectType::AccessPolicy => "apol",
            ObjectType::Transformer => "xfm",
            ObjectType::SearchIndex => "sidx",
        }
    }

    /// Human readable name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Column => "column",
            ObjectType::Accessor => "accessor",
            ObjectType::Mutator => "mutator",
            ObjectType::AccessPolicy => "access policy",
            ObjectType::Transformer => "transformer",
            ObjectType::SearchIndex => "search index",
        }
    }

    /// All object types, in declaration order.
    pub fn all() -> [ObjectType; 6] {
        [
            ObjectType::Column,
            ObjectType::Accessor,
            ObjectType::Mutator,
            ObjectType::AccessPolicy,
            ObjectType::Transformer,
            ObjectType::SearchIndex,
        ]
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_not_deleted_is_alive() {
        assert!(is_alive(&NOT_DELETED));
        assert!(!is_alive(&Utc::now()));
    }

    #[test]
    fn test_key_prefixes_are_distinct() {
        let prefixes: HashSet<_> = ObjectType::all().iter().map(|t| t.key_prefix()).collect();
        assert_eq!(prefixes.len(), ObjectType::all().len());
    }

    #[test]
    fn test_display_uses_readable_name() {
        assert_eq!(ObjectType::AccessPolicy.to_string(), "access policy");
    }
}
