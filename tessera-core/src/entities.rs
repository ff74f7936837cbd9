//! Versioned schema objects.
//!
//! Only the fields the persistence protocol needs are modelled here. How a
//! column or accessor is structured beyond its identity, natural name and the
//! references the convergence loop follows is outside this crate.

use crate::{
    is_alive, EntityId, ObjectType, RateLimitConfig, Timestamp, ValidationError, Version,
    NOT_DELETED,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// WELL-KNOWN IDS
// ============================================================================

/// The accessor that always lists every live column.
pub const DEFAULT_ACCESSOR_ID: EntityId = Uuid::from_u128(0x0191_6f3c_2a4e_7c10_8000_0000_0000_0a01);

/// The mutator that always lists every mutable live column.
pub const DEFAULT_MUTATOR_ID: EntityId = Uuid::from_u128(0x0191_6f3c_2a4e_7c10_8000_0000_0000_0b01);

/// Transformer that returns data unchanged.
pub const PASSTHROUGH_TRANSFORMER_ID: EntityId =
    Uuid::from_u128(0x0191_6f3c_2a4e_7c10_8000_0000_0000_0c01);

/// Normalizer that accepts data unchanged.
pub const PASSTHROUGH_NORMALIZER_ID: EntityId =
    Uuid::from_u128(0x0191_6f3c_2a4e_7c10_8000_0000_0000_0c02);

pub const DEFAULT_ACCESSOR_NAME: &str = "default_accessor";
pub const DEFAULT_MUTATOR_NAME: &str = "default_mutator";

// ============================================================================
// STORED OBJECT CONTRACT
// ============================================================================

/// An object persisted in the primary store and fronted by the cache.
///
/// Implementations must be `Clone`, `Serialize` and `DeserializeOwned` for
/// cache storage, and `Send + Sync + 'static` for async use.
pub trait StoredObject:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Type discriminator used for key derivation.
    const OBJECT_TYPE: ObjectType;

    /// Versioned objects keep one row per version; unversioned objects are
    /// updated in place and always report version 0.
    const VERSIONED: bool = false;

    fn id(&self) -> EntityId;

    fn version(&self) -> Version {
        0
    }

    fn set_version(&mut self, _version: Version) {}

    fn deleted(&self) -> Timestamp;

    fn set_deleted(&mut self, deleted: Timestamp);

    /// Lowercased components of the case-insensitive natural name, or empty
    /// when the object has no secondary lookup.
    fn natural_key(&self) -> Vec<String>;

    /// Compare everything except identity metadata (timestamps, version).
    fn content_equals(&self, other: &Self) -> bool;

    fn validate(&self) -> Result<(), ValidationError>;

    /// An object carrying only `id`, used to derive keys for an object this
    /// process has never seen.
    fn stub(id: EntityId) -> Self;

    fn is_alive(&self) -> bool {
        is_alive(&self.deleted())
    }

    /// Natural name joined for messages.
    fn display_name(&self) -> String {
        self.natural_key().join(".")
    }
}

/// Identity and lifecycle metadata shared by every stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseModel {
    pub id: EntityId,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub deleted: Timestamp,
}

impl BaseModel {
    pub fn new(id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created: now,
            updated: now,
            deleted: NOT_DELETED,
        }
    }
}

fn require_name(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn require_identifier(field: &str, value: &str) -> Result<(), ValidationError> {
    require_name(field, value)?;
    let mut chars = value.chars();
    let starts_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' must be alphanumeric and start with a letter or underscore", value),
        });
    }
    if value.len() > 128 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "must be at most 128 characters".to_string(),
        });
    }
    Ok(())
}

fn require_id(field: &str, id: EntityId) -> Result<(), ValidationError> {
    if id.is_nil() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// COLUMN
// ============================================================================

/// A column of a user data table. Columns are unversioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    #[serde(flatten)]
    pub base: BaseModel,
    /// Database the column lives in; nil for the built-in user store.
    pub database_id: EntityId,
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub is_array: bool,
    /// Immutable columns are never offered to mutators.
    pub immutable: bool,
}

impl Column {
    pub fn new(table: impl Into<String>, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            base: BaseModel::new(crate::new_entity_id()),
            database_id: Uuid::nil(),
            table: table.into(),
            name: name.into(),
            data_type: data_type.into(),
            is_array: false,
            immutable: false,
        }
    }

    pub fn with_database(mut self, database_id: EntityId) -> Self {
        self.database_id = database_id;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

impl StoredObject for Column {
    const OBJECT_TYPE: ObjectType = ObjectType::Column;

    fn id(&self) -> EntityId {
        self.base.id
    }

    fn deleted(&self) -> Timestamp {
        self.base.deleted
    }

    fn set_deleted(&mut self, deleted: Timestamp) {
        self.base.deleted = deleted;
    }

    fn natural_key(&self) -> Vec<String> {
        if self.name.is_empty() {
            return Vec::new();
        }
        vec![
            self.database_id.to_string(),
            self.table.to_lowercase(),
            self.name.to_lowercase(),
        ]
    }

    fn content_equals(&self, other: &Self) -> bool {
        self.base.id == other.base.id
            && self.database_id == other.database_id
            && self.table.eq_ignore_ascii_case(&other.table)
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.data_type == other.data_type
            && self.is_array == other.is_array
            && self.immutable == other.immutable
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id("id", self.base.id)?;
        require_identifier("table", &self.table)?;
        require_identifier("name", &self.name)?;
        require_name("data_type", &self.data_type)
    }

    fn stub(id: EntityId) -> Self {
        Self {
            base: BaseModel::new(id),
            database_id: Uuid::nil(),
            table: String::new(),
            name: String::new(),
            data_type: String::new(),
            is_array: false,
            immutable: false,
        }
    }

    fn display_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}

// ============================================================================
// ACCESSOR / MUTATOR
// ============================================================================

/// A read path over a set of columns, each paired with a transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessor {
    #[serde(flatten)]
    pub base: BaseModel,
    pub version: Version,
    pub name: String,
    pub column_ids: Vec<EntityId>,
    pub transformer_ids: Vec<EntityId>,
    pub is_system: bool,
}

impl Accessor {
    pub fn new(name: impl Into<String>, column_ids: Vec<EntityId>, transformer_ids: Vec<EntityId>) -> Self {
        Self {
            base: BaseModel::new(crate::new_entity_id()),
            version: 0,
            name: name.into(),
            column_ids,
            transformer_ids,
            is_system: false,
        }
    }

    pub fn references_column(&self, column_id: EntityId) -> bool {
        self.column_ids.contains(&column_id)
    }
}

impl StoredObject for Accessor {
    const OBJECT_TYPE: ObjectType = ObjectType::Accessor;
    const VERSIONED: bool = true;

    fn id(&self) -> EntityId {
        self.base.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn deleted(&self) -> Timestamp {
        self.base.deleted
    }

    fn set_deleted(&mut self, deleted: Timestamp) {
        self.base.deleted = deleted;
    }

    fn natural_key(&self) -> Vec<String> {
        if self.name.is_empty() {
            return Vec::new();
        }
        vec![self.name.to_lowercase()]
    }

    fn content_equals(&self, other: &Self) -> bool {
        self.base.id == other.base.id
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.column_ids == other.column_ids
            && self.transformer_ids == other.transformer_ids
            && self.is_system == other.is_system
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id("id", self.base.id)?;
        require_identifier("name", &self.name)?;
        if self.column_ids.len() != self.transformer_ids.len() {
            return Err(ValidationError::ConstraintViolation {
                constraint: "accessor_transformers".to_string(),
                reason: format!(
                    "{} columns but {} transformers",
                    self.column_ids.len(),
                    self.transformer_ids.len()
                ),
            });
        }
        Ok(())
    }

    fn stub(id: EntityId) -> Self {
        Self {
            base: BaseModel::new(id),
            version: 0,
            name: String::new(),
            column_ids: Vec::new(),
            transformer_ids: Vec::new(),
            is_system: false,
        }
    }
}

/// A write path over a set of columns, each paired with a normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutator {
    #[serde(flatten)]
    pub base: BaseModel,
    pub version: Version,
    pub name: String,
    pub column_ids: Vec<EntityId>,
    pub normalizer_ids: Vec<EntityId>,
    pub is_system: bool,
}

impl Mutator {
    pub fn new(name: impl Into<String>, column_ids: Vec<EntityId>, normalizer_ids: Vec<EntityId>) -> Self {
        Self {
            base: BaseModel::new(crate::new_entity_id()),
            version: 0,
            name: name.into(),
            column_ids,
            normalizer_ids,
            is_system: false,
        }
    }

    pub fn references_column(&self, column_id: EntityId) -> bool {
        self.column_ids.contains(&column_id)
    }
}

impl StoredObject for Mutator {
    const OBJECT_TYPE: ObjectType = ObjectType::Mutator;
    const VERSIONED: bool = true;

    fn id(&self) -> EntityId {
        self.base.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn deleted(&self) -> Timestamp {
        self.base.deleted
    }

    fn set_deleted(&mut self, deleted: Timestamp) {
        self.base.deleted = deleted;
    }

    fn natural_key(&self) -> Vec<String> {
        if self.name.is_empty() {
            return Vec::new();
        }
        vec![self.name.to_lowercase()]
    }

    fn content_equals(&self, other: &Self) -> bool {
        self.base.id == other.base.id
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.column_ids == other.column_ids
            && self.normalizer_ids == other.normalizer_ids
            && self.is_system == other.is_system
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id("id", self.base.id)?;
        require_identifier("name", &self.name)?;
        if self.column_ids.len() != self.normalizer_ids.len() {
            return Err(ValidationError::ConstraintViolation {
                constraint: "mutator_normalizers".to_string(),
                reason: format!(
                    "{} columns but {} normalizers",
                    self.column_ids.len(),
                    self.normalizer_ids.len()
                ),
            });
        }
        Ok(())
    }

    fn stub(id: EntityId) -> Self {
        Self {
            base: BaseModel::new(id),
            version: 0,
            name: String::new(),
            column_ids: Vec::new(),
            normalizer_ids: Vec::new(),
            is_system: false,
        }
    }
}

// ============================================================================
// ACCESS POLICY
// ============================================================================

/// Execution limits attached to an access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitThresholds {
    /// Surface a distinct error when the limit is hit instead of denying silently.
    pub announce_max_execution_failure: bool,
    /// Executions allowed per window; zero disables rate limiting.
    pub max_executions: i64,
    /// Window length in seconds.
    pub max_execution_duration_seconds: i64,
}

impl RateLimitThresholds {
    pub fn new(max_executions: i64, window_seconds: i64) -> Self {
        Self {
            announce_max_execution_failure: false,
            max_executions,
            max_execution_duration_seconds: window_seconds,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.max_executions > 0
    }

    pub fn validate(&self, config: &RateLimitConfig) -> Result<(), ValidationError> {
        if self.max_executions < 0 {
            return Err(ValidationError::InvalidValue {
                field: "max_executions".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        if !self.is_limited() {
            return Ok(());
        }
        if config.seconds_per_bucket <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "seconds_per_bucket".to_string(),
                reason: format!("{} must be positive", config.seconds_per_bucket),
            });
        }
        let window = self.max_execution_duration_seconds;
        if window < config.min_window_seconds || window > config.max_window_seconds {
            return Err(ValidationError::InvalidValue {
                field: "max_execution_duration_seconds".to_string(),
                reason: format!(
                    "{} must be between {} and {}",
                    window, config.min_window_seconds, config.max_window_seconds
                ),
            });
        }
        if window % config.seconds_per_bucket != 0 {
            return Err(ValidationError::InvalidValue {
                field: "max_execution_duration_seconds".to_string(),
                reason: format!("{} must be a multiple of {}", window, config.seconds_per_bucket),
            });
        }
        Ok(())
    }
}

/// Policy gating data access, carrying optional rate limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(flatten)]
    pub base: BaseModel,
    pub version: Version,
    pub name: String,
    pub thresholds: RateLimitThresholds,
}

impl AccessPolicy {
    pub fn new(name: impl Into<String>, thresholds: RateLimitThresholds) -> Self {
        Self {
            base: BaseModel::new(crate::new_entity_id()),
            version: 0,
            name: name.into(),
            thresholds,
        }
    }
}

impl StoredObject for AccessPolicy {
    const OBJECT_TYPE: ObjectType = ObjectType::AccessPolicy;
    const VERSIONED: bool = true;

    fn id(&self) -> EntityId {
        self.base.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn deleted(&self) -> Timestamp {
        self.base.deleted
    }

    fn set_deleted(&mut self, deleted: Timestamp) {
        self.base.deleted = deleted;
    }

    fn natural_key(&self) -> Vec<String> {
        if self.name.is_empty() {
            return Vec::new();
        }
        vec![self.name.to_lowercase()]
    }

    fn content_equals(&self, other: &Self) -> bool {
        self.base.id == other.base.id
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.thresholds == other.thresholds
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id("id", self.base.id)?;
        require_identifier("name", &self.name)?;
        self.thresholds.validate(&RateLimitConfig::default())
    }

    fn stub(id: EntityId) -> Self {
        Self {
            base: BaseModel::new(id),
            version: 0,
            name: String::new(),
            thresholds: RateLimitThresholds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_natural_key_is_lowercased() {
        let column = Column::new("Users", "Email", "string");
        assert_eq!(
            column.natural_key(),
            vec![Uuid::nil().to_string(), "users".to_string(), "email".to_string()]
        );
    }

    #[test]
    fn test_stub_has_no_natural_key() {
        let id = crate::new_entity_id();
        let stub = Accessor::stub(id);
        assert_eq!(stub.id(), id);
        assert!(stub.natural_key().is_empty());
        assert!(stub.is_alive());
    }

    #[test]
    fn test_content_equals_ignores_case_and_timestamps() {
        let a = Column::new("users", "email", "string");
        let mut b = a.clone();
        b.name = "EMAIL".to_string();
        b.base.updated = Utc::now();
        assert!(a.content_equals(&b));

        b.data_type = "uuid".to_string();
        assert!(!a.content_equals(&b));
    }

    #[test]
    fn test_column_validation() {
        assert!(Column::new("users", "email", "string").validate().is_ok());
        assert!(Column::new("users", "", "string").validate().is_err());
        assert!(Column::new("users", "1email", "string").validate().is_err());
        assert!(Column::new("users", "e-mail", "string").validate().is_err());
    }

    #[test]
    fn test_accessor_transformer_count_must_match() {
        let accessor = Accessor::new("reader", vec![crate::new_entity_id()], vec![]);
        assert!(matches!(
            accessor.validate(),
            Err(ValidationError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn test_unversioned_objects_ignore_set_version() {
        let mut column = Column::new("users", "email", "string");
        column.set_version(7);
        assert_eq!(column.version(), 0);
        assert!(!Column::VERSIONED);
        assert!(Accessor::VERSIONED);
    }

    #[test]
    fn test_threshold_validation() {
        let config = RateLimitConfig::default();
        assert!(RateLimitThresholds::new(3, 10).validate(&config).is_ok());
        assert!(RateLimitThresholds::new(3, 4).validate(&config).is_err());
        assert!(RateLimitThresholds::new(3, 61).validate(&config).is_err());
        assert!(RateLimitThresholds::new(-1, 10).validate(&config).is_err());
        // Unlimited thresholds skip window checks.
        assert!(RateLimitThresholds::new(0, 0).validate(&config).is_ok());
    }

    #[test]
    fn test_threshold_validation_rejects_zero_bucket() {
        let config = RateLimitConfig {
            seconds_per_bucket: 0,
            min_window_seconds: 0,
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            RateLimitThresholds::new(3, 10).validate(&config),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "seconds_per_bucket"
        ));
    }

    #[test]
    fn test_references_column() {
        let column_id = crate::new_entity_id();
        let mutator = Mutator::new("writer", vec![column_id], vec![PASSTHROUGH_NORMALIZER_ID]);
        assert!(mutator.references_column(column_id));
        assert!(!mutator.references_column(crate::new_entity_id()));
    }

    #[test]
    fn test_column_serde_flattens_base() {
        let column = Column::new("users", "email", "string");
        let json = serde_json::to_value(&column).expect("serialize");
        assert!(json.get("id").is_some());
        assert!(json.get("deleted").is_some());
        let back: Column = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, column);
    }
}
