//! Tenant-scoped cache key namespace.
//!
//! A `CacheKey` can only be produced by a `KeyNamespace`, and a namespace
//! cannot be built without a tenant ID. Every key therefore starts with the
//! tenant prefix, which keeps tenants isolated inside a shared backend.
//!
//! # Format
//!
//! ```text
//! tessera:<tenant>:<type>:id:<uuid>                 primary
//! tessera:<tenant>:<type>:name:<n>:<c1>/<c2>/...    secondary (n components, lowercased)
//! tessera:<tenant>:<type>:all                       collection
//! tessera:<tenant>:<type>:pages                     cursor pages of a type
//! tessera:<tenant>:<type>:page:<after>:<limit>      one cursor page
//! tessera:<tenant>:<type>:deps:<uuid>               keys derived from one object
//! tessera:<tenant>:<type>:static:<name>             other static keys
//! tessera:<tenant>:ratelimit:<entity>_<subject>_<bucket>
//! <any key>:ismod                                   is-modified companion
//! ```
//!
//! Components are percent-escaped so that `:` and `/` inside a name can never
//! make two distinct identities collide. The component count keeps an empty
//! list apart from a list holding one empty component.

use std::fmt;

use tessera_core::{EntityId, ObjectType, TenantId};

const KEY_PREFIX: &str = "tessera";
const IS_MODIFIED_SUFFIX: &str = ":ismod";

/// A fully derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: String,
}

impl CacheKey {
    /// Rebuild a key read back from a backend that stores raw strings.
    pub(crate) fn from_encoded(encoded: impl Into<String>) -> Self {
        Self {
            inner: encoded.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// The companion key holding the freshness marker for this key.
    pub fn is_modified(&self) -> CacheKey {
        CacheKey {
            inner: format!("{}{}", self.inner, IS_MODIFIED_SUFFIX),
        }
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.inner.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Derives every cache key for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    tenant_id: TenantId,
    prefix: String,
}

impl KeyNamespace {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            prefix: format!("{}:{}:", KEY_PREFIX, tenant_id),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Prefix shared by every key of this tenant, for flushing.
    pub fn tenant_prefix(&self) -> &str {
        &self.prefix
    }

    /// Primary key: one object by ID.
    pub fn object_key(&self, object_type: ObjectType, id: EntityId) -> CacheKey {
        self.key(format!("{}:id:{}", object_type.key_prefix(), id))
    }

    /// Secondary key for a single case-insensitive name.
    pub fn name_key(&self, object_type: ObjectType, name: &str) -> CacheKey {
        self.components_key(object_type, &[name])
    }

    /// Secondary key for a multi-component natural name, e.g. database + table + column.
    pub fn components_key<S: AsRef<str>>(&self, object_type: ObjectType, components: &[S]) -> CacheKey {
        let joined = components
            .iter()
            .map(|c| escape(&c.as_ref().to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        self.key(format!("{}:name:{}:{}", object_type.key_prefix(), components.len(), joined))
    }

    /// The key holding the complete alive set of a type.
    pub fn collection_key(&self, object_type: ObjectType) -> CacheKey {
        self.key(format!("{}:all", object_type.key_prefix()))
    }

    /// Dependency list of every cached cursor page of a type.
    pub fn collection_pages_key(&self, object_type: ObjectType) -> CacheKey {
        self.key(format!("{}:pages", object_type.key_prefix()))
    }

    /// One cursor page. The first page has an empty cursor.
    pub fn page_key(&self, object_type: ObjectType, limit: usize, starting_after: Option<EntityId>) -> CacheKey {
        let after = starting_after.map(|id| id.to_string()).unwrap_or_default();
        self.key(format!("{}:page:{}:{}", object_type.key_prefix(), after, limit))
    }

    /// Dependency list of one object: keys to drop when it changes.
    pub fn dependencies_key(&self, object_type: ObjectType, id: EntityId) -> CacheKey {
        self.key(format!("{}:deps:{}", object_type.key_prefix(), id))
    }

    /// Any other fixed key of a type.
    pub fn static_key(&self, object_type: ObjectType, name: &str) -> CacheKey {
        self.key(format!("{}:static:{}", object_type.key_prefix(), escape(name)))
    }

    /// One time bucket of a rate-limit counter.
    pub fn rate_limit_key(&self, entity_id: EntityId, subject: &str, bucket: i64) -> CacheKey {
        self.key(format!("ratelimit:{}_{}_{}", entity_id, escape(subject), bucket))
    }

    fn key(&self, rest: String) -> CacheKey {
        CacheKey {
            inner: format!("{}{}", self.prefix, rest),
        }
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            other => out.push(other),
        }
    }
    out
}
