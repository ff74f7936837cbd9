//! Configuration types

use crate::{ConfigError, TenantId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for cached objects.
    pub object_ttl: Duration,
    /// TTL for cached complete collections.
    pub collection_ttl: Duration,
    /// How long an in-flight lock sentinel occupies a slot before it expires.
    pub sentinel_ttl: Duration,
    /// How long a tombstone forces primary-store reads for a key.
    pub tombstone_ttl: Duration,
    /// Delay between publishing an invalidation to other local tiers and
    /// returning to the writer.
    pub invalidation_delay: Duration,
    /// TTL for entries held in a process-local tier.
    pub local_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            object_ttl: Duration::from_secs(300),
            collection_ttl: Duration::from_secs(300),
            sentinel_ttl: Duration::from_secs(70),
            tombstone_ttl: Duration::from_secs(5),
            invalidation_delay: Duration::from_millis(50),
            local_ttl: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for test and CI universes: invalidation is effectively immediate.
    pub fn for_tests() -> Self {
        Self::default().with_invalidation_delay(Duration::from_millis(1))
    }

    /// Set the object TTL.
    pub fn with_object_ttl(mut self, ttl: Duration) -> Self {
        self.object_ttl = ttl;
        self
    }

    /// Set the collection TTL.
    pub fn with_collection_ttl(mut self, ttl: Duration) -> Self {
        self.collection_ttl = ttl;
        self
    }

    /// Set the sentinel TTL.
    pub fn with_sentinel_ttl(mut self, ttl: Duration) -> Self {
        self.sentinel_ttl = ttl;
        self
    }

    /// Set the tombstone TTL.
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Set the invalidation delay.
    pub fn with_invalidation_delay(mut self, delay: Duration) -> Self {
        self.invalidation_delay = delay;
        self
    }

    /// Set the local tier TTL.
    pub fn with_local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = ttl;
        self
    }

    /// Validate the timing relationships.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("object_ttl", self.object_ttl),
            ("collection_ttl", self.collection_ttl),
            ("sentinel_ttl", self.sentinel_ttl),
            ("tombstone_ttl", self.tombstone_ttl),
            ("local_ttl", self.local_ttl),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: "must be positive".to_string(),
                });
            }
        }
        if self.tombstone_ttl > self.sentinel_ttl {
            return Err(ConfigError::InvalidValue {
                field: "tombstone_ttl".to_string(),
                value: format!("{:?}", self.tombstone_ttl),
                reason: "must not exceed sentinel_ttl".to_string(),
            });
        }
        Ok(())
    }
}

/// Sliding-window rate limit granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub seconds_per_bucket: i64,
    pub min_window_seconds: i64,
    pub max_window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            seconds_per_bucket: 1,
            min_window_seconds: 5,
            max_window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seconds_per_bucket <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "seconds_per_bucket".to_string(),
                value: self.seconds_per_bucket.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.min_window_seconds < self.seconds_per_bucket
            || self.max_window_seconds < self.min_window_seconds
        {
            return Err(ConfigError::InvalidValue {
                field: "window".to_string(),
                value: format!("{}..{}", self.min_window_seconds, self.max_window_seconds),
                reason: "window bounds must be ordered and at least one bucket".to_string(),
            });
        }
        Ok(())
    }
}

/// Retry ceiling for optimistic convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// Master configuration for one tenant's object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
}

impl StoreConfig {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            convergence: ConvergenceConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant_id.is_nil() {
            return Err(ConfigError::MissingRequired {
                field: "tenant_id".to_string(),
            });
        }
        self.cache.validate()?;
        self.rate_limit.validate()
    }
}
