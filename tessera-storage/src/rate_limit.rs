//! Sliding-window rate limiter over cache counters.
//!
//! The window is cut into fixed buckets of `seconds_per_bucket`. A reservation
//! at time `now` sums every bucket in `(now - window, now]` and, if the sum is
//! below the limit, increments the current bucket. Buckets expire with the
//! window, so a limiter never needs cleanup.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::{AccessPolicy, EntityId, RateLimitConfig, RateLimitThresholds, StoredObject, TesseraResult, Timestamp};
use uuid::Uuid;

use crate::cache::{CacheKey, CacheManager};

/// Who a limit is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitSubject {
    /// An authenticated subject.
    Subject(String),
    /// An unauthenticated connection.
    Connection(Uuid),
    /// Everyone at once.
    Global,
}

impl RateLimitSubject {
    /// Key segment; each variant has its own prefix so they never collide.
    pub fn key_segment(&self) -> String {
        match self {
            RateLimitSubject::Subject(id) => format!("sub-{id}"),
            RateLimitSubject::Connection(id) => format!("conn-{id}"),
            RateLimitSubject::Global => "global".to_string(),
        }
    }
}

/// One rate-limited thing: an entity, a subject and the limits that apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitItem {
    pub entity_id: EntityId,
    pub subject: RateLimitSubject,
    pub thresholds: RateLimitThresholds,
}

impl RateLimitItem {
    pub fn new(entity_id: EntityId, subject: RateLimitSubject, thresholds: RateLimitThresholds) -> Self {
        Self {
            entity_id,
            subject,
            thresholds,
        }
    }

    /// Limits of an access policy applied to `subject`.
    pub fn for_policy(policy: &AccessPolicy, subject: RateLimitSubject) -> Self {
        Self::new(policy.id(), subject, policy.thresholds)
    }
}

/// Reserves and releases executions against a shared cache.
pub struct RateLimiter {
    cache: Arc<CacheManager>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Fails when `config` has no usable bucket width or window bounds.
    pub fn new(cache: Arc<CacheManager>, config: RateLimitConfig) -> TesseraResult<Self> {
        config.validate()?;
        Ok(Self { cache, config })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Bucket keys covering `(now - window, now]`, oldest first.
    pub fn rate_limit_keys(&self, item: &RateLimitItem, now: Timestamp) -> Vec<CacheKey> {
        let per_bucket = self.config.seconds_per_bucket;
        let window = item.thresholds.max_execution_duration_seconds;
        let current = now.timestamp().div_euclid(per_bucket) * per_bucket;
        let subject = item.subject.key_segment();

        let mut keys = Vec::new();
        let mut bucket = current - window + per_bucket;
        while bucket <= current {
            keys.push(
                self.cache
                    .namespace()
                    .rate_limit_key(item.entity_id, &subject, bucket),
            );
            bucket += per_bucket;
        }
        keys
    }

    /// Try to admit one execution at `now`.
    ///
    /// Unlimited items are always admitted. Invalid thresholds are an error.
    /// When the cache is unavailable the execution is admitted and the
    /// failure logged.
    pub async fn reserve_slot(&self, item: &RateLimitItem, now: Timestamp) -> TesseraResult<bool> {
        if !item.thresholds.is_limited() {
            return Ok(true);
        }
        item.thresholds.validate(&self.config)?;

        let keys = self.rate_limit_keys(item, now);
        let window = window_ttl(&item.thresholds);
        match self
            .cache
            .provider()
            .reserve_rate_limit_slot(&keys, item.thresholds.max_executions, window)
            .await
        {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::info!(
                    entity_id = %item.entity_id,
                    subject = %item.subject.key_segment(),
                    max_executions = item.thresholds.max_executions,
                    announce = item.thresholds.announce_max_execution_failure,
                    "execution denied by rate limit"
                );
                Ok(false)
            }
            Err(e) => {
                self.cache.log_failure("reserve_rate_limit_slot", &e);
                Ok(true)
            }
        }
    }

    /// Give back one execution reserved within the current window.
    pub async fn release_slot(&self, item: &RateLimitItem, now: Timestamp) -> TesseraResult<bool> {
        if !item.thresholds.is_limited() {
            return Ok(false);
        }
        item.thresholds.validate(&self.config)?;

        let keys = self.rate_limit_keys(item, now);
        match self.cache.provider().release_rate_limit_slot(&keys).await {
            Ok(released) => Ok(released),
            Err(e) => {
                self.cache.log_failure("release_rate_limit_slot", &e);
                Ok(false)
            }
        }
    }
}

fn window_ttl(thresholds: &RateLimitThresholds) -> Duration {
    Duration::from_secs(u64::try_from(thresholds.max_execution_duration_seconds).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryProvider, KeyNamespace};
    use chrono::{DateTime, Utc};
    use tessera_core::{CacheConfig, TesseraError};

    fn cache() -> Arc<CacheManager> {
        let config = CacheConfig::for_tests();
        Arc::new(CacheManager::new(
            Arc::new(InMemoryProvider::new(&config)),
            KeyNamespace::new(Uuid::from_u128(21)),
            config,
        ))
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(cache(), RateLimitConfig::default()).expect("default config is valid")
    }

    fn at(seconds: i64) -> Timestamp {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + seconds, 0).expect("valid timestamp")
    }

    fn item(max: i64, window: i64) -> RateLimitItem {
        RateLimitItem::new(
            Uuid::now_v7(),
            RateLimitSubject::Subject("alice".into()),
            RateLimitThresholds::new(max, window),
        )
    }

    #[test]
    fn test_keys_cover_window() {
        let limiter = limiter();
        let item = item(3, 10);
        let keys = limiter.rate_limit_keys(&item, at(0));
        assert_eq!(keys.len(), 10);
        assert!(keys[9].as_str().ends_with(&format!("_{}", at(0).timestamp())));
        assert!(keys[0].as_str().ends_with(&format!("_{}", at(-9).timestamp())));
    }

    #[test]
    fn test_subjects_do_not_collide() {
        let segments = [
            RateLimitSubject::Subject("global".into()).key_segment(),
            RateLimitSubject::Connection(Uuid::nil()).key_segment(),
            RateLimitSubject::Global.key_segment(),
        ];
        assert_ne!(segments[0], segments[2]);
        assert_ne!(segments[1], segments[2]);
    }

    #[tokio::test]
    async fn test_fourth_reservation_in_window_fails() {
        let limiter = limiter();
        let item = item(3, 10);
        for t in 0..3 {
            assert!(limiter.reserve_slot(&item, at(t)).await.expect("reserve"));
        }
        assert!(!limiter.reserve_slot(&item, at(3)).await.expect("reserve"));
        // The reservation at t=0 has left the window.
        assert!(limiter.reserve_slot(&item, at(10)).await.expect("reserve"));
    }

    #[tokio::test]
    async fn test_spaced_reservations_always_succeed() {
        let limiter = limiter();
        let item = item(1, 10);
        for i in 0..5 {
            assert!(limiter.reserve_slot(&item, at(i * 10)).await.expect("reserve"));
        }
    }

    #[tokio::test]
    async fn test_release_frees_a_slot() {
        let limiter = limiter();
        let item = item(1, 5);
        assert!(limiter.reserve_slot(&item, at(0)).await.expect("reserve"));
        assert!(!limiter.reserve_slot(&item, at(1)).await.expect("reserve"));
        assert!(limiter.release_slot(&item, at(1)).await.expect("release"));
        assert!(limiter.reserve_slot(&item, at(2)).await.expect("reserve"));
    }

    #[tokio::test]
    async fn test_unlimited_and_invalid_thresholds() {
        let limiter = limiter();
        assert!(limiter.reserve_slot(&item(0, 0), at(0)).await.expect("reserve"));

        let err = limiter
            .reserve_slot(&item(3, 61), at(0))
            .await
            .expect_err("window too long");
        assert!(matches!(err, TesseraError::Validation(_)));
    }

    #[test]
    fn test_zero_bucket_config_is_rejected() {
        let config = RateLimitConfig {
            seconds_per_bucket: 0,
            min_window_seconds: 0,
            ..RateLimitConfig::default()
        };
        let result = RateLimiter::new(cache(), config);
        assert!(matches!(result, Err(TesseraError::Config(_))));
    }
}
