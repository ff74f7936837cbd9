//! Invalidation broadcast between process-local cache tiers.
//!
//! Every layered provider publishes the keys it changed in the shared tier and
//! drops the same keys from its own local tier when another provider publishes.
//! Sequence numbers increase monotonically per bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::key::CacheKey;

const DEFAULT_CAPACITY: usize = 1024;

/// What an invalidation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    Keys(Vec<CacheKey>),
    /// Everything starting with the prefix; the empty prefix drops everything.
    Prefix(String),
}

/// One published invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// Provider that made the change; it has already updated its own tier.
    pub origin: Uuid,
    pub sequence: u64,
    pub scope: InvalidationScope,
}

/// Fan-out channel connecting the local tiers of every process sharing a tier.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<Invalidation>,
    sequence: Arc<AtomicU64>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.sender.subscribe()
    }

    /// Publish a change. Returns its sequence number.
    pub fn publish(&self, origin: Uuid, scope: InvalidationScope) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        // No subscribers is not an error: nobody holds a local copy.
        let _ = self.sender.send(Invalidation {
            origin,
            sequence,
            scope,
        });
        sequence
    }

    /// Sequence number of the latest publish, zero if none.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::KeyNamespace;
    use tessera_core::ObjectType;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let bus = InvalidationBus::default();
        let mut rx = bus.subscribe();
        let ns = KeyNamespace::new(Uuid::from_u128(1));
        let origin = Uuid::now_v7();

        let key = ns.collection_key(ObjectType::Column);
        assert_eq!(bus.publish(origin, InvalidationScope::Keys(vec![key.clone()])), 1);
        assert_eq!(bus.publish(origin, InvalidationScope::Prefix("x".into())), 2);

        let first = rx.recv().await.expect("first message");
        assert_eq!(first.sequence, 1);
        assert_eq!(first.scope, InvalidationScope::Keys(vec![key]));
        let second = rx.recv().await.expect("second message");
        assert_eq!(second.sequence, 2);
        assert_eq!(bus.last_sequence(), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = InvalidationBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(Uuid::nil(), InvalidationScope::Prefix(String::new())), 1);
    }
}
