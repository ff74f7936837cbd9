//! Slot contents shared by the concrete providers.

use super::key::CacheKey;
use super::sentinel::{LockType, Sentinel, SentinelToken};

const TAG_DATA: u8 = 0;
const TAG_TOMBSTONE: u8 = 1;
const TAG_TOKEN: u8 = 2;
const TAG_COUNTER: u8 = 3;
const TAG_DEPENDENTS: u8 = 4;

/// What a single cache slot holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Data(String),
    /// Never `Sentinel::NoLock`.
    Sentinel(Sentinel),
    Counter(i64),
    /// Keys to drop when the item owning this slot changes.
    Dependents(Vec<CacheKey>),
}

impl Slot {
    /// The sentinel occupying the slot, or `NoLock` when it holds data.
    pub(crate) fn sentinel(&self) -> Sentinel {
        match self {
            Slot::Sentinel(s) => *s,
            _ => Sentinel::NoLock,
        }
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Sentinel(Sentinel::Tombstone))
    }

    pub(crate) fn is_token(&self) -> bool {
        matches!(self, Slot::Sentinel(Sentinel::Token(_)))
    }

    /// True while a writer's create, update or delete token fences the slot.
    pub(crate) fn is_write_token(&self) -> bool {
        matches!(self, Slot::Sentinel(Sentinel::Token(token)) if token.lock_type().is_write())
    }

    pub(crate) fn holds(&self, sentinel: &Sentinel) -> bool {
        matches!(self, Slot::Sentinel(s) if s == sentinel)
    }

    pub(crate) fn counter_value(&self) -> i64 {
        match self {
            Slot::Counter(n) => *n,
            Slot::Data(s) => s.parse().unwrap_or(0),
            Slot::Sentinel(_) | Slot::Dependents(_) => 0,
        }
    }

    /// Data payload as seen by readers. Counters read back as their decimal value.
    pub(crate) fn value(&self) -> Option<String> {
        match self {
            Slot::Data(s) => Some(s.clone()),
            Slot::Counter(n) => Some(n.to_string()),
            Slot::Sentinel(_) | Slot::Dependents(_) => None,
        }
    }

    /// Binary layout: `[expires_at_ms: i64 LE][tag: u8][payload]`.
    pub(crate) fn encode(&self, expires_at_ms: i64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(9 + 32);
        bytes.extend_from_slice(&expires_at_ms.to_le_bytes());
        match self {
            Slot::Data(s) => {
                bytes.push(TAG_DATA);
                bytes.extend_from_slice(s.as_bytes());
            }
            Slot::Sentinel(Sentinel::Token(token)) => {
                bytes.push(TAG_TOKEN);
                bytes.extend_from_slice(&token.to_bytes());
            }
            Slot::Sentinel(_) => bytes.push(TAG_TOMBSTONE),
            Slot::Counter(n) => {
                bytes.push(TAG_COUNTER);
                bytes.extend_from_slice(&n.to_le_bytes());
            }
            Slot::Dependents(keys) => {
                bytes.push(TAG_DEPENDENTS);
                for key in keys {
                    let raw = key.as_str().as_bytes();
                    bytes.extend_from_slice(&(raw.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(raw);
                }
            }
        }
        bytes
    }

    pub(crate) fn decode(bytes: &[u8]) -> Option<(Slot, i64)> {
        if bytes.len() < 9 {
            return None;
        }
        let expires_at_ms = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let payload = &bytes[9..];
        let slot = match bytes[8] {
            TAG_DATA => Slot::Data(String::from_utf8(payload.to_vec()).ok()?),
            TAG_TOMBSTONE => Slot::Sentinel(Sentinel::Tombstone),
            TAG_TOKEN => Slot::Sentinel(Sentinel::Token(SentinelToken::from_bytes(payload)?)),
            TAG_COUNTER => Slot::Counter(i64::from_le_bytes(payload.try_into().ok()?)),
            TAG_DEPENDENTS => Slot::Dependents(decode_keys(payload)?),
            _ => return None,
        };
        Some((slot, expires_at_ms))
    }
}

/// Length-prefixed keys, as written by [`Slot::encode`].
fn decode_keys(mut payload: &[u8]) -> Option<Vec<CacheKey>> {
    let mut keys = Vec::new();
    while !payload.is_empty() {
        let len = u32::from_le_bytes(payload.get(..4)?.try_into().ok()?) as usize;
        let raw = payload.get(4..4 + len)?;
        keys.push(CacheKey::from_encoded(String::from_utf8(raw.to_vec()).ok()?));
        payload = &payload[4 + len..];
    }
    Some(keys)
}

/// Merge `added` into a dependency list, keeping the survivors of `existing`
/// first and dropping duplicates.
pub(crate) fn merge_dependents(existing: Vec<CacheKey>, added: &[CacheKey]) -> Vec<CacheKey> {
    let mut merged = existing;
    for key in added {
        if !merged.contains(key) {
            merged.push(key.clone());
        }
    }
    merged
}

/// What a lock request does to a slot it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockAction {
    Write,
    /// Keep the tombstone but push its expiry out.
    RefreshTombstone,
    Skip,
}

/// Precedence rules for writing a sentinel of type `incoming` over `current`.
///
/// Reads only claim empty slots. Creates and updates overwrite data and other
/// in-flight tokens (last acquisition wins) but never a tombstone. Deletes
/// overwrite everything.
pub(crate) fn lock_action(incoming: LockType, current: Option<&Slot>) -> LockAction {
    match incoming {
        LockType::Read => match current {
            None => LockAction::Write,
            Some(_) => LockAction::Skip,
        },
        LockType::Create | LockType::Update => match current {
            Some(Slot::Sentinel(Sentinel::Tombstone)) => LockAction::RefreshTombstone,
            _ => LockAction::Write,
        },
        LockType::Delete => LockAction::Write,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(lock: LockType) -> Slot {
        Slot::Sentinel(Sentinel::Token(SentinelToken::mint(lock)))
    }

    #[test]
    fn test_read_only_claims_empty_slots() {
        assert_eq!(lock_action(LockType::Read, None), LockAction::Write);
        assert_eq!(
            lock_action(LockType::Read, Some(&Slot::Data("x".into()))),
            LockAction::Skip
        );
        assert_eq!(
            lock_action(LockType::Read, Some(&token(LockType::Read))),
            LockAction::Skip
        );
    }

    #[test]
    fn test_update_respects_tombstone() {
        let tomb = Slot::Sentinel(Sentinel::Tombstone);
        assert_eq!(
            lock_action(LockType::Update, Some(&tomb)),
            LockAction::RefreshTombstone
        );
        assert_eq!(
            lock_action(LockType::Create, Some(&tomb)),
            LockAction::RefreshTombstone
        );
        assert_eq!(
            lock_action(LockType::Update, Some(&token(LockType::Update))),
            LockAction::Write
        );
    }

    #[test]
    fn test_delete_overwrites_everything() {
        for current in [
            None,
            Some(Slot::Data("x".into())),
            Some(Slot::Sentinel(Sentinel::Tombstone)),
            Some(token(LockType::Update)),
        ] {
            assert_eq!(lock_action(LockType::Delete, current.as_ref()), LockAction::Write);
        }
    }

    #[test]
    fn test_slot_bytes() {
        let slots = [
            Slot::Data("{\"a\":1}".into()),
            Slot::Sentinel(Sentinel::Tombstone),
            token(LockType::Delete),
            Slot::Counter(-4),
            Slot::Dependents(Vec::new()),
            Slot::Dependents(vec![
                CacheKey::from_encoded("tessera:t:col:id:1"),
                CacheKey::from_encoded("tessera:t:col:name:1:x"),
            ]),
        ];
        for slot in slots {
            let (decoded, expiry) = Slot::decode(&slot.encode(1234)).expect("decode should succeed");
            assert_eq!(decoded, slot);
            assert_eq!(expiry, 1234);
        }
        assert!(Slot::decode(&[0u8; 4]).is_none());

        // A truncated key list is unreadable, not silently shortened.
        let mut bytes = Slot::Dependents(vec![CacheKey::from_encoded("abc")]).encode(0);
        bytes.pop();
        assert!(Slot::decode(&bytes).is_none());
    }

    #[test]
    fn test_merge_dependents_keeps_order_without_duplicates() {
        let a = CacheKey::from_encoded("a");
        let b = CacheKey::from_encoded("b");
        let c = CacheKey::from_encoded("c");
        let merged = merge_dependents(vec![a.clone(), b.clone()], &[b.clone(), c.clone(), c.clone()]);
        assert_eq!(merged, vec![a, b, c]);
    }

    #[test]
    fn test_only_writer_tokens_fence_dependents() {
        assert!(token(LockType::Update).is_write_token());
        assert!(!token(LockType::Read).is_write_token());
        assert!(!Slot::Sentinel(Sentinel::Tombstone).is_write_token());
        assert!(Slot::Dependents(Vec::new()).value().is_none());
    }

    #[test]
    fn test_counter_reads_as_value() {
        assert_eq!(Slot::Counter(3).value(), Some("3".to_string()));
        assert_eq!(Slot::Data("5".into()).counter_value(), 5);
        assert_eq!(Slot::Sentinel(Sentinel::Tombstone).value(), None);
    }
}
