//! Results of look-aside cache reads.
//!
//! A lookup never hides why it missed: callers get the sentinel that occupied
//! the slot (a tombstone means "recently changed, go to the leader") and the
//! read sentinel they now hold, if any, for a later populate.

use crate::store::ReadMode;

use super::sentinel::Sentinel;

/// Outcome of reading one cached item.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
    /// The cached value on a hit.
    pub item: Option<T>,
    /// Sentinel found in place of data, `Tombstone` when the item is dirty.
    pub conflict: Sentinel,
    /// Read sentinel claimed by this lookup; present it to populate.
    pub sentinel: Sentinel,
}

impl<T> Default for CacheLookup<T> {
    fn default() -> Self {
        Self::miss()
    }
}

impl<T> CacheLookup<T> {
    /// A plain miss that claimed nothing.
    pub fn miss() -> Self {
        Self {
            item: None,
            conflict: Sentinel::NoLock,
            sentinel: Sentinel::NoLock,
        }
    }

    pub fn hit(item: T) -> Self {
        Self {
            item: Some(item),
            conflict: Sentinel::NoLock,
            sentinel: Sentinel::NoLock,
        }
    }

    /// A miss forced by a tombstone.
    pub fn dirty(sentinel: Sentinel) -> Self {
        Self {
            item: None,
            conflict: Sentinel::Tombstone,
            sentinel,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.item.is_some()
    }

    /// True when the key was recently modified or deleted.
    pub fn is_dirty(&self) -> bool {
        self.conflict.is_tombstone()
    }

    /// Where the primary-store fallback must read from.
    pub fn read_mode(&self) -> ReadMode {
        if self.is_dirty() {
            ReadMode::Leader
        } else {
            ReadMode::Replica
        }
    }

    pub fn into_item(self) -> Option<T> {
        self.item
    }

    pub fn map<U, F>(self, f: F) -> CacheLookup<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheLookup {
            item: self.item.map(f),
            conflict: self.conflict,
            sentinel: self.sentinel,
        }
    }
}

/// Outcome of reading several items in one round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLookup<T> {
    /// One entry per requested id, in request order.
    pub items: Vec<Option<T>>,
    /// Read sentinel claimed for each missed item, `NoLock` elsewhere.
    pub sentinels: Vec<Sentinel>,
    /// True when any requested item was dirty.
    pub dirty: bool,
}

impl<T> BatchLookup<T> {
    pub fn empty(len: usize) -> Self {
        Self {
            items: std::iter::repeat_with(|| None).take(len).collect(),
            sentinels: vec![Sentinel::NoLock; len],
            dirty: false,
        }
    }

    /// Sentinel to present when populating the item at `index`.
    pub fn sentinel(&self, index: usize) -> Sentinel {
        self.sentinels.get(index).copied().unwrap_or(Sentinel::NoLock)
    }

    pub fn read_mode(&self) -> ReadMode {
        if self.dirty {
            ReadMode::Leader
        } else {
            ReadMode::Replica
        }
    }

    pub fn all_hit(&self) -> bool {
        self.items.iter().all(Option::is_some)
    }
}
