//! Multi-prefix locking.
//!
//! Operations declare the set of prefixes they touch. The registry
//! acquires the matching per-prefix mutexes in canonical
//! (lexicographic) order so two operations can never deadlock, and
//! hands back a [`LockedStores`] view restricted to exactly the
//! declared prefixes. All locks release together when the view drops.
//!
//! Nested acquisition is not permitted: an operation takes one lock
//! set for its whole duration. Hooks that need more prefixes than
//! their caller declared are a bug in the lock tables, not a reason
//! to re-lock.

use crate::tracker::cache::PrefixCache;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;

/// Owner of the per-prefix mutexes.
pub struct LockRegistry {
    locks: BTreeMap<&'static str, Mutex<PrefixCache>>,
}

impl LockRegistry {
    /// Create a registry with one empty cache per prefix.
    pub fn new(prefixes: &[&'static str]) -> Self {
        let locks = prefixes
            .iter()
            .map(|p| (*p, Mutex::new(PrefixCache::new(p))))
            .collect();
        Self { locks }
    }

    /// Acquire the given prefixes in canonical order.
    ///
    /// The request list may be in any order and may contain
    /// duplicates; acquisition always happens sorted and deduplicated.
    pub fn lock(&self, prefixes: &[&'static str]) -> LockedStores<'_> {
        let mut wanted: Vec<&'static str> = prefixes.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let mut guards = Vec::with_capacity(wanted.len());
        for p in wanted {
            let m = self
                .locks
                .get(p)
                .unwrap_or_else(|| panic!("no such prefix {p}"));
            guards.push((p, m.lock()));
        }
        LockedStores { guards }
    }

    /// Acquire every prefix (reload, boot validation).
    pub fn lock_all(&self) -> LockedStores<'_> {
        let all: Vec<&'static str> = self.locks.keys().copied().collect();
        self.lock(&all)
    }
}

/// The locked view an operation works through.
///
/// Only the declared prefixes are reachable; asking for anything else
/// is a lock-table bug and panics.
pub struct LockedStores<'a> {
    // Sorted by prefix; doubles as the acquisition-order record.
    guards: Vec<(&'static str, MutexGuard<'a, PrefixCache>)>,
}

impl LockedStores<'_> {
    /// The prefixes held, in acquisition order.
    pub fn prefixes(&self) -> Vec<&'static str> {
        self.guards.iter().map(|(p, _)| *p).collect()
    }

    /// Whether a prefix is part of this lock set.
    pub fn has(&self, prefix: &str) -> bool {
        self.guards.iter().any(|(p, _)| *p == prefix)
    }

    /// The cache for a locked prefix.
    pub fn store(&self, prefix: &str) -> &PrefixCache {
        self.guards
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, g)| &**g)
            .unwrap_or_else(|| panic!("prefix {prefix} not in lock set"))
    }

    /// The cache for a locked prefix, mutably.
    pub fn store_mut(&mut self, prefix: &str) -> &mut PrefixCache {
        self.guards
            .iter_mut()
            .find(|(p, _)| *p == prefix)
            .map(|(_, g)| &mut **g)
            .unwrap_or_else(|| panic!("prefix {prefix} not in lock set"))
    }
}
