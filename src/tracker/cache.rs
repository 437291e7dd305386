//! Per-prefix entity cache.
//!
//! Entities live in an array kept strictly sorted by key, so lookups
//! and key-range subsetting are binary searches. Secondary-index
//! queries sort a copy of the array by the index projection and
//! binary-search the bounds. Everything returned to callers outside
//! the tracker is a copy; the cached array is only mutated by the
//! tracker under the prefix lock.

use crate::models::Entity;
use crate::tracker::index::{Index, IndexValue};

/// A range predicate over one secondary index.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(IndexValue),
    Lt(IndexValue),
    Lte(IndexValue),
    Gt(IndexValue),
    Gte(IndexValue),
    /// Closed interval `[a, b]`.
    Between(IndexValue, IndexValue),
    /// Everything outside the closed interval `[a, b]`.
    Except(IndexValue, IndexValue),
}

/// The sorted entity array for one prefix.
#[derive(Debug)]
pub struct PrefixCache {
    prefix: &'static str,
    items: Vec<Entity>,
}

impl PrefixCache {
    /// Create an empty cache for a prefix.
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            items: Vec::new(),
        }
    }

    /// The prefix this cache holds.
    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The sorted slice of cached entities.
    pub fn items(&self) -> &[Entity] {
        &self.items
    }

    fn position(&self, key: &str) -> Result<usize, usize> {
        self.items.binary_search_by(|e| e.key().as_str().cmp(key))
    }

    /// Borrow an entity by key.
    pub fn find(&self, key: &str) -> Option<&Entity> {
        self.position(key).ok().map(|i| &self.items[i])
    }

    /// Insert or replace, keeping the array sorted.
    pub(crate) fn insert(&mut self, ent: Entity) {
        let key = ent.key();
        match self.position(&key) {
            Ok(i) => self.items[i] = ent,
            Err(i) => self.items.insert(i, ent),
        }
    }

    /// Remove by key.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Entity> {
        match self.position(key) {
            Ok(i) => Some(self.items.remove(i)),
            Err(_) => None,
        }
    }

    /// Replace the whole array (reload). The input is sorted here.
    pub(crate) fn replace_all(&mut self, mut items: Vec<Entity>) {
        items.sort_by_key(|e| e.key());
        self.items = items;
    }

    /// Copy out the entities whose keys fall in `[lower, upper)`.
    pub fn subset(&self, lower: &str, upper: &str) -> Vec<Entity> {
        let lo = self.items.partition_point(|e| e.key().as_str() < lower);
        let hi = self.items.partition_point(|e| e.key().as_str() < upper);
        self.items[lo..hi].to_vec()
    }

    /// Copy out the entities matching a predicate over a secondary
    /// index, in that index's order.
    pub fn range_by(&self, index: &Index, pred: &Predicate) -> Vec<Entity> {
        let mut sorted: Vec<&Entity> = self.items.iter().collect();
        sorted.sort_by(|a, b| (index.key_of)(a).cmp(&(index.key_of)(b)));

        let lower = |bound: &IndexValue| sorted.partition_point(|e| (index.key_of)(e) < *bound);
        let upper = |bound: &IndexValue| sorted.partition_point(|e| (index.key_of)(e) <= *bound);

        let picked: Vec<&Entity> = match pred {
            Predicate::Eq(v) => sorted[lower(v)..upper(v)].to_vec(),
            Predicate::Lt(v) => sorted[..lower(v)].to_vec(),
            Predicate::Lte(v) => sorted[..upper(v)].to_vec(),
            Predicate::Gt(v) => sorted[upper(v)..].to_vec(),
            Predicate::Gte(v) => sorted[lower(v)..].to_vec(),
            Predicate::Between(a, b) => sorted[lower(a)..upper(b)].to_vec(),
            Predicate::Except(a, b) => {
                let mut out = sorted[..lower(a)].to_vec();
                out.extend_from_slice(&sorted[upper(b)..]);
                out
            }
        };
        picked.into_iter().cloned().collect()
    }

    /// Instrumentation: whether the array is strictly ordered by key.
    pub fn is_strictly_sorted(&self) -> bool {
        self.items.windows(2).all(|w| w[0].key() < w[1].key())
    }
}
