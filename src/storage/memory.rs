//! In-memory content store.
//!
//! Backs tests and the built-in basic content layer. State lives in a
//! nested map guarded by a read/write lock.

use super::{ContentStore, StoreMetadata};
use anyhow::Result;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// A content store that never touches disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    metadata: RwLock<StoreMetadata>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with metadata.
    pub fn with_metadata(md: StoreMetadata) -> Self {
        let s = Self::new();
        *s.metadata.write() = md;
        s
    }
}

impl ContentStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    fn sub_prefixes(&self) -> Result<Vec<String>> {
        Ok(self.sections.read().keys().cloned().collect())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .sections
            .read()
            .get(prefix)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load(&self, prefix: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .sections
            .read()
            .get(prefix)
            .and_then(|s| s.get(key))
            .cloned())
    }

    fn save(&self, prefix: &str, key: &str, value: &Value) -> Result<()> {
        self.sections
            .write()
            .entry(prefix.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, prefix: &str, key: &str) -> Result<bool> {
        Ok(self
            .sections
            .write()
            .get_mut(prefix)
            .map(|s| s.remove(key).is_some())
            .unwrap_or(false))
    }

    fn metadata(&self) -> StoreMetadata {
        self.metadata.read().clone()
    }

    fn set_metadata(&mut self, md: StoreMetadata) -> Result<()> {
        *self.metadata.write() = md;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn crud_and_key_listing() {
        let s = MemoryStore::new();
        s.save("machines", "a", &json!({"Name": "a"})).unwrap();
        s.save("machines", "b", &json!({"Name": "b"})).unwrap();
        assert_eq!(s.keys("machines").unwrap(), vec!["a", "b"]);
        assert_eq!(s.load("machines", "a").unwrap().unwrap()["Name"], "a");
        assert!(s.remove("machines", "a").unwrap());
        assert!(!s.remove("machines", "a").unwrap());
        assert!(s.load("machines", "a").unwrap().is_none());
    }
}
