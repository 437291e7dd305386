//! Layered content stack.
//!
//! The stack composes several content stores into one view. Exactly
//! one layer is writable; every mutation lands there. Reads search the
//! layers in order and the first hit wins, so user-written objects
//! shadow curated content, curated SAAS content shadows the default
//! content, and the built-in basic content sits underneath everything.
//!
//! Search order:
//! 1. writable backing store
//! 2. local override store
//! 3. SAAS content stores, sorted by name (required layers)
//! 4. default content store
//! 5. plugin content stores, sorted by name (required layers)
//! 6. built-in basic content
//!
//! Replacing or removing a layer rebuilds the composed view; the
//! displaced store is handed back so the caller can dispose of it with
//! [`super::clean_up_store`] once the rebuilt view validates.

use super::{ContentStore, StoreMetadata};
use crate::core::error::ModelError;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// The layered content stack.
pub struct DataStack {
    writable: Box<dyn ContentStore>,
    local: Option<Box<dyn ContentStore>>,
    saas: BTreeMap<String, Box<dyn ContentStore>>,
    default_content: Option<Box<dyn ContentStore>>,
    plugins: BTreeMap<String, Box<dyn ContentStore>>,
    basic: Box<dyn ContentStore>,
}

impl DataStack {
    /// Assemble a stack from its parts.
    pub fn new(
        writable: Box<dyn ContentStore>,
        local: Option<Box<dyn ContentStore>>,
        default_content: Option<Box<dyn ContentStore>>,
        basic: Box<dyn ContentStore>,
    ) -> Self {
        Self {
            writable,
            local,
            saas: BTreeMap::new(),
            default_content,
            plugins: BTreeMap::new(),
            basic,
        }
    }

    fn layers(&self) -> Vec<Layer<'_>> {
        // Flags mirror the composition rules: SAAS and plugin layers
        // are required, only the backing store is writable.
        let mut out = vec![layer(&*self.writable, false, true)];
        if let Some(l) = &self.local {
            out.push(layer(&**l, false, false));
        }
        for s in self.saas.values() {
            out.push(layer(&**s, true, false));
        }
        if let Some(d) = &self.default_content {
            out.push(layer(&**d, false, false));
        }
        for p in self.plugins.values() {
            out.push(layer(&**p, true, false));
        }
        out.push(layer(&*self.basic, false, false));
        out
    }

    /// Validate the composed view: every required layer must carry a
    /// metadata Name, and layer names must not collide.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut e = ModelError::validation("contents", "");
        let mut seen = std::collections::HashSet::new();
        for l in self.layers() {
            let md = l.store.metadata();
            if l.required && md.name.is_empty() {
                e.errorf(format!(
                    "required {} content layer has no Name in its metadata",
                    l.store.store_type()
                ));
                continue;
            }
            if !md.name.is_empty() && !seen.insert(md.name.clone()) {
                e.errorf(format!("duplicate content layer name {}", md.name));
            }
        }
        e.or_ok()
    }

    /// Union of keys for a prefix across all layers, sorted.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut set = std::collections::BTreeSet::new();
        for l in self.layers() {
            for k in l.store.keys(prefix)? {
                set.insert(k);
            }
        }
        Ok(set.into_iter().collect())
    }

    /// Load a key. Returns the value and whether it came from the
    /// writable layer (anything else is read-only content).
    pub fn load(&self, prefix: &str, key: &str) -> Result<Option<(Value, bool)>> {
        for l in self.layers() {
            if let Some(v) = l.store.load(prefix, key)? {
                return Ok(Some((v, l.writable)));
            }
        }
        Ok(None)
    }

    /// Save a key to the writable layer.
    pub fn save(&self, prefix: &str, key: &str, value: &Value) -> Result<()> {
        self.writable.save(prefix, key, value)
    }

    /// Remove a key from the writable layer.
    pub fn remove(&self, prefix: &str, key: &str) -> Result<bool> {
        self.writable.remove(prefix, key)
    }

    /// Names of the mounted SAAS layers, sorted.
    pub fn saas_names(&self) -> Vec<String> {
        self.saas.keys().cloned().collect()
    }

    /// Add or replace a SAAS content layer. Returns the displaced
    /// store, if any, for cleanup after validation.
    pub fn add_replace_saas(
        &mut self,
        name: &str,
        store: Box<dyn ContentStore>,
    ) -> Result<Option<Box<dyn ContentStore>>, ModelError> {
        let old = self.saas.insert(name.to_string(), store);
        if let Err(e) = self.validate() {
            // Roll the mutation back; the stack must stay valid.
            let bad = self.saas.remove(name);
            if let Some(prev) = old {
                self.saas.insert(name.to_string(), prev);
            }
            drop(bad);
            return Err(e);
        }
        Ok(old)
    }

    /// Remove a SAAS content layer. Returns the displaced store.
    pub fn remove_saas(&mut self, name: &str) -> Option<Box<dyn ContentStore>> {
        self.saas.remove(name)
    }

    /// Add or replace a plugin content layer.
    pub fn add_replace_plugin(
        &mut self,
        name: &str,
        store: Box<dyn ContentStore>,
    ) -> Result<Option<Box<dyn ContentStore>>, ModelError> {
        let old = self.plugins.insert(name.to_string(), store);
        if let Err(e) = self.validate() {
            let bad = self.plugins.remove(name);
            if let Some(prev) = old {
                self.plugins.insert(name.to_string(), prev);
            }
            drop(bad);
            return Err(e);
        }
        Ok(old)
    }

    /// Remove a plugin content layer. Returns the displaced store.
    pub fn remove_plugin(&mut self, name: &str) -> Option<Box<dyn ContentStore>> {
        self.plugins.remove(name)
    }

    /// Metadata for every layer, in search order.
    pub fn layer_metadata(&self) -> Vec<StoreMetadata> {
        self.layers().iter().map(|l| l.store.metadata()).collect()
    }
}

/// Borrowed layer view used internally for iteration.
struct Layer<'a> {
    store: &'a dyn ContentStore,
    /// Required layers must carry a metadata Name.
    required: bool,
    writable: bool,
}

fn layer(store: &dyn ContentStore, required: bool, writable: bool) -> Layer<'_> {
    Layer {
        store,
        required,
        writable,
    }
}
