//! Content storage.
//!
//! All operational state persists through a [`ContentStore`]: a typed
//! key/value surface organised into per-prefix sub-stores ("machines",
//! "bootenvs", ...). Concrete backends:
//!
//! - [`file::FileStore`] - one serialised document holding every prefix
//! - [`directory::DirectoryStore`] - one file per key under per-prefix
//!   directories
//! - [`kv::KvStore`] - embedded key/value database (redb)
//! - [`memory::MemoryStore`] - in-memory, used for tests and the
//!   built-in content layer
//! - [`stack::DataStack`] - an ordered stack of the above with a single
//!   writable layer
//!
//! Values cross the store boundary as `serde_json::Value`; the
//! [`Codec`] seam turns them into bytes on the way to disk.

pub mod directory;
pub mod file;
pub mod kv;
pub mod memory;
pub mod stack;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata describing one content layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StoreMetadata {
    /// Layer name; required for layers flagged as required in a stack.
    pub name: String,
    /// Human description of the layer.
    pub description: String,
    /// Where the layer came from.
    pub source: String,
    /// Content version.
    pub version: String,
}

impl StoreMetadata {
    /// Metadata for the writable backing store.
    pub fn backing() -> Self {
        Self {
            name: "BackingStore".to_string(),
            description: "Writable backing store".to_string(),
            source: String::new(),
            version: "user".to_string(),
        }
    }

    /// Metadata for a local override store with no metadata of its own.
    pub fn local() -> Self {
        Self {
            name: "LocalStore".to_string(),
            description: "Local override store".to_string(),
            source: String::new(),
            version: "user".to_string(),
        }
    }

    /// Metadata for a default content store with no metadata of its own.
    pub fn default_content() -> Self {
        Self {
            name: "DefaultStore".to_string(),
            description: "Initial default content".to_string(),
            source: String::new(),
            version: "user".to_string(),
        }
    }
}

/// Value codec for a store.
///
/// JSON is the only codec the stack ships; the enum keeps the seam a
/// future codec would slot into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// serde_json, pretty-printed on disk.
    Json,
}

impl Codec {
    /// File extension for this codec.
    pub fn ext(&self) -> &'static str {
        match self {
            Self::Json => "json",
        }
    }

    /// Encode a value to bytes.
    pub fn encode(&self, v: &Value) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec_pretty(v).context("encoding value"),
        }
    }

    /// Decode bytes into a value.
    pub fn decode(&self, buf: &[u8]) -> Result<Value> {
        match self {
            Self::Json => serde_json::from_slice(buf).context("decoding value"),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::Json
    }
}

/// A typed key/value content store organised into per-prefix
/// sub-stores.
///
/// Implementations are internally synchronised; every method takes
/// `&self` except metadata replacement.
pub trait ContentStore: Send + Sync + std::fmt::Debug {
    /// Store format tag ("file", "directory", "kv", "memory", "stack").
    fn store_type(&self) -> &'static str;

    /// The prefixes this store currently holds keys under.
    fn sub_prefixes(&self) -> Result<Vec<String>>;

    /// All keys under one prefix, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Load one value; `None` if the key is absent.
    fn load(&self, prefix: &str, key: &str) -> Result<Option<Value>>;

    /// Save one value.
    fn save(&self, prefix: &str, key: &str, value: &Value) -> Result<()>;

    /// Remove one key. Returns whether the key existed.
    fn remove(&self, prefix: &str, key: &str) -> Result<bool>;

    /// Layer metadata.
    fn metadata(&self) -> StoreMetadata;

    /// Replace layer metadata.
    fn set_metadata(&mut self, md: StoreMetadata) -> Result<()>;

    /// Filesystem location backing this store, if any. Used by
    /// format-specific cleanup when a stack layer is replaced.
    fn location(&self) -> Option<std::path::PathBuf> {
        None
    }

    /// Release any held resources. Dropping the store also releases
    /// them; `close` exists so a stack can shut a layer down before
    /// deleting its backing files.
    fn close(&self) {}
}

/// Dispose of a replaced content layer.
///
/// The store is closed first, then its on-disk representation is
/// removed according to its format.
pub fn clean_up_store(store: Box<dyn ContentStore>) -> Result<()> {
    store.close();
    let typ = store.store_type();
    let loc = store.location();
    drop(store);
    if let Some(path) = loc {
        match typ {
            "file" | "kv" => {
                if path.exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("removing {}", path.display()))?;
                }
            }
            "directory" => {
                if path.exists() {
                    std::fs::remove_dir_all(&path)
                        .with_context(|| format!("removing {}", path.display()))?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Open a content store from a URI.
///
/// Recognised schemes: `file://<path>`, `directory://<path>`,
/// `kv://<path>`, `memory://`. A bare path with no scheme opens a
/// directory store.
pub fn open(uri: &str) -> Result<Box<dyn ContentStore>> {
    let (scheme, path) = match uri.split_once("://") {
        Some((s, p)) => (s, p),
        None => ("directory", uri),
    };
    match scheme {
        "file" => Ok(Box::new(file::FileStore::open(path)?)),
        "directory" => Ok(Box::new(directory::DirectoryStore::open(path)?)),
        "kv" => Ok(Box::new(kv::KvStore::open(path)?)),
        "memory" => Ok(Box::new(memory::MemoryStore::new())),
        other => anyhow::bail!("unknown store scheme {other} in {uri}"),
    }
}
