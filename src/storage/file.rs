//! Single-document file store.
//!
//! The whole store is one JSON document on disk: layer metadata plus a
//! map of prefix sections, each a map of key to value. The document is
//! read once at open and rewritten atomically (write to a `.part`
//! sidecar, then rename) on every mutation.

use super::{Codec, ContentStore, StoreMetadata};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Document {
    meta: StoreMetadata,
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

/// A content store holding everything in one serialised document.
pub struct FileStore {
    path: PathBuf,
    codec: Codec,
    doc: RwLock<Document>,
}

impl FileStore {
    /// Open a file store, creating an empty document if the file does
    /// not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = if path.exists() {
            let buf = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice(&buf)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Document::default()
        };
        Ok(Self {
            path,
            codec: Codec::Json,
            doc: RwLock::new(doc),
        })
    }

    fn flush(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let part = sidecar(&self.path);
        let buf = serde_json::to_vec_pretty(doc).context("encoding store document")?;
        std::fs::write(&part, buf).with_context(|| format!("writing {}", part.display()))?;
        std::fs::rename(&part, &self.path)
            .with_context(|| format!("renaming {} into place", part.display()))?;
        Ok(())
    }
}

/// `.{name}.part` sidecar next to the target path.
fn sidecar(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(".{name}.part"))
}

impl ContentStore for FileStore {
    fn store_type(&self) -> &'static str {
        "file"
    }

    fn sub_prefixes(&self) -> Result<Vec<String>> {
        Ok(self.doc.read().sections.keys().cloned().collect())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .doc
            .read()
            .sections
            .get(prefix)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load(&self, prefix: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .doc
            .read()
            .sections
            .get(prefix)
            .and_then(|s| s.get(key))
            .cloned())
    }

    fn save(&self, prefix: &str, key: &str, value: &Value) -> Result<()> {
        let mut doc = self.doc.write();
        doc.sections
            .entry(prefix.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        self.flush(&doc)
    }

    fn remove(&self, prefix: &str, key: &str) -> Result<bool> {
        let mut doc = self.doc.write();
        let existed = doc
            .sections
            .get_mut(prefix)
            .map(|s| s.remove(key).is_some())
            .unwrap_or(false);
        if existed {
            self.flush(&doc)?;
        }
        Ok(existed)
    }

    fn metadata(&self) -> StoreMetadata {
        self.doc.read().meta.clone()
    }

    fn set_metadata(&mut self, md: StoreMetadata) -> Result<()> {
        let mut doc = self.doc.write();
        doc.meta = md;
        self.flush(&doc)
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("codec", &self.codec)
            .finish()
    }
}
