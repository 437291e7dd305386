//! Directory-backed content store.
//!
//! One directory per prefix, one file per key. Layer metadata lives in
//! a `.meta.json` file at the store root. Writes go through a `.part`
//! sidecar rename so a crash never leaves a half-written object.

use super::{Codec, ContentStore, StoreMetadata};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A content store with one file per key.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    codec: Codec,
}

impl DirectoryStore {
    /// Open a directory store, creating the root if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating {}", root.display()))?;
        Ok(Self {
            root,
            codec: Codec::Json,
        })
    }

    fn key_path(&self, prefix: &str, key: &str) -> PathBuf {
        self.root
            .join(prefix)
            .join(format!("{key}.{}", self.codec.ext()))
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join(".meta.json")
    }
}

impl ContentStore for DirectoryStore {
    fn store_type(&self) -> &'static str {
        "directory"
    }

    fn sub_prefixes(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let suffix = format!(".{}", self.codec.ext());
        let mut out = Vec::new();
        for entry in
            std::fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))?
        {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(&suffix) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    fn load(&self, prefix: &str, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(prefix, key);
        if !path.exists() {
            return Ok(None);
        }
        let buf =
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(self.codec.decode(&buf)?))
    }

    fn save(&self, prefix: &str, key: &str, value: &Value) -> Result<()> {
        let dir = self.root.join(prefix);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = self.key_path(prefix, key);
        let part = dir.join(format!(".{key}.part"));
        std::fs::write(&part, self.codec.encode(value)?)
            .with_context(|| format!("writing {}", part.display()))?;
        std::fs::rename(&part, &path)
            .with_context(|| format!("renaming {} into place", part.display()))?;
        Ok(())
    }

    fn remove(&self, prefix: &str, key: &str) -> Result<bool> {
        let path = self.key_path(prefix, key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        Ok(true)
    }

    fn metadata(&self) -> StoreMetadata {
        std::fs::read(self.meta_path())
            .ok()
            .and_then(|buf| serde_json::from_slice(&buf).ok())
            .unwrap_or_default()
    }

    fn set_metadata(&mut self, md: StoreMetadata) -> Result<()> {
        let buf = serde_json::to_vec_pretty(&md).context("encoding metadata")?;
        std::fs::write(self.meta_path(), buf)
            .with_context(|| format!("writing {}", self.meta_path().display()))?;
        Ok(())
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}
