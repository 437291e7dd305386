//! Embedded key/value content store backed by redb.
//!
//! One database file holds two tables: `content`, keyed by
//! `"{prefix}\x00{key}"` with JSON-encoded values, and `metadata` for
//! the layer metadata document. Keys within a prefix are range-scanned
//! off the composite key.

use super::{Codec, ContentStore, StoreMetadata};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// content: "{prefix}\x00{key}" → codec-encoded value
const CONTENT: TableDefinition<&str, &[u8]> = TableDefinition::new("content");
/// metadata: "meta" → JSON(StoreMetadata)
const METADATA: TableDefinition<&str, &str> = TableDefinition::new("metadata");

/// Prefix/key separator inside composite keys. NUL sorts before every
/// printable byte, so `"{prefix}\x00"` ranges are tight.
const SEP: char = '\0';

/// A content store inside an embedded database file.
pub struct KvStore {
    path: PathBuf,
    db: Arc<Database>,
    codec: Codec,
}

impl KvStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        // Ensure both tables exist before the first read transaction.
        let wtx = db.begin_write()?;
        wtx.open_table(CONTENT)?;
        wtx.open_table(METADATA)?;
        wtx.commit()?;

        Ok(Self {
            path,
            db: Arc::new(db),
            codec: Codec::Json,
        })
    }

    fn composite(prefix: &str, key: &str) -> String {
        format!("{prefix}{SEP}{key}")
    }
}

impl ContentStore for KvStore {
    fn store_type(&self) -> &'static str {
        "kv"
    }

    fn sub_prefixes(&self) -> Result<Vec<String>> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(CONTENT)?;
        let mut out: Vec<String> = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            if let Some((prefix, _)) = k.value().split_once(SEP) {
                if out.last().map(String::as_str) != Some(prefix) {
                    out.push(prefix.to_string());
                }
            }
        }
        Ok(out)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(CONTENT)?;
        let start = format!("{prefix}{SEP}");
        let end = format!("{prefix}\x01");
        let mut out = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (k, _) = entry?;
            if let Some((_, key)) = k.value().split_once(SEP) {
                out.push(key.to_string());
            }
        }
        Ok(out)
    }

    fn load(&self, prefix: &str, key: &str) -> Result<Option<Value>> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(CONTENT)?;
        match table.get(Self::composite(prefix, key).as_str())? {
            Some(guard) => Ok(Some(self.codec.decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn save(&self, prefix: &str, key: &str, value: &Value) -> Result<()> {
        let buf = self.codec.encode(value)?;
        let wtx = self.db.begin_write()?;
        wtx.open_table(CONTENT)?
            .insert(Self::composite(prefix, key).as_str(), buf.as_slice())?;
        wtx.commit()?;
        Ok(())
    }

    fn remove(&self, prefix: &str, key: &str) -> Result<bool> {
        let wtx = self.db.begin_write()?;
        let existed = wtx
            .open_table(CONTENT)?
            .remove(Self::composite(prefix, key).as_str())?
            .is_some();
        wtx.commit()?;
        Ok(existed)
    }

    fn metadata(&self) -> StoreMetadata {
        let read = || -> Result<Option<StoreMetadata>> {
            let rtx = self.db.begin_read()?;
            let table = rtx.open_table(METADATA)?;
            Ok(match table.get("meta")? {
                Some(guard) => serde_json::from_str(guard.value()).ok(),
                None => None,
            })
        };
        read().ok().flatten().unwrap_or_default()
    }

    fn set_metadata(&mut self, md: StoreMetadata) -> Result<()> {
        let json = serde_json::to_string(&md).context("encoding metadata")?;
        let wtx = self.db.begin_write()?;
        wtx.open_table(METADATA)?.insert("meta", json.as_str())?;
        wtx.commit()?;
        Ok(())
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("path", &self.path).finish()
    }
}
