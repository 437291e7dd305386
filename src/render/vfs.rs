//! Virtual filesystem for rendered artifacts.
//!
//! The TFTP and static-HTTP collaborators serve whatever is registered
//! here, so they always hand out exactly what the renderer produced.
//! Entries are owned by a (machine, bootenv) pair; registration and
//! deregistration are idempotent. Reads never take tracker locks.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One registered file.
#[derive(Debug, Clone, PartialEq)]
struct VfsEntry {
    owner: Uuid,
    env: String,
    body: Vec<u8>,
}

/// The in-memory file tree backing TFTP and static HTTP.
#[derive(Debug, Default)]
pub struct VirtualFs {
    files: RwLock<BTreeMap<String, VfsEntry>>,
}

impl VirtualFs {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one rendered file for a (machine, bootenv) owner.
    /// Re-registering the same path replaces the body.
    pub fn register(&self, owner: Uuid, env: &str, path: &str, body: impl Into<Vec<u8>>) {
        self.files.write().insert(
            normalize(path),
            VfsEntry {
                owner,
                env: env.to_string(),
                body: body.into(),
            },
        );
    }

    /// Drop every file owned by a (machine, bootenv) pair.
    pub fn deregister(&self, owner: Uuid, env: &str) {
        self.files
            .write()
            .retain(|_, e| !(e.owner == owner && e.env == env));
    }

    /// Drop every file owned by a machine, across all bootenvs.
    pub fn deregister_machine(&self, owner: Uuid) {
        self.files.write().retain(|_, e| e.owner != owner);
    }

    /// Read one file.
    pub fn open(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(&normalize(path)).map(|e| e.body.clone())
    }

    /// Every registered path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

/// All paths are rooted; TFTP requests tend to arrive without the
/// leading slash.
fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_read_deregister() {
        let fs = VirtualFs::new();
        let m = Uuid::new_v4();
        fs.register(m, "local", "/machines/x/file", "hello");
        assert_eq!(fs.open("/machines/x/file").unwrap(), b"hello");
        assert_eq!(fs.open("machines/x/file").unwrap(), b"hello");
        fs.deregister(m, "local");
        assert!(fs.open("/machines/x/file").is_none());
    }

    #[test]
    fn deregister_only_touches_the_owner() {
        let fs = VirtualFs::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fs.register(a, "local", "/a", "a");
        fs.register(b, "local", "/b", "b");
        fs.deregister(a, "local");
        assert!(fs.open("/a").is_none());
        assert_eq!(fs.open("/b").unwrap(), b"b");
    }

    #[test]
    fn register_is_idempotent() {
        let fs = VirtualFs::new();
        let m = Uuid::new_v4();
        fs.register(m, "local", "/f", "v1");
        fs.register(m, "local", "/f", "v1");
        assert_eq!(fs.len(), 1);
        let before = fs.paths();
        fs.deregister(m, "local");
        fs.register(m, "local", "/f", "v1");
        assert_eq!(fs.paths(), before);
    }
}
