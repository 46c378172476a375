//! Whole-snapshot persistence for the ledger and the filter.
//!
//! Each component owns one store and rewrites its full serialized state
//! after every mutation. Two backends: a JSON file replaced atomically, and
//! a sled tree holding the snapshot under a single key.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StorageError;

/// Durable home for one serialized snapshot.
pub trait SnapshotStore: Send + Sync {
    /// The last snapshot written, or `None` when nothing (or nothing but an
    /// empty file) is stored yet.
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored snapshot. Returns once the bytes are durable.
    fn write(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Snapshot kept in a single file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl SnapshotStore for FileStore {
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        // Write atomically via temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(|e| self.io_err(e))?;
        file.write_all(bytes).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Snapshot kept in process memory. Not durable; for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `bytes`, as if written by an earlier run.
    pub fn with_snapshot(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.bytes.lock().clone().filter(|b| !b.is_empty()))
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<S> {
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read()
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(bytes)
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

const SNAPSHOT_KEY: &[u8] = b"snapshot";

/// Snapshot kept in a sled tree.
#[derive(Clone)]
pub struct SledStore {
    tree: sled::Tree,
    name: String,
}

impl SledStore {
    /// Open (or create) the tree `name` inside `db`.
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StorageError> {
        let tree = db.open_tree(name)?;
        Ok(Self {
            tree,
            name: name.to_string(),
        })
    }
}

impl SnapshotStore for SledStore {
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match self.tree.get(SNAPSHOT_KEY)? {
            Some(v) if v.is_empty() => Ok(None),
            Some(v) => Ok(Some(v.to_vec())),
            None => Ok(None),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(SNAPSHOT_KEY, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn location(&self) -> String {
        format!("sled tree '{}'", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_missing_and_empty_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("ledger.json"));
        assert!(store.read().unwrap().is_none());

        fs::write(store.path(), b"").unwrap();
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn file_store_replaces_snapshot_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested/ledger.json"));
        store.write(b"first").unwrap();
        store.write(b"second").unwrap();
        assert_eq!(store.read().unwrap().as_deref(), Some(&b"second"[..]));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn sled_store_round_trips_and_isolates_trees() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let ledger = SledStore::open(&db, "ledger").unwrap();
        let filter = SledStore::open(&db, "filter").unwrap();

        assert!(ledger.read().unwrap().is_none());
        ledger.write(b"chain").unwrap();
        assert_eq!(ledger.read().unwrap().as_deref(), Some(&b"chain"[..]));
        assert!(filter.read().unwrap().is_none());
    }
}
