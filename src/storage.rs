//! Client-local key/value storage
//!
//! Stands in for browser local storage. `FileStore` keeps every key in one
//! JSON object and rewrites the whole file on each mutation through a temp
//! file + rename, so a reader only ever sees a complete snapshot.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Durable string key/value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Remove every key in one atomic step
    fn clear(&self) -> Result<(), StorageError>;

    /// Apply several writes and removals as one atomic update
    fn apply(&self, sets: &[(&str, String)], removes: &[&str]) -> Result<(), StorageError> {
        for key in removes {
            self.remove(key)?;
        }
        for (key, value) in sets {
            self.set(key, value)?;
        }
        Ok(())
    }
}

type Entries = BTreeMap<String, String>;

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> Result<T, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(f(&mut entries))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entries(|e| e.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_entries(|e| {
            e.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_entries(|e| {
            e.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.with_entries(|e| e.clear())
    }

    fn apply(&self, sets: &[(&str, String)], removes: &[&str]) -> Result<(), StorageError> {
        self.with_entries(|e| {
            for key in removes {
                e.remove(*key);
            }
            for (key, value) in sets {
                e.insert(key.to_string(), value.clone());
            }
        })
    }
}

/// JSON-file backed store
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default location: ~/.patientportal/session.json
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".patientportal").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Entries, StorageError> {
        if !self.path.exists() {
            return Ok(Entries::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Entries::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), StorageError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;

        debug!(path = ?self.path, keys = entries.len(), "Wrote session storage");
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut Entries)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(StorageError::Corrupt(e)) => {
                warn!(
                    line = e.line(),
                    column = e.column(),
                    "Discarding corrupt session storage"
                );
                Entries::new()
            }
            Err(e) => return Err(e),
        };
        f(&mut entries);
        self.write_entries(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(|e| {
            e.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(|e| {
            e.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.write_entries(&Entries::new())
    }

    fn apply(&self, sets: &[(&str, String)], removes: &[&str]) -> Result<(), StorageError> {
        self.modify(|e| {
            for key in removes {
                e.remove(*key);
            }
            for (key, value) in sets {
                e.insert(key.to_string(), value.clone());
            }
        })
    }
}
