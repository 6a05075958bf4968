use crate::subscription::config::{STORE_DIR, STORE_FILE};
use crate::subscription::types::StorageError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A primitive stored under a key
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Number(i64),
    String(String),
}

impl From<bool> for StoredValue {
    fn from(value: bool) -> Self {
        StoredValue::Bool(value)
    }
}

impl From<i64> for StoredValue {
    fn from(value: i64) -> Self {
        StoredValue::Number(value)
    }
}

impl From<String> for StoredValue {
    fn from(value: String) -> Self {
        StoredValue::String(value)
    }
}

impl From<&str> for StoredValue {
    fn from(value: &str) -> Self {
        StoredValue::String(value.to_string())
    }
}

/// Synchronous key-value store owned by the subscription manager.
///
/// Reads never fail: a missing or mistyped entry reads as `None`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoredValue>;

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(StoredValue::Bool(value)) => Some(value),
            _ => None,
        }
    }

    fn get_number(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(StoredValue::Number(value)) => Some(value),
            _ => None,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(StoredValue::String(value)) => Some(value),
            _ => None,
        }
    }
}

/// Process-local store, used by tests and hosts without persistence
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON document, mirrored in memory
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A corrupt document is
    /// logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to parse subscription store, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(FileStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the store in the platform's local data directory
    pub fn in_data_dir() -> Result<Self, StorageError> {
        let dir = dirs::data_local_dir()
            .ok_or_else(|| StorageError::Unavailable("Could not get local data directory".into()))?
            .join(STORE_DIR);

        Self::open(dir.join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, StoredValue>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reads_ignore_other_types() {
        let store = MemoryStore::new();
        store.set("is_premium", true.into()).unwrap();
        store.set("last_validation", 1_700_000_000_000i64.into()).unwrap();

        assert_eq!(store.get_bool("is_premium"), Some(true));
        assert_eq!(store.get_number("is_premium"), None);
        assert_eq!(store.get_number("last_validation"), Some(1_700_000_000_000));
        assert_eq!(store.get_string("missing"), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(STORE_FILE);

        {
            let store = FileStore::open(&path).unwrap();
            store.set("trial_used", true.into()).unwrap();
            store.set("last_receipt", "receipt-data".into()).unwrap();
            store.remove("trial_used").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_bool("trial_used"), None);
        assert_eq!(reopened.get_string("last_receipt").as_deref(), Some("receipt-data"));
    }

    #[test]
    fn test_file_store_tolerates_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("anything"), None);

        store.set("is_premium", false.into()).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_bool("is_premium"), Some(false));
    }
}
