use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{BackendKind, StorageBackend, StorageError, WriteOptions};

/// Raw string key/value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Can be switched into a failing mode to simulate
/// disabled storage or an exceeded quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    failing: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.write() = failing;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check(&self) -> Result<(), StorageError> {
        if *self.failing.read() {
            Err(StorageError::Unavailable("memory store disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Adapter exposing a key/value store as a stack backend. Values are stored raw.
pub struct KeyValueBackend {
    kind: BackendKind,
    store: Arc<dyn KeyValueStore>,
}

impl KeyValueBackend {
    pub fn new(kind: BackendKind, store: Arc<dyn KeyValueStore>) -> Self {
        Self { kind, store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

impl StorageBackend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn write(&self, name: &str, value: &str, _options: &WriteOptions) -> Result<(), StorageError> {
        self.store.set(name, value)
    }

    fn read(&self, name: &str) -> Option<String> {
        match self.store.get(name) {
            Ok(value) => value,
            Err(e) => {
                debug!(backend = ?self.kind, key = name, error = %e, "Read failed, treating as absent");
                None
            }
        }
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.store.remove(name)
    }

    fn confirm(&self, name: &str, expected: Option<&str>) -> Result<(), StorageError> {
        let current = self.read(name);
        match expected {
            Some(value) if current.as_deref() != Some(value) => {
                Err(StorageError::NotPersisted(name.to_string()))
            }
            None if current.is_some() => Err(StorageError::NotRemoved(name.to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert_eq!(store.get("token").unwrap(), None);

        store.set("token", "t1").unwrap();
        assert_eq!(store.get("token").unwrap(), Some("t1".to_string()));
        assert_eq!(store.len(), 1);

        store.remove("token").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_failing() {
        let store = MemoryStore::new();
        store.set("token", "t1").unwrap();
        store.set_failing(true);

        assert!(store.get("token").is_err());
        assert!(store.set("token", "t2").is_err());
        assert!(store.remove("token").is_err());

        store.set_failing(false);
        assert_eq!(store.get("token").unwrap(), Some("t1".to_string()));
    }

    #[test]
    fn test_backend_read_swallows_errors() {
        let store = Arc::new(MemoryStore::new());
        let backend = KeyValueBackend::new(BackendKind::Session, store.clone());
        backend.write("auth_data", "a1", &WriteOptions::default()).unwrap();
        assert_eq!(backend.read("auth_data"), Some("a1".to_string()));

        store.set_failing(true);
        assert_eq!(backend.read("auth_data"), None);
    }

    #[test]
    fn test_backend_confirm() {
        let store = Arc::new(MemoryStore::new());
        let backend = KeyValueBackend::new(BackendKind::Local, store.clone());

        backend.write("token", "t1", &WriteOptions::default()).unwrap();
        assert!(backend.confirm("token", Some("t1")).is_ok());
        assert!(matches!(
            backend.confirm("token", Some("other")),
            Err(StorageError::NotPersisted(_))
        ));
        assert!(matches!(
            backend.confirm("token", None),
            Err(StorageError::NotRemoved(_))
        ));

        backend.remove("token").unwrap();
        assert!(backend.confirm("token", None).is_ok());
    }
}
