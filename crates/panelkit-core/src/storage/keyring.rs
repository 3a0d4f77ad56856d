use ::keyring::{Entry, Error as KeyringError};

use super::{KeyValueStore, StorageError};

/// Persistent key/value store backed by the OS keychain.
///
/// Each key is its own keychain entry under a service name derived from the
/// deployment's site identifier, so two deployments never share entries.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(site_name: &str) -> Self {
        Self {
            service: format!("panelkit-{}", site_name),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Entry::new(&self.service, key).map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::Unavailable(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::Unavailable(e.to_string())),
        }
    }
}
