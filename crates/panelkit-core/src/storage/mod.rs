//! Storage backends for credential persistence.
//!
//! The session layer keeps several copies of the same credential:
//! - a persistent local store (`FileStore`, `KeyringStore` or `MemoryStore`)
//! - a cookie jar, with its value mirrored into the local store
//! - a transient session store that does not outlive the process
//!
//! Every backend sits behind the `StorageBackend` trait and is kept in a
//! `StorageStack` ordered by priority. Backend failures are reported to the
//! caller as `StorageError` values but never abort a session transition.

pub mod cookie;
pub mod file;
pub mod keyring;
pub mod kv;

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

pub use self::cookie::{CookieBackend, CookieJar, MemoryCookieJar};
pub use self::file::FileStore;
pub use self::keyring::KeyringStore;
pub use self::kv::{KeyValueBackend, KeyValueStore, MemoryStore};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Value for {0} was not persisted")]
    NotPersisted(String),

    #[error("Value for {0} is still present after removal")]
    NotRemoved(String),
}

/// Role a backend plays in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Persistent key/value store (survives restarts)
    Local,
    /// Cookie jar
    Cookie,
    /// Transient key/value store (process lifetime)
    Session,
}

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Lifetime in days for backends that expire entries (cookies)
    pub days: Option<i64>,
}

impl WriteOptions {
    pub fn days(days: i64) -> Self {
        Self { days: Some(days) }
    }
}

/// Uniform capability interface over one storage mechanism.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn write(&self, name: &str, value: &str, options: &WriteOptions) -> Result<(), StorageError>;

    /// Read a value. Unreadable or foreign values read as absent.
    fn read(&self, name: &str) -> Option<String>;

    fn remove(&self, name: &str) -> Result<(), StorageError>;

    /// Re-check a previous write (`expected = Some`) or removal (`expected = None`)
    /// and repair it where the backend knows how.
    fn confirm(&self, _name: &str, _expected: Option<&str>) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PendingConfirm {
    kind: BackendKind,
    name: String,
    expected: Option<String>,
}

/// Backends in priority order plus the confirmations still owed to them.
pub struct StorageStack {
    backends: Vec<Arc<dyn StorageBackend>>,
    pending: Mutex<Vec<PendingConfirm>>,
}

impl StorageStack {
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self {
            backends,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn StorageBackend>> {
        self.backends.iter().find(|b| b.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// First value found for `name`, visiting only the listed kinds, in stack order.
    pub fn read_first(&self, name: &str, kinds: &[BackendKind]) -> Option<String> {
        self.backends
            .iter()
            .filter(|b| kinds.contains(&b.kind()))
            .find_map(|b| b.read(name))
    }

    pub fn read(&self, kind: BackendKind, name: &str) -> Option<String> {
        self.backend(kind).and_then(|b| b.read(name))
    }

    /// Write to one backend and queue a confirmation for it.
    pub fn write(
        &self,
        kind: BackendKind,
        name: &str,
        value: &str,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let backend = self
            .backend(kind)
            .ok_or_else(|| StorageError::Unavailable(format!("no {:?} backend", kind)))?;
        // Queued even on failure so the confirmation pass can retry.
        self.pending.lock().push(PendingConfirm {
            kind,
            name: name.to_string(),
            expected: Some(value.to_string()),
        });
        backend.write(name, value, options)
    }

    /// Remove from one backend and queue a confirmation for it.
    pub fn remove(&self, kind: BackendKind, name: &str) -> Result<(), StorageError> {
        let backend = self
            .backend(kind)
            .ok_or_else(|| StorageError::Unavailable(format!("no {:?} backend", kind)))?;
        self.pending.lock().push(PendingConfirm {
            kind,
            name: name.to_string(),
            expected: None,
        });
        backend.remove(name)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Run every queued confirmation, returning the ones that failed.
    ///
    /// Only the latest operation per (backend, name) is confirmed.
    pub fn settle(&self) -> Vec<(BackendKind, StorageError)> {
        let drained: Vec<PendingConfirm> = std::mem::take(&mut *self.pending.lock());

        let mut latest: Vec<PendingConfirm> = Vec::new();
        for op in drained {
            latest.retain(|p| !(p.kind == op.kind && p.name == op.name));
            latest.push(op);
        }

        let mut failures = Vec::new();
        for op in latest {
            let Some(backend) = self.backend(op.kind) else {
                continue;
            };
            if let Err(e) = backend.confirm(&op.name, op.expected.as_deref()) {
                debug!(backend = ?op.kind, key = %op.name, error = %e, "Storage confirmation failed");
                failures.push((op.kind, e));
            }
        }
        failures
    }
}

/// True when a stored value is a usable credential rather than a placeholder.
pub fn is_usable(value: &str) -> bool {
    !value.is_empty() && value != "null" && value != "undefined"
}

/// Filter placeholder strings out of an optional value.
pub fn usable(value: Option<String>) -> Option<String> {
    value.filter(|v| is_usable(v))
}
