//! The collaborators a session manager is built from.

use std::sync::Arc;

use anyhow::{Context, Result};
use url::Url;

use crate::auth::hooks::{NoopNotifier, NoopUserStore, Notifier, UserStore};
use crate::config::{DeploymentConfig, PersistentStore};
use crate::location::{MemoryNavigator, Navigator};
use crate::storage::{CookieJar, FileStore, KeyValueStore, KeyringStore, MemoryCookieJar, MemoryStore};

pub struct Environment {
    /// Persistent key/value store
    pub local: Arc<dyn KeyValueStore>,
    /// Transient key/value store
    pub session: Arc<dyn KeyValueStore>,
    pub cookies: Arc<dyn CookieJar>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
    pub user_store: Arc<dyn UserStore>,
}

impl Environment {
    /// Everything in memory, positioned at `page`.
    pub fn in_memory(page: Url) -> Self {
        Self {
            local: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
            cookies: Arc::new(MemoryCookieJar::for_url(&page)),
            navigator: Arc::new(MemoryNavigator::new(page)),
            notifier: Arc::new(NoopNotifier),
            user_store: Arc::new(NoopUserStore),
        }
    }

    /// Environment with the persistent store chosen by `config`.
    pub fn from_config(config: &DeploymentConfig, page: Url) -> Result<Self> {
        let local: Arc<dyn KeyValueStore> = match config.persistent_store {
            PersistentStore::File => {
                let dir = config.data_dir()?;
                Arc::new(
                    FileStore::open(&dir)
                        .with_context(|| format!("Failed to open storage in {}", dir.display()))?,
                )
            }
            PersistentStore::Keyring => Arc::new(KeyringStore::new(&config.site_name)),
            PersistentStore::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(Self {
            local,
            ..Self::in_memory(page)
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_user_store(mut self, user_store: Arc<dyn UserStore>) -> Self {
        self.user_store = user_store;
        self
    }
}
