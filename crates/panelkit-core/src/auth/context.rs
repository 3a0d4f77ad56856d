use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

/// How long a derived login status is reused without re-deriving it.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(1);

/// Process-lifetime overrides written by the session manager.
///
/// A storage backend can fail silently; these flags let every collaborator
/// short-circuit to a known state instead of re-deriving it from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Explicit "user is logged in" override. `None` means no opinion.
    pub logged_in: Option<bool>,
    pub logging_out: bool,
    pub cookie_write_failed: bool,
    /// In-memory copy of `auth_data` for when every backend lost it
    pub auth_data_fallback: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CachedStatus {
    pub result: bool,
    pub cached_at: Instant,
}

impl CachedStatus {
    pub fn new(result: bool) -> Self {
        Self {
            result,
            cached_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.cached_at.elapsed() < window
    }
}

/// Shared session state: override flags plus the single-slot status cache.
#[derive(Debug)]
pub struct SessionContext {
    flags: RwLock<SessionFlags>,
    cached: Mutex<Option<CachedStatus>>,
    window: Duration,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_window(FRESHNESS_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            flags: RwLock::new(SessionFlags::default()),
            cached: Mutex::new(None),
            window,
        }
    }

    /// Snapshot of the current flags
    pub fn flags(&self) -> SessionFlags {
        self.flags.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut SessionFlags)) {
        f(&mut self.flags.write());
    }

    pub fn logged_in_override(&self) -> Option<bool> {
        self.flags.read().logged_in
    }

    pub fn is_logging_out(&self) -> bool {
        self.flags.read().logging_out
    }

    pub fn cookie_write_failed(&self) -> bool {
        self.flags.read().cookie_write_failed
    }

    pub fn auth_data_fallback(&self) -> Option<String> {
        self.flags.read().auth_data_fallback.clone()
    }

    /// Cached status, if still inside the freshness window
    pub fn cached_status(&self) -> Option<bool> {
        let cached = *self.cached.lock();
        cached.filter(|c| c.is_fresh(self.window)).map(|c| c.result)
    }

    pub fn cache_status(&self, result: bool) {
        *self.cached.lock() = Some(CachedStatus::new(result));
    }

    pub fn invalidate_cache(&self) {
        *self.cached.lock() = None;
    }
}
