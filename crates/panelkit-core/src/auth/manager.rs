//! Session state machine.
//!
//! `SessionManager` derives a single "is the user logged in" answer from
//! redundant storage and owns every transition that changes it: login,
//! register, logout and forced logout. Writes go to every backend; a delayed
//! self-check compensates when a backend silently dropped them.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::CredentialCodec;
use super::context::SessionContext;
use super::hooks::{Notifier, UserStore};
use super::keys;
use super::payload::AuthPayload;
use super::resolver::CredentialResolver;
use super::SessionError;
use crate::config::DeploymentConfig;
use crate::env::Environment;
use crate::location::{has_logout_marker, is_auth_view, Navigator};
use crate::storage::{
    usable, BackendKind, CookieBackend, KeyValueBackend, StorageError, StorageStack, WriteOptions,
};

/// Delay before re-checking the login state after credentials were written.
pub const LOGIN_VERIFY_DELAY: Duration = Duration::from_millis(500);

/// Delay before confirming storage writes and removals.
pub const STORAGE_CONFIRM_DELAY: Duration = Duration::from_millis(300);

/// Delay between persisting a registration and reloading messages.
const REGISTER_NOTIFY_DELAY: Duration = Duration::from_millis(100);

/// Delay between clearing credentials on logout and reloading messages.
const LOGOUT_NOTIFY_DELAY: Duration = Duration::from_millis(200);

/// Cookie lifetime with "remember me"
const REMEMBER_ME_DAYS: i64 = 30;

/// Cookie lifetime otherwise
const SESSION_COOKIE_DAYS: i64 = 1;

/// Where an expired session is sent
pub const LOGIN_ROUTE: &str = "/#/login";

/// Where a user-initiated logout lands
pub const LOGOUT_ROUTE: &str = "/login?logout=true";

/// Persistent keys dropped on every clear
const LOCAL_KEYS: [&str; 8] = [
    keys::TOKEN,
    keys::AUTH_DATA,
    keys::COOKIE_AUTH_DATA,
    keys::USER_INFO,
    keys::IS_ADMIN,
    "vuex",
    "user",
    "auth",
];

/// Transient keys dropped on every clear
const SESSION_KEYS: [&str; 5] = [keys::TOKEN, keys::AUTH_DATA, "vuex", "user", "auth"];

/// Cookies expired on every clear, ours and the backend's
const COOKIE_NAMES: [&str; 4] = [keys::AUTH_DATA, "XSRF-TOKEN", "laravel_session", keys::TOKEN];

const TOKEN_SOURCES: [BackendKind; 2] = [BackendKind::Local, BackendKind::Session];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggedIn,
    /// Token present, auth_data missing
    Indeterminate,
}

/// Outcome of the post-login self-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Storage shows the login
    Consistent,
    /// Storage lost part of the login; overrides were applied
    Compensated,
}

impl Verdict {
    /// Whether compensation is needed, given the state observed after a login.
    pub fn needs_compensation(observed: SessionState) -> bool {
        observed != SessionState::LoggedIn
    }
}

/// Handle to a scheduled self-check.
#[derive(Debug)]
pub struct VerificationHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Scheduled(JoinHandle<Verdict>),
    Done(Verdict),
}

impl VerificationHandle {
    /// Abort the check if it has not run yet.
    pub fn cancel(&self) {
        if let HandleState::Scheduled(handle) = &self.state {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Scheduled(handle) => handle.is_finished(),
            HandleState::Done(_) => true,
        }
    }

    /// Wait for the check. `None` if it was cancelled.
    pub async fn wait(self) -> Option<Verdict> {
        match self.state {
            HandleState::Scheduled(handle) => handle.await.ok(),
            HandleState::Done(verdict) => Some(verdict),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub redirect_url: String,
}

/// Clears the logging-out flag even if the logout future is dropped.
struct LogoutGuard<'a>(&'a SessionContext);

impl Drop for LogoutGuard<'_> {
    fn drop(&mut self) {
        self.0.update(|f| f.logging_out = false);
    }
}

struct Inner {
    stack: Arc<StorageStack>,
    context: Arc<SessionContext>,
    codec: CredentialCodec,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    user_store: Arc<dyn UserStore>,
}

/// Session state machine. Clone is cheap; clones share all state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: &DeploymentConfig, env: Environment) -> Self {
        let codec = CredentialCodec::new(config.site_name.clone());
        let cookies = CookieBackend::new(
            env.cookies,
            env.local.clone(),
            env.navigator.clone(),
            codec.clone(),
        );
        let stack = StorageStack::new(vec![
            Arc::new(KeyValueBackend::new(BackendKind::Local, env.local)),
            Arc::new(cookies),
            Arc::new(KeyValueBackend::new(BackendKind::Session, env.session)),
        ]);

        Self {
            inner: Arc::new(Inner {
                stack: Arc::new(stack),
                context: Arc::new(SessionContext::new()),
                codec,
                navigator: env.navigator,
                notifier: env.notifier,
                user_store: env.user_store,
            }),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.inner.context
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.inner.navigator
    }

    pub fn resolver(&self) -> CredentialResolver {
        CredentialResolver::new(
            self.inner.stack.clone(),
            self.inner.context.clone(),
            self.inner.codec.clone(),
        )
    }

    /// Credential for outgoing requests
    pub fn resolve_auth_header(&self) -> Option<String> {
        self.resolver().resolve_auth_header()
    }

    // ===== Storage helpers =====

    /// Write one value, absorbing failures. Returns whether the backend took it.
    fn persist(&self, kind: BackendKind, name: &str, value: &str, options: WriteOptions) -> bool {
        match self.inner.stack.write(kind, name, value, &options) {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = ?kind, key = name, error = %e, "Storage write failed");
                false
            }
        }
    }

    fn discard(&self, kind: BackendKind, name: &str) {
        if let Err(e) = self.inner.stack.remove(kind, name) {
            debug!(backend = ?kind, key = name, error = %e, "Storage removal failed");
        }
    }

    fn token(&self) -> Option<String> {
        usable(self.inner.stack.read_first(keys::TOKEN, &TOKEN_SOURCES))
    }

    fn auth_data(&self) -> Option<String> {
        usable(self.inner.stack.read_first(keys::AUTH_DATA, &TOKEN_SOURCES))
            .or_else(|| usable(self.inner.context.auth_data_fallback()))
    }

    /// Write to the persistent store, or to the transient one if it refuses.
    fn persist_durable(&self, name: &str, value: &str) {
        if !self.persist(BackendKind::Local, name, value, WriteOptions::default()) {
            debug!(key = name, "Keeping value in the transient store instead");
            self.persist(BackendKind::Session, name, value, WriteOptions::default());
        }
    }

    /// Write token and auth_data. Returns false if the cookie write failed.
    fn store_credentials(&self, payload: &AuthPayload, cookie_days: i64) -> bool {
        if let Some(token) = payload.token() {
            self.inner.user_store.login(token);
            self.persist_durable(keys::TOKEN, token);
        }

        let mut cookie_ok = true;
        if let Some(auth_data) = payload.auth_data() {
            self.persist_durable(keys::AUTH_DATA, auth_data);
            cookie_ok = self.persist(
                BackendKind::Cookie,
                keys::AUTH_DATA,
                auth_data,
                WriteOptions::days(cookie_days),
            );
        }
        cookie_ok
    }

    /// Confirm pending storage operations now.
    ///
    /// A cookie that did not stick marks the cookie failure flag.
    pub fn settle_storage(&self) {
        for (kind, error) in self.inner.stack.settle() {
            match (kind, &error) {
                (BackendKind::Cookie, StorageError::NotPersisted(name)) => {
                    warn!(name = %name, "Cookie write did not persist");
                    self.inner.context.update(|f| f.cookie_write_failed = true);
                }
                _ => debug!(backend = ?kind, error = %error, "Storage confirmation failed"),
            }
        }
    }

    fn schedule_settle(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let manager = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(STORAGE_CONFIRM_DELAY).await;
            manager.settle_storage();
        });
    }

    async fn reload_messages(&self) {
        if let Err(e) = self.inner.notifier.reload_messages().await {
            debug!(error = %e, "Message reload failed");
        }
    }

    // ===== Derivation =====

    /// Side-effect-free view of what storage holds.
    pub fn state(&self) -> SessionState {
        match (self.token(), self.auth_data()) {
            (None, _) => SessionState::LoggedOut,
            (Some(_), Some(_)) => SessionState::LoggedIn,
            (Some(_), None) => SessionState::Indeterminate,
        }
    }

    /// Both halves of the credential are in storage or memory.
    pub fn has_credentials(&self) -> bool {
        self.state() == SessionState::LoggedIn
    }

    /// Whether the user is logged in.
    ///
    /// Results are cached for the freshness window. Every path that finds
    /// the session broken clears all credentials.
    pub fn derive_login_status(&self) -> bool {
        if let Some(cached) = self.inner.context.cached_status() {
            return cached;
        }
        let result = self.derive_uncached();
        self.inner.context.cache_status(result);
        result
    }

    fn derive_uncached(&self) -> bool {
        let context = &self.inner.context;

        if context.is_logging_out() {
            return false;
        }

        if has_logout_marker(&self.inner.navigator.current()) {
            debug!("Logout marker in URL, clearing session");
            self.full_clear();
            return false;
        }

        if context.logged_in_override() == Some(false) {
            return false;
        }

        if self.token().is_none() {
            self.full_clear();
            return false;
        }

        if self.auth_data().is_none() {
            // Token without auth_data counts only when explicitly vouched for
            if context.logged_in_override() == Some(true) {
                return true;
            }
            debug!("Token present without auth_data, clearing session");
            self.full_clear();
            return false;
        }

        if self.inner.user_store.is_logged_in() == Some(false) {
            debug!("User store reports logged out while storage holds credentials");
        }
        self.drop_invalid_user_info();

        context.update(|f| f.logged_in = Some(true));
        true
    }

    fn drop_invalid_user_info(&self) {
        let Some(raw) = self.inner.stack.read(BackendKind::Local, keys::USER_INFO) else {
            return;
        };
        let valid = serde_json::from_str::<serde_json::Value>(&raw)
            .map(|v| v.is_object())
            .unwrap_or(false);
        if !valid {
            debug!("Dropping unreadable user info");
            self.discard(BackendKind::Local, keys::USER_INFO);
        }
    }

    // ===== Transitions =====

    /// Persist credentials from a successful login and schedule the self-check.
    pub fn on_login_success(
        &self,
        payload: &AuthPayload,
        remember_me: bool,
    ) -> Result<VerificationHandle, SessionError> {
        if !payload.has_credentials() {
            return Err(SessionError::IncompletePayload);
        }
        info!(remember_me, "Storing login credentials");

        let days = if remember_me {
            REMEMBER_ME_DAYS
        } else {
            SESSION_COOKIE_DAYS
        };
        let cookie_ok = self.store_credentials(payload, days);
        if payload.is_admin == Some(true) {
            self.persist(BackendKind::Local, keys::IS_ADMIN, "1", WriteOptions::default());
        }

        self.inner.context.update(|f| {
            f.logged_in = None;
            f.logging_out = false;
            f.auth_data_fallback = None;
            f.cookie_write_failed = !cookie_ok;
        });
        self.inner.context.invalidate_cache();
        self.schedule_settle();

        Ok(self.schedule_verification(payload.auth_data().map(str::to_string)))
    }

    fn schedule_verification(&self, auth_data: Option<String>) -> VerificationHandle {
        let state = match Handle::try_current() {
            Ok(runtime) => {
                let manager = self.clone();
                HandleState::Scheduled(runtime.spawn(async move {
                    tokio::time::sleep(LOGIN_VERIFY_DELAY).await;
                    let verdict = manager.self_check(auth_data.as_deref());
                    manager.reload_messages().await;
                    verdict
                }))
            }
            Err(_) => {
                debug!("No async runtime, running login self-check inline");
                HandleState::Done(self.self_check(auth_data.as_deref()))
            }
        };
        VerificationHandle { state }
    }

    /// Check that a just-stored login is visible and compensate if not:
    /// force the logged-in override and keep `auth_data` in memory and under
    /// the backup key.
    pub fn self_check(&self, auth_data: Option<&str>) -> Verdict {
        let observed = self.state();
        if !Verdict::needs_compensation(observed) {
            return Verdict::Consistent;
        }

        warn!(state = ?observed, "Login not visible in storage, compensating");
        self.inner.context.update(|f| {
            f.logged_in = Some(true);
            if let Some(auth_data) = auth_data {
                f.auth_data_fallback = Some(auth_data.to_string());
            }
        });
        if let Some(auth_data) = auth_data {
            self.persist(
                BackendKind::Local,
                keys::COOKIE_AUTH_DATA,
                auth_data,
                WriteOptions::default(),
            );
        }
        self.inner.context.invalidate_cache();
        Verdict::Compensated
    }

    /// Persist credentials from a successful registration. The session is
    /// treated as logged in immediately, without a self-check.
    pub fn on_register_success(&self, payload: &AuthPayload) -> Result<(), SessionError> {
        if !payload.has_credentials() {
            return Err(SessionError::IncompletePayload);
        }
        info!("Storing registration credentials");

        let cookie_ok = self.store_credentials(payload, SESSION_COOKIE_DAYS);
        if let Some(is_admin) = payload.is_admin {
            let flag = if is_admin { "1" } else { "0" };
            self.persist(BackendKind::Local, keys::IS_ADMIN, flag, WriteOptions::default());
        }

        let fallback = payload.auth_data().map(str::to_string);
        self.inner.context.update(|f| {
            f.logged_in = Some(true);
            f.logging_out = false;
            f.auth_data_fallback = fallback;
            f.cookie_write_failed = !cookie_ok;
        });
        self.inner.context.invalidate_cache();
        self.schedule_settle();

        if let Ok(runtime) = Handle::try_current() {
            let manager = self.clone();
            runtime.spawn(async move {
                tokio::time::sleep(REGISTER_NOTIFY_DELAY).await;
                manager.reload_messages().await;
                manager.inner.notifier.language_changed();
            });
        }
        Ok(())
    }

    /// User-initiated logout. Always succeeds.
    pub async fn logout(&self) -> LogoutOutcome {
        info!("Logging out");
        self.inner.context.update(|f| f.logging_out = true);
        let guard = LogoutGuard(&self.inner.context);
        self.full_clear();

        tokio::time::sleep(LOGOUT_NOTIFY_DELAY).await;
        self.reload_messages().await;
        drop(guard);

        LogoutOutcome {
            redirect_url: LOGOUT_ROUTE.to_string(),
        }
    }

    /// Immediate logout for an expired session. No notification.
    pub fn force_logout(&self) {
        info!("Forcing logout");
        self.full_clear();
    }

    /// Send the user to the login view unless they are already on an auth view.
    /// Returns whether a redirect was issued.
    pub fn redirect_to_login(&self) -> bool {
        if is_auth_view(&self.inner.navigator.current()) {
            return false;
        }
        self.inner.navigator.redirect(LOGIN_ROUTE);
        true
    }

    /// Drop every credential from every backend and reset the overrides.
    pub(crate) fn full_clear(&self) {
        for key in LOCAL_KEYS {
            self.discard(BackendKind::Local, key);
        }
        for key in SESSION_KEYS {
            self.discard(BackendKind::Session, key);
        }
        for name in COOKIE_NAMES {
            self.discard(BackendKind::Cookie, name);
        }
        self.inner.user_store.clear_user();

        self.inner.context.update(|f| {
            f.logged_in = Some(false);
            f.auth_data_fallback = None;
            f.cookie_write_failed = false;
        });
        self.inner.context.invalidate_cache();
        self.schedule_settle();
    }
}
