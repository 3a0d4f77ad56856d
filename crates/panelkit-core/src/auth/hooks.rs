//! Hooks the session layer calls out to.
//!
//! - `Notifier`: reloads translated messages after credential changes
//! - `UserStore`: the UI's reactive user state

use futures::future::{self, BoxFuture};

pub trait Notifier: Send + Sync {
    /// Reload messages whose content depends on the login state.
    fn reload_messages(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Signal that the active locale's messages changed.
    fn language_changed(&self) {}
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn reload_messages(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

pub trait UserStore: Send + Sync {
    /// Record a fresh login token.
    fn login(&self, token: &str);

    /// Drop all user state.
    fn clear_user(&self);

    /// The store's own view of the login state, if it has one.
    fn is_logged_in(&self) -> Option<bool> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUserStore;

impl UserStore for NoopUserStore {
    fn login(&self, _token: &str) {}

    fn clear_user(&self) {}
}
