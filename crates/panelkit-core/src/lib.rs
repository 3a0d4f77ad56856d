//! Session persistence and API access for a subscription panel dashboard.
//!
//! Credentials are written redundantly to a persistent store, a cookie jar
//! and a transient store. `SessionManager` derives one login state from them
//! and compensates when a backend silently drops a write.

pub mod api;
pub mod auth;
pub mod config;
pub mod env;
pub mod location;
pub mod storage;

pub use api::{ApiClient, ApiError};
pub use auth::{
    AuthPayload, CredentialCodec, CredentialResolver, RemoteStatus, SessionError, SessionManager,
    SessionValidator,
};
pub use config::{DeploymentConfig, PanelType, PersistentStore};
pub use env::Environment;

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Use RUST_LOG to see logs from a test run (e.g. RUST_LOG=panelkit_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}
