//! Session persistence for the panel dashboard.
//!
//! - `SessionManager`: derives the login state and owns every transition
//! - `CredentialResolver`: picks the `Authorization` value for a request
//! - `SessionValidator`: asks the backend whether the session is still valid
//! - `CredentialCodec`: site-tagged values for the cookie store and its backup

pub mod codec;
pub mod context;
pub mod hooks;
pub mod manager;
pub mod payload;
pub mod resolver;
pub mod validator;

use thiserror::Error;

pub use codec::CredentialCodec;
pub use context::{SessionContext, SessionFlags};
pub use hooks::{NoopNotifier, NoopUserStore, Notifier, UserStore};
pub use manager::{LogoutOutcome, SessionManager, SessionState, VerificationHandle, Verdict};
pub use payload::AuthPayload;
pub use resolver::CredentialResolver;
pub use validator::{RemoteStatus, SessionValidator};

/// Storage key names shared by every backend.
pub mod keys {
    pub const TOKEN: &str = "token";
    pub const AUTH_DATA: &str = "auth_data";
    /// Local backup of `auth_data`, tagged or plain
    pub const COOKIE_AUTH_DATA: &str = "cookie_auth_data";
    pub const USER_INFO: &str = "userInfo";
    pub const IS_ADMIN: &str = "is_admin";
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Login data is incomplete: neither token nor auth_data present")]
    IncompletePayload,
}
