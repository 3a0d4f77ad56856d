//! REST client for the panel backend.
//!
//! The client is built around a `SessionManager`: outgoing requests take
//! their `Authorization` value from the credential resolver, and responses
//! that report an expired session trigger a forced logout.

pub mod client;
pub mod error;
pub mod user;

pub use client::{ApiClient, LoginOutcome, LoginRequest, RegisterRequest, ResetPasswordRequest};
pub use error::{ApiError, SESSION_EXPIRED_MESSAGE};
pub use user::{OrderRequest, RemindSettings, TicketRequest};
