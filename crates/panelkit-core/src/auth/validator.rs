use tracing::{debug, info, warn};

use super::manager::SessionManager;
use crate::api::{ApiClient, ApiError};

const EXPIRED_NOTICE: &str = "Session expired, please log in again";

/// Result of a remote session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    /// `None` when the backend could not be asked; the local session is left alone.
    pub is_logged_in: Option<bool>,
    pub message: Option<String>,
}

impl RemoteStatus {
    fn logged_in() -> Self {
        Self {
            is_logged_in: Some(true),
            message: None,
        }
    }

    fn logged_out(message: Option<&str>) -> Self {
        Self {
            is_logged_in: Some(false),
            message: message.map(str::to_string),
        }
    }

    fn unknown(message: String) -> Self {
        Self {
            is_logged_in: None,
            message: Some(message),
        }
    }
}

/// Asks the backend whether the stored credential still names a live session.
#[derive(Clone)]
pub struct SessionValidator {
    client: ApiClient,
}

impl SessionValidator {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn session(&self) -> &SessionManager {
        self.client.session()
    }

    pub async fn check_remote_session(&self) -> RemoteStatus {
        let session = self.session();

        let credential = session
            .has_credentials()
            .then(|| session.resolve_auth_header())
            .flatten();
        let Some(auth_data) = credential else {
            debug!("No local credentials, skipping remote check");
            session.force_logout();
            return RemoteStatus::logged_out(None);
        };

        match self.client.check_login(&auth_data).await {
            Ok(true) => {
                session.context().update(|f| f.logged_in = Some(true));
                RemoteStatus::logged_in()
            }
            Ok(false) => self.expire(),
            Err(e) => match e.downcast_ref::<ApiError>() {
                Some(ApiError::SessionExpired) => self.expire(),
                _ => {
                    warn!(error = %e, "Remote session check failed, keeping local session");
                    RemoteStatus::unknown(e.to_string())
                }
            },
        }
    }

    fn expire(&self) -> RemoteStatus {
        info!("Remote session is no longer valid");
        self.session().force_logout();
        self.session().redirect_to_login();
        RemoteStatus::logged_out(Some(EXPIRED_NOTICE))
    }
}
