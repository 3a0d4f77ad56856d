//! API client for the panel backend.
//!
//! Every request carries the resolved `Authorization` credential. A response
//! reporting an expired session logs the user out before the error reaches
//! the caller.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::SESSION_EXPIRED_MESSAGE;
use super::ApiError;
use crate::auth::{AuthPayload, SessionError, SessionManager, VerificationHandle};
use crate::config::{DeploymentConfig, PanelType};

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Client-side only; picks the cookie lifetime
    #[serde(skip)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recaptcha_data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub password: String,
    pub email_code: String,
}

#[derive(Debug, Serialize)]
struct EmailVerifyRequest<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    isforget: Option<u8>,
}

/// A login whose credentials were stored, plus its pending self-check.
#[derive(Debug)]
pub struct LoginOutcome {
    pub payload: AuthPayload,
    pub verification: VerificationHandle,
}

/// Responses either wrap their payload in `data` or return it bare.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_payload(body: Value) -> Result<AuthPayload> {
    let payload: AuthPayload = match unwrap_data(body) {
        Value::Object(map) => serde_json::from_value(Value::Object(map))
            .context("Failed to parse credentials")?,
        _ => AuthPayload::default(),
    };
    if !payload.has_credentials() {
        return Err(SessionError::IncompletePayload.into());
    }
    Ok(payload)
}

/// API client for the panel backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    panel_type: PanelType,
    session: SessionManager,
}

impl ApiClient {
    pub fn new(config: &DeploymentConfig, session: SessionManager) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            panel_type: config.panel_type,
            session,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(auth_data) = self.session.resolve_auth_header() {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&auth_data)
                    .context("Stored credential is not a valid header value")?,
            );
        }
        Ok(headers)
    }

    /// The session is gone: clear it and leave the current view.
    fn on_session_expired(&self) {
        warn!("Backend reports the session expired, logging out");
        self.session.force_logout();
        self.session.redirect_to_login();
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = ApiError::from_status(status, &body);
        if error.is_session_expired() {
            self.on_session_expired();
        }
        Err(error.into())
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Value> {
        let response = request
            .headers(self.auth_headers()?)
            .send()
            .await
            .map_err(ApiError::from_transport)?;
        let response = self.check_response(response).await?;

        let text = response
            .text()
            .await
            .map_err(ApiError::from_transport)?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))?;

        if body.get("message").and_then(Value::as_str) == Some(SESSION_EXPIRED_MESSAGE) {
            self.on_session_expired();
            return Err(ApiError::SessionExpired.into());
        }
        Ok(body)
    }

    pub(super) async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        debug!(path = path, "GET");
        let request = self.client.get(self.url(path)).query(query);
        self.send(request, path).await
    }

    pub(super) async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        debug!(path = path, form = self.panel_type.uses_form_bodies(), "POST");
        let request = self.client.post(self.url(path));
        let request = if self.panel_type.uses_form_bodies() {
            request.form(body)
        } else {
            request.json(body)
        };
        self.send(request, path).await
    }

    pub(super) fn data<T: DeserializeOwned>(body: Value, path: &str) -> Result<T> {
        serde_json::from_value(unwrap_data(body))
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)).into())
    }

    // ===== Authentication =====

    /// Log in and store the returned credentials.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome> {
        let body = self.post("/passport/auth/login", request).await?;
        let payload = parse_payload(body)?;
        let verification = self.session.on_login_success(&payload, request.remember_me)?;
        info!("Logged in");
        Ok(LoginOutcome {
            payload,
            verification,
        })
    }

    /// Register and store the returned credentials.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload> {
        let body = self.post("/passport/auth/register", request).await?;
        let payload = parse_payload(body)?;
        self.session.on_register_success(&payload)?;
        info!("Registered");
        Ok(payload)
    }

    /// Exchange a one-time verification token for a session.
    pub async fn token_login(&self, verify: &str, redirect: Option<&str>) -> Result<LoginOutcome> {
        let query = [("verify", verify), ("redirect", redirect.unwrap_or_default())];
        let body = self.get("/passport/auth/token2Login", &query).await?;
        let payload = parse_payload(body)?;
        let verification = self.session.on_login_success(&payload, false)?;
        Ok(LoginOutcome {
            payload,
            verification,
        })
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<bool> {
        let body = self.post("/passport/auth/forget", request).await?;
        Ok(unwrap_data(body).as_bool().unwrap_or(false))
    }

    /// Send an email verification code. `for_password_reset` is only
    /// transmitted to Xiao-V2board, which distinguishes the two flows.
    pub async fn send_email_verify(&self, email: &str, for_password_reset: bool) -> Result<bool> {
        let isforget = (self.panel_type == PanelType::XiaoV2board).then_some(u8::from(for_password_reset));
        let request = EmailVerifyRequest { email, isforget };
        let body = self.post("/passport/comm/sendEmailVerify", &request).await?;
        Ok(unwrap_data(body).as_bool().unwrap_or(false))
    }

    // ===== Site =====

    /// Public site configuration; needs no session.
    pub async fn get_website_config(&self) -> Result<Value> {
        let path = "/guest/comm/config";
        Self::data(self.get(path, &[]).await?, path)
    }

    /// Ask the backend whether `auth_data` still identifies a session.
    pub async fn check_login(&self, auth_data: &str) -> Result<bool> {
        let request = self
            .client
            .get(self.url("/user/checkLogin"))
            .header(header::AUTHORIZATION, auth_data);
        let response = request.send().await.map_err(ApiError::from_transport)?;
        let response = self.check_response(response).await?;
        let body: Value = response.json().await.map_err(ApiError::from_transport)?;

        if body.get("message").and_then(Value::as_str) == Some(SESSION_EXPIRED_MESSAGE) {
            self.on_session_expired();
            return Err(ApiError::SessionExpired.into());
        }
        Ok(body
            .get("data")
            .and_then(|data| data.get("is_login"))
            .and_then(Value::as_bool)
            == Some(true))
    }
}
