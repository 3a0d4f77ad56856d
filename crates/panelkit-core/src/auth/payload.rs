use serde::{Deserialize, Deserializer, Serialize};

use crate::storage::is_usable;

/// Credentials returned by the login, register and token-login endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub auth_data: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_admin: Option<bool>,
}

/// Backends send admin flags as `1`/`0`, booleans or numeric strings.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::Number(n)) => n.as_i64().map(|n| n == 1),
        Some(serde_json::Value::String(s)) => Some(s == "1" || s == "true"),
        _ => None,
    })
}

impl AuthPayload {
    pub fn new(token: impl Into<String>, auth_data: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            auth_data: Some(auth_data.into()),
            is_admin: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| is_usable(t))
    }

    pub fn auth_data(&self) -> Option<&str> {
        self.auth_data.as_deref().filter(|a| is_usable(a))
    }

    /// At least one of token or auth_data is present.
    pub fn has_credentials(&self) -> bool {
        self.token().is_some() || self.auth_data().is_some()
    }
}
