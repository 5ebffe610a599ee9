//! Credential ownership and the single-flight refresh protocol.
//!
//! # Components
//!
//! - [`refresh`]: the [`RefreshCoordinator`] state machine and its queue of
//!   callers waiting on a refresh
//! - wire types for the refresh, login and registration endpoints

pub mod refresh;

pub use refresh::{RefreshCoordinator, RefreshPhase};

use serde::{Deserialize, Serialize};

/// Absolute URLs of the authentication endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// `POST` target exchanging a refresh token for an access token.
    pub refresh_url: String,
    /// `POST` target exchanging user credentials for a token pair.
    pub login_url: String,
    /// `POST` target creating an account.
    pub register_url: String,
}

/// Body of the refresh call.
#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body of the login call.
#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// A new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Registration {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Token pair returned by the refresh, login and registration endpoints.
///
/// The refresh endpoint may omit `refresh_token`, in which case the current
/// one stays valid. Some login backends name the access token `token`.
/// Login and registration may also return the user's profile.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}
