//! Session persistence: the credential pair and the key-value store it is
//! mirrored into.

pub mod store;

pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, StoreResult};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Store key holding the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Store key holding the signed-in user's profile as JSON.
pub const USER_KEY: &str = "user";

/// Store key holding the serialized error history.
pub const ERROR_LOG_KEY: &str = "error_log";

/// Bearer credential pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Token attached to outgoing calls.
    pub access_token: String,
    /// Token exchanged for a new access token on expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credential {
    /// Creates a credential.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Returns true if the credential can be refreshed.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Mirrors the credential into the persistent store.
///
/// Persistence is best-effort: a failing store is logged and the in-memory
/// session carries on.
#[derive(Debug, Clone)]
pub struct CredentialMirror {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialMirror {
    /// Creates a mirror over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Restores the last persisted credential. A missing access token
    /// means there is no session.
    pub fn load(&self) -> Option<Credential> {
        let access = match self.store.get(ACCESS_TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read persisted access token");
                return None;
            }
        };

        let refresh = match self.store.get(REFRESH_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read persisted refresh token");
                None
            }
        };

        Some(Credential::new(access, refresh))
    }

    /// Persists `credential`.
    pub fn save(&self, credential: &Credential) {
        if let Err(e) = self.store.set(ACCESS_TOKEN_KEY, &credential.access_token) {
            tracing::warn!(error = %e, "failed to persist access token");
        }

        let refresh = match &credential.refresh_token {
            Some(token) => self.store.set(REFRESH_TOKEN_KEY, token),
            None => self.store.remove(REFRESH_TOKEN_KEY),
        };
        if let Err(e) = refresh {
            tracing::warn!(error = %e, "failed to persist refresh token");
        }
    }

    /// Persists the profile the server returned for the signed-in user.
    /// `None` removes a previously stored profile.
    pub fn save_user(&self, user: Option<&serde_json::Value>) {
        let written = match user {
            Some(user) => serde_json::to_string(user)
                .map_err(StoreError::from)
                .and_then(|json| self.store.set(USER_KEY, &json)),
            None => self.store.remove(USER_KEY),
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to persist user profile");
        }
    }

    /// The persisted user profile, if any.
    pub fn load_user(&self) -> Option<serde_json::Value> {
        match self.store.get(USER_KEY) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable user profile");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read persisted user profile");
                None
            }
        }
    }

    /// Removes the persisted credential and user profile.
    pub fn clear(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(error = %e, key, "failed to remove persisted session");
            }
        }
    }
}
