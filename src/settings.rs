//! Runtime configuration.
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then environment variables of the form
//! `TOKENWARDEN__<SECTION>__<KEY>` (e.g. `TOKENWARDEN__RETRY__MAX_ATTEMPTS=5`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::ledger::{DEFAULT_CAPACITY, DEFAULT_PERSIST_LIMIT};
use crate::recovery::{RecoveryPolicy, RetryStrategy};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "TOKENWARDEN";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// A URL setting is not a valid URL.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The configuration could not be rendered.
    #[error("failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

/// Authentication endpoint paths, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub refresh_path: String,
    pub login_path: String,
    pub register_path: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            register_path: "/auth/register".to_string(),
        }
    }
}

/// Backoff for retried network failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Delay before the first retry; doubled for each further one.
    pub base_delay_ms: u64,
    /// Retries per failure identity before giving up.
    pub max_attempts: u32,
    /// Also retry POST and PATCH calls.
    pub retry_non_idempotent: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 3,
            retry_non_idempotent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Entries kept in memory.
    pub capacity: usize,
    /// Most recent entries persisted.
    pub persist_limit: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            persist_limit: DEFAULT_PERSIST_LIMIT,
        }
    }
}

/// How long transient notices stay up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeSettings {
    pub high_ms: u64,
    pub medium_ms: u64,
}

impl Default for NoticeSettings {
    fn default() -> Self {
        Self {
            high_ms: 10_000,
            medium_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    /// Per-attempt timeout; 0 disables it.
    pub timeout_ms: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Origin every relative path is resolved against.
    pub base_url: String,
    /// Path error reports are submitted to.
    pub report_path: String,
    /// Path answering the health check.
    pub health_path: String,
    /// Directory of the persisted session; `None` keeps it in memory.
    pub state_dir: Option<PathBuf>,
    pub auth: AuthSettings,
    pub retry: RetrySettings,
    pub ledger: LedgerSettings,
    pub notices: NoticeSettings,
    pub request: RequestSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            report_path: "/errors/report".to_string(),
            health_path: "/health".to_string(),
            state_dir: None,
            auth: AuthSettings::default(),
            retry: RetrySettings::default(),
            ledger: LedgerSettings::default(),
            notices: NoticeSettings::default(),
            request: RequestSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration from defaults, `path` if given, and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not exist or a source cannot be
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.display().to_string()));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: RuntimeConfig = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses a TOML document, without environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let settings: RuntimeConfig = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.base()?;
        Ok(())
    }

    fn base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })
    }

    /// Resolves `path` against `base_url`. Absolute URLs are returned as is.
    pub fn endpoint(&self, path: &str) -> Result<String, ConfigError> {
        let joined = self.base()?.join(path).map_err(|source| ConfigError::InvalidUrl {
            url: path.to_string(),
            source,
        })?;
        Ok(joined.to_string())
    }

    /// Per-attempt request timeout, `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// The recovery policy these settings describe.
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        let defaults = RetryStrategy::default();
        RecoveryPolicy {
            retry: RetryStrategy::new(
                Duration::from_millis(self.retry.base_delay_ms),
                defaults.max_delay,
                self.retry.max_attempts,
            ),
            high_notice: Duration::from_millis(self.notices.high_ms),
            medium_notice: Duration::from_millis(self.notices.medium_ms),
        }
    }
}
