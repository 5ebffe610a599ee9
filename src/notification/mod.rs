//! Notices presented to the user interface layer.
//!
//! The recovery engine never draws anything itself. It publishes a
//! [`Notice`] on the event bus and UI collaborators decide how to show it.
//! Each variant carries the data needed to display a meaningful message.

mod renderer;

pub use renderer::{NoticeRenderer, Palette};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Urgency of a transient notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Something failed and features may be unavailable.
    Error,
    /// Something failed but the session continues normally.
    Warning,
    /// Informational.
    Info,
}

/// Actions offered on a blocking notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeAction {
    /// Restart the session (leaves safe mode).
    Reload,
    /// Open the error report flow.
    Report,
}

impl NoticeAction {
    /// Button label.
    pub fn label(&self) -> &'static str {
        match self {
            NoticeAction::Reload => "Reload",
            NoticeAction::Report => "Report Issue",
        }
    }
}

/// A notice for the UI layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A modal notice that requires an action before continuing.
    Blocking {
        /// Short heading.
        title: String,
        /// Body text.
        message: String,
        /// Actions the user can pick.
        actions: Vec<NoticeAction>,
    },

    /// An auto-dismissing notice.
    Transient {
        /// How urgent the notice is.
        level: NoticeLevel,
        /// Body text.
        message: String,
        /// How long the notice stays on screen.
        duration: Duration,
    },

    /// A failed call is being retried.
    Retrying {
        /// The current attempt number (1-based).
        attempt: u32,
        /// Maximum number of attempts configured.
        max_attempts: u32,
        /// Delay before the retry is dispatched.
        delay: Duration,
        /// What is being retried.
        origin: String,
    },

    /// A notice that stays until the session reloads.
    Persistent {
        /// Body text.
        message: String,
    },
}

impl Notice {
    /// The blocking notice shown for critical failures.
    pub fn critical() -> Self {
        Self::Blocking {
            title: "Critical Error".to_string(),
            message: "A critical error has occurred. The application may not function properly."
                .to_string(),
            actions: vec![NoticeAction::Reload, NoticeAction::Report],
        }
    }

    /// Creates a new Transient notice.
    pub fn transient(level: NoticeLevel, message: impl Into<String>, duration: Duration) -> Self {
        Self::Transient {
            level,
            message: message.into(),
            duration,
        }
    }

    /// Creates a new Retrying notice.
    pub fn retrying(
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        origin: impl Into<String>,
    ) -> Self {
        Self::Retrying {
            attempt,
            max_attempts,
            delay,
            origin: origin.into(),
        }
    }

    /// The persistent notice shown while safe mode is active.
    pub fn safe_mode() -> Self {
        Self::Persistent {
            message: "Safe mode enabled. Advanced features are temporarily disabled.".to_string(),
        }
    }

    /// Returns true if the notice blocks the user until acted upon.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking { .. })
    }

    /// Returns true if the notice dismisses itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Retrying { .. })
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking { title, message, .. } => write!(f, "{}: {}", title, message),
            Self::Transient { message, .. } => f.write_str(message),
            Self::Retrying {
                attempt,
                max_attempts,
                delay,
                origin,
            } => write!(
                f,
                "Retrying ({}/{}) in {} ms: {}",
                attempt,
                max_attempts,
                delay.as_millis(),
                origin
            ),
            Self::Persistent { message } => f.write_str(message),
        }
    }
}
