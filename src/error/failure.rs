//! Raw failure events.
//!
//! A [`FailureEvent`] is immutable once built. The [`FailureKind`] is a closed
//! set of typed variants assigned where the failure is raised, so that
//! classification never has to inspect message text.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The shape of fault raised by synchronous collaborator code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFault {
    /// A property or field was read on a missing value.
    MissingProperty,
    /// Something that is not callable was called as a method.
    NotAFunction,
    /// A name could not be resolved.
    UnresolvedReference,
    /// Any other uncaught fault, including task panics.
    Other,
}

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// A transport failure (`status: None`) or a non-2xx HTTP outcome.
    Network {
        /// HTTP status, absent when no response was received.
        status: Option<u16>,
    },
    /// An uncaught fault in synchronous code.
    Script {
        /// Fault shape assigned at the throw site.
        fault: ScriptFault,
    },
    /// A deferred computation failed and nobody observed it.
    Rejection,
}

impl FailureKind {
    /// Short stable label used in identity keys and statistics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Network { .. } => "network",
            FailureKind::Script { .. } => "script",
            FailureKind::Rejection => "rejection",
        }
    }

    /// Returns true for network failures.
    pub fn is_network(&self) -> bool {
        matches!(self, FailureKind::Network { .. })
    }

    /// HTTP status carried by a network failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FailureKind::Network { status } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A runtime failure as observed at the point where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    /// What kind of failure this is.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
    /// Where it happened: a URL for network failures, a component or
    /// task name otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Additional context as key-value pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

impl FailureEvent {
    /// Creates a new failure event stamped with the current time.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            origin: None,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// A network failure. `status` is `None` when no response arrived.
    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network { status }, message)
    }

    /// An uncaught fault in synchronous code.
    pub fn script(fault: ScriptFault, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Script { fault }, message)
    }

    /// An unobserved failure of a deferred computation.
    pub fn rejection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejection, message)
    }

    /// Sets the origin of the failure.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Adds a context key-value pair.
    pub fn add_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Overrides the timestamp (used when restoring history).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Identity key: kind, message and origin.
    ///
    /// Two events with the same identity are considered the same failure
    /// repeating, which is what retry counting and repeat detection key on.
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind.label(),
            self.message,
            self.origin.as_deref().unwrap_or("")
        )
    }
}

impl fmt::Display for FailureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "[{}] {} ({})", self.kind, self.message, origin),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}
