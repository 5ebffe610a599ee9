//! Severity classification for failure events.
//!
//! Classification is a pure, total function over the closed set of
//! [`FailureKind`] variants. Rules are evaluated in order and the first
//! match wins:
//!
//! 1. script faults that reference a missing property, method or name are
//!    `Critical`
//! 2. network failures: status >= 500 or no response is `High`, 4xx is
//!    `Medium`
//! 3. unobserved rejections are `Medium`
//! 4. anything else is `Low`

use std::fmt;

use serde::{Deserialize, Serialize};

use super::failure::{FailureEvent, FailureKind, ScriptFault};

/// Severity tier of a failure, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Logged only.
    Low,
    /// Low-urgency notice, no automatic retry.
    Medium,
    /// Transient notice, network failures are retried with backoff.
    High,
    /// Blocking notice and safe mode.
    Critical,
}

impl Severity {
    /// All tiers, from least to most severe.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the severity tier of a failure event.
pub fn classify(event: &FailureEvent) -> Severity {
    match event.kind {
        FailureKind::Script {
            fault:
                ScriptFault::MissingProperty
                | ScriptFault::NotAFunction
                | ScriptFault::UnresolvedReference,
        } => Severity::Critical,
        FailureKind::Network { status: None } => Severity::High,
        FailureKind::Network { status: Some(s) } if s >= 500 => Severity::High,
        FailureKind::Network { status: Some(s) } if s >= 400 => Severity::Medium,
        FailureKind::Rejection => Severity::Medium,
        _ => Severity::Low,
    }
}

/// A failure event tagged with its severity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFailure {
    /// The raw event.
    pub event: FailureEvent,
    /// Severity derived by [`classify`].
    pub severity: Severity,
}

impl ClassifiedFailure {
    /// Classifies an event.
    pub fn new(event: FailureEvent) -> Self {
        let severity = classify(&event);
        Self { event, severity }
    }

    /// Identity key of the underlying event.
    pub fn identity(&self) -> String {
        self.event.identity()
    }
}

impl From<FailureEvent> for ClassifiedFailure {
    fn from(event: FailureEvent) -> Self {
        Self::new(event)
    }
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.event)
    }
}

impl std::error::Error for ClassifiedFailure {}
