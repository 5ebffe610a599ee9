//! Tier-specific recovery policy.
//!
//! The [`RecoveryEngine`] decides what happens after a failure has been
//! classified:
//!
//! - `critical`: blocking notice with reload/report actions, safe mode
//! - `high`: transient notice, network failures retried with backoff
//! - `medium`: low-urgency transient notice
//! - `low`: nothing visible
//!
//! Retries are counted per failure identity so a failure that keeps coming
//! back is retried a bounded number of times and then only reported.

pub mod retry;
pub mod safe_mode;

pub use retry::{RetryCounter, RetryStrategy};
pub use safe_mode::SafeMode;

use std::time::Duration;

use crate::error::{ClassifiedFailure, Severity};
use crate::events::{EventBus, RuntimeEvent};
use crate::notification::{Notice, NoticeLevel};

/// What the caller should do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing beyond what was already reported.
    None,
    /// Wait `delay` and dispatch again.
    Retry {
        /// Retry number (1-based).
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
    },
    /// The retry budget for this failure is spent.
    GiveUp {
        /// Retries that were made.
        attempts: u32,
    },
    /// The session was degraded into safe mode.
    SafeMode,
}

/// Policy knobs for the recovery engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Backoff for high-severity network failures.
    pub retry: RetryStrategy,
    /// How long high-severity notices stay up.
    pub high_notice: Duration,
    /// How long medium-severity notices stay up.
    pub medium_notice: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            retry: RetryStrategy::default(),
            high_notice: Duration::from_secs(10),
            medium_notice: Duration::from_secs(5),
        }
    }
}

/// Executes the recovery policy for classified failures.
#[derive(Debug)]
pub struct RecoveryEngine {
    policy: RecoveryPolicy,
    counter: RetryCounter,
    safe_mode: SafeMode,
    events: EventBus,
}

impl RecoveryEngine {
    /// Creates an engine publishing on `events` and driving `safe_mode`.
    pub fn new(policy: RecoveryPolicy, safe_mode: SafeMode, events: EventBus) -> Self {
        Self {
            policy,
            counter: RetryCounter::new(),
            safe_mode,
            events,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// The safe-mode flag this engine drives.
    pub fn safe_mode(&self) -> &SafeMode {
        &self.safe_mode
    }

    /// Retries recorded so far for `identity`.
    pub fn attempts(&self, identity: &str) -> u32 {
        self.counter.get(identity)
    }

    /// Applies the policy for `failure`.
    pub fn recover(&self, failure: &ClassifiedFailure) -> RecoveryAction {
        self.apply(failure, true)
    }

    /// Applies the policy for a failure its caller will not retry. Notices
    /// and safe mode behave as in [`recover`](Self::recover); no retry is
    /// counted or announced.
    pub fn recover_terminal(&self, failure: &ClassifiedFailure) -> RecoveryAction {
        self.apply(failure, false)
    }

    fn apply(&self, failure: &ClassifiedFailure, retryable: bool) -> RecoveryAction {
        match failure.severity {
            Severity::Critical => self.degrade(failure),
            Severity::High => {
                self.notify(Notice::transient(
                    NoticeLevel::Error,
                    "A significant error occurred. Some features may be temporarily unavailable.",
                    self.policy.high_notice,
                ));
                if retryable && failure.event.kind.is_network() {
                    self.schedule_retry(failure)
                } else {
                    RecoveryAction::None
                }
            }
            Severity::Medium => {
                self.notify(Notice::transient(
                    NoticeLevel::Warning,
                    "An error occurred, but the application should continue to work normally.",
                    self.policy.medium_notice,
                ));
                RecoveryAction::None
            }
            Severity::Low => {
                tracing::debug!(failure = %failure.event, "low severity failure recorded");
                RecoveryAction::None
            }
        }
    }

    /// Forgets the retry history of `identity` after the operation succeeded.
    pub fn resolve(&self, identity: &str) {
        self.counter.reset(identity);
    }

    /// Forgets all retry history.
    pub fn reset(&self) {
        self.counter.clear();
    }

    fn degrade(&self, failure: &ClassifiedFailure) -> RecoveryAction {
        tracing::error!(failure = %failure.event, "critical failure, entering safe mode");
        self.notify(Notice::critical());

        if self.safe_mode.enter() {
            self.events.publish(RuntimeEvent::SafeModeEntered);
            self.notify(Notice::safe_mode());
        }
        RecoveryAction::SafeMode
    }

    fn schedule_retry(&self, failure: &ClassifiedFailure) -> RecoveryAction {
        let identity = failure.identity();
        let strategy = &self.policy.retry;

        let previous = self.counter.get(&identity);
        if !strategy.allows(previous) {
            self.counter.reset(&identity);
            tracing::warn!(
                failure = %failure.event,
                attempts = previous,
                "retry budget exhausted"
            );
            return RecoveryAction::GiveUp { attempts: previous };
        }

        let attempt = self.counter.bump(&identity);
        let delay = strategy.calculate_delay(attempt);
        let origin = failure
            .event
            .origin
            .clone()
            .unwrap_or_else(|| failure.event.message.clone());

        tracing::info!(
            origin = %origin,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );
        self.notify(Notice::retrying(
            attempt + 1,
            strategy.max_attempts,
            delay,
            origin,
        ));

        RecoveryAction::Retry {
            attempt: attempt + 1,
            delay,
        }
    }

    fn notify(&self, notice: Notice) {
        self.events.publish(RuntimeEvent::Notice(notice));
    }
}
