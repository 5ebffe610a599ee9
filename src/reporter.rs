//! The single funnel every failure goes through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifiedFailure, FailureEvent, Severity};
use crate::events::{EventBus, RuntimeEvent};
use crate::ledger::ErrorLedger;
use crate::recovery::{RecoveryAction, RecoveryEngine};

/// What the "Report Issue" action submits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// The failure being reported.
    pub failure: ClassifiedFailure,
    /// Free text supplied by the user.
    pub description: String,
    /// Client identification, `name/version`.
    pub client: String,
    pub submitted_at: DateTime<Utc>,
}

impl ErrorReport {
    /// Creates a report stamped with the current time.
    pub fn new(failure: ClassifiedFailure, description: impl Into<String>) -> Self {
        Self {
            failure,
            description: description.into(),
            client: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            submitted_at: Utc::now(),
        }
    }
}

/// Classifies, records and recovers failures, then announces them.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    ledger: Arc<ErrorLedger>,
    engine: Arc<RecoveryEngine>,
    events: EventBus,
}

impl FailureReporter {
    /// Creates a reporter over the given ledger and engine.
    pub fn new(ledger: Arc<ErrorLedger>, engine: Arc<RecoveryEngine>, events: EventBus) -> Self {
        Self {
            ledger,
            engine,
            events,
        }
    }

    /// Reports a failure and returns what the recovery policy decided.
    pub fn report(&self, event: FailureEvent) -> RecoveryAction {
        self.record(event, true)
    }

    /// Reports a failure the caller gives up on immediately. It is recorded
    /// and announced like any other, but never schedules a retry.
    pub fn report_terminal(&self, event: FailureEvent) -> RecoveryAction {
        self.record(event, false)
    }

    fn record(&self, event: FailureEvent, retryable: bool) -> RecoveryAction {
        let failure = ClassifiedFailure::new(event);

        match failure.severity {
            Severity::Critical | Severity::High => {
                tracing::error!(severity = %failure.severity, failure = %failure.event, "failure reported")
            }
            Severity::Medium => {
                tracing::warn!(severity = %failure.severity, failure = %failure.event, "failure reported")
            }
            Severity::Low => {
                tracing::debug!(severity = %failure.severity, failure = %failure.event, "failure reported")
            }
        }

        self.ledger.append(failure.clone());
        let action = if retryable {
            self.engine.recover(&failure)
        } else {
            self.engine.recover_terminal(&failure)
        };
        self.events.publish(RuntimeEvent::ErrorReported(failure));
        action
    }

    /// Marks the failure `identity` as recovered.
    pub fn resolve(&self, identity: &str) {
        self.engine.resolve(identity);
    }

    /// The ledger failures are recorded in.
    pub fn ledger(&self) -> &Arc<ErrorLedger> {
        &self.ledger
    }

    /// The recovery engine.
    pub fn engine(&self) -> &Arc<RecoveryEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{RecoveryPolicy, SafeMode};

    fn reporter(events: EventBus) -> FailureReporter {
        let engine = RecoveryEngine::new(RecoveryPolicy::default(), SafeMode::new(), events.clone());
        FailureReporter::new(Arc::new(ErrorLedger::new(10)), Arc::new(engine), events)
    }

    #[test]
    fn test_every_severity_is_recorded() {
        let reporter = reporter(EventBus::default());

        reporter.report(FailureEvent::network(Some(302), "HTTP 302"));
        reporter.report(FailureEvent::network(Some(404), "HTTP 404"));
        reporter.report(FailureEvent::network(None, "refused"));

        let severities: Vec<Severity> = reporter
            .ledger()
            .entries()
            .into_iter()
            .map(|entry| entry.severity)
            .collect();
        assert_eq!(
            severities,
            vec![Severity::Low, Severity::Medium, Severity::High]
        );
    }

    #[test]
    fn test_terminal_report_is_recorded_without_retry() {
        let reporter = reporter(EventBus::default());

        let action = reporter.report_terminal(
            FailureEvent::network(None, "refused").with_origin("http://h/auth/login"),
        );

        assert_eq!(action, RecoveryAction::None);
        let entries = reporter.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::High);
        assert_eq!(reporter.engine().attempts(&entries[0].identity()), 0);
    }

    #[test]
    fn test_error_report_body() {
        let failure = ClassifiedFailure::new(FailureEvent::network(Some(503), "HTTP 503"));
        let report = ErrorReport::new(failure, "chat stopped answering");

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["description"], "chat stopped answering");
        assert_eq!(body["failure"]["severity"], "high");
        assert!(body["client"].as_str().unwrap().starts_with("tokenwarden/"));
    }

    #[tokio::test]
    async fn test_error_reported_event_carries_classification() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let reporter = reporter(events);

        reporter.report(FailureEvent::rejection("lost"));

        loop {
            match rx.recv().await.unwrap() {
                RuntimeEvent::ErrorReported(failure) => {
                    assert_eq!(failure.severity, Severity::Medium);
                    assert_eq!(failure.event.message, "lost");
                    break;
                }
                _ => continue,
            }
        }
    }
}
