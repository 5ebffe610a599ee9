//! Typed signals for collaborators.
//!
//! UI, navigation and diagnostics collaborators subscribe to the runtime's
//! [`EventBus`] instead of listening on ambient globals. Publishing never
//! blocks and never fails: with no subscriber the event is dropped.

use tokio::sync::broadcast;

use crate::error::ClassifiedFailure;
use crate::notification::Notice;

/// Default number of buffered events per subscriber.
const DEFAULT_CAPACITY: usize = 64;

/// Signals published by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A critical failure switched the session into safe mode.
    SafeModeEntered,
    /// The session ended (refresh failure or logout); navigate to login.
    SessionEnded {
        /// Why the session ended.
        reason: String,
    },
    /// A failure was classified and recorded.
    ErrorReported(ClassifiedFailure),
    /// Something to show to the user.
    Notice(Notice),
}

/// Broadcast channel owned by the runtime.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("event dropped: no subscribers");
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
