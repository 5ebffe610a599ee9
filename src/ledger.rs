//! Bounded history of classified failures.
//!
//! The ledger is append-only and capped: once full, the oldest entry is
//! evicted for every new one. When backed by a store, the most recent
//! entries are written behind every mutation so the history survives a
//! restart. Inside a tokio runtime the write happens on the blocking pool
//! and bursts of appends coalesce into one write; [`ErrorLedger::flush`]
//! writes synchronously. Persistence problems are logged and swallowed;
//! recording a failure never fails.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{ClassifiedFailure, Severity};
use crate::session::{KeyValueStore, ERROR_LOG_KEY};

/// Default in-memory capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default number of entries written to the store.
pub const DEFAULT_PERSIST_LIMIT: usize = 100;

/// Summary counts over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Number of entries.
    pub total: usize,
    /// Entries per failure kind label.
    pub by_kind: BTreeMap<String, usize>,
    /// Entries per severity.
    pub by_severity: BTreeMap<Severity, usize>,
    /// Entries recorded during the last hour.
    pub recent: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: VecDeque<ClassifiedFailure>,
    /// Bumped on every mutation.
    generation: u64,
}

#[derive(Debug)]
struct Persistence {
    store: Arc<dyn KeyValueStore>,
    limit: usize,
    /// Generation the store reflects. Held while writing.
    written: Mutex<u64>,
    /// A background write is queued and has not taken its snapshot yet.
    scheduled: AtomicBool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<LedgerState>,
    capacity: usize,
    persistence: Option<Persistence>,
}

impl Shared {
    /// Writes the newest snapshot unless a newer one is already stored.
    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let (generation, json) = {
            let state = self.state.lock();
            let skip = state.entries.len().saturating_sub(persistence.limit);
            let tail: Vec<&ClassifiedFailure> = state.entries.iter().skip(skip).collect();
            (state.generation, serde_json::to_string(&tail))
        };

        let mut written = persistence.written.lock();
        if *written >= generation {
            return;
        }

        let outcome = json
            .map_err(|e| e.to_string())
            .and_then(|json| {
                persistence
                    .store
                    .set(ERROR_LOG_KEY, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "failed to persist error log, dropping stored copy");
            // A stale copy is worse than none.
            let _ = persistence.store.remove(ERROR_LOG_KEY);
        }
        *written = generation;
    }
}

/// Capped, optionally persisted failure log.
#[derive(Debug)]
pub struct ErrorLedger {
    shared: Arc<Shared>,
}

impl ErrorLedger {
    /// Creates an in-memory ledger.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LedgerState::default()),
                capacity: capacity.max(1),
                persistence: None,
            }),
        }
    }

    /// Creates a ledger persisted to `store`, restoring whatever history the
    /// store already holds.
    pub fn persistent(
        capacity: usize,
        persist_limit: usize,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let capacity = capacity.max(1);
        let mut restored = restore(store.as_ref());
        while restored.len() > capacity {
            restored.pop_front();
        }

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LedgerState {
                    entries: restored,
                    generation: 0,
                }),
                capacity,
                persistence: Some(Persistence {
                    store,
                    limit: persist_limit.min(capacity),
                    written: Mutex::new(0),
                    scheduled: AtomicBool::new(false),
                }),
            }),
        }
    }

    /// Maximum number of entries kept in memory.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Appends a failure, evicting the oldest entry if the ledger is full.
    pub fn append(&self, failure: ClassifiedFailure) {
        {
            let mut state = self.shared.state.lock();
            state.entries.push_back(failure);
            while state.entries.len() > self.shared.capacity {
                state.entries.pop_front();
            }
            state.generation += 1;
        }
        self.schedule_persist();
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<ClassifiedFailure> {
        self.shared.state.lock().entries.iter().cloned().collect()
    }

    /// The `n` most recent entries, newest first.
    pub fn latest(&self, n: usize) -> Vec<ClassifiedFailure> {
        self.shared
            .state
            .lock()
            .entries
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    /// How many recorded entries share `identity`.
    pub fn occurrences(&self, identity: &str) -> usize {
        self.shared
            .state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.identity() == identity)
            .count()
    }

    /// Summary counts relative to the current time.
    pub fn stats(&self) -> LedgerStats {
        self.stats_at(Utc::now())
    }

    /// Summary counts relative to `now`.
    pub fn stats_at(&self, now: DateTime<Utc>) -> LedgerStats {
        let state = self.shared.state.lock();
        let cutoff = now - ChronoDuration::hours(1);

        let mut stats = LedgerStats {
            total: state.entries.len(),
            ..LedgerStats::default()
        };
        for entry in state.entries.iter() {
            *stats
                .by_kind
                .entry(entry.event.kind.label().to_string())
                .or_default() += 1;
            *stats.by_severity.entry(entry.severity).or_default() += 1;
            if entry.event.timestamp > cutoff {
                stats.recent += 1;
            }
        }
        stats
    }

    /// Drops all entries, including the persisted copy.
    pub fn clear(&self) {
        let Some(persistence) = &self.shared.persistence else {
            self.shared.state.lock().entries.clear();
            return;
        };

        // Pending writers hold older snapshots and skip once this settles.
        let mut written = persistence.written.lock();
        let generation = {
            let mut state = self.shared.state.lock();
            state.entries.clear();
            state.generation += 1;
            state.generation
        };
        if let Err(e) = persistence.store.remove(ERROR_LOG_KEY) {
            tracing::warn!(error = %e, "failed to remove persisted error log");
        }
        *written = generation;
    }

    /// Writes the current history to the store, waiting for the write.
    pub fn flush(&self) {
        self.shared.persist();
    }

    fn schedule_persist(&self) {
        let Some(persistence) = &self.shared.persistence else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.shared.persist();
            return;
        };
        if persistence.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        handle.spawn_blocking(move || {
            if let Some(persistence) = &shared.persistence {
                persistence.scheduled.store(false, Ordering::Release);
            }
            shared.persist();
        });
    }
}

fn restore(store: &dyn KeyValueStore) -> VecDeque<ClassifiedFailure> {
    match store.get(ERROR_LOG_KEY) {
        Ok(Some(json)) => match serde_json::from_str::<Vec<ClassifiedFailure>>(&json) {
            Ok(entries) => entries.into(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable persisted error log");
                VecDeque::new()
            }
        },
        Ok(None) => VecDeque::new(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read persisted error log");
            VecDeque::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureEvent, ScriptFault};
    use crate::session::MemoryStore;

    fn failure(n: usize) -> ClassifiedFailure {
        FailureEvent::network(Some(500), format!("HTTP 500 #{}", n)).into()
    }

    #[test]
    fn test_append_keeps_insertion_order() {
        let ledger = ErrorLedger::new(10);
        for n in 0..3 {
            ledger.append(failure(n));
        }

        let messages: Vec<String> = ledger
            .entries()
            .into_iter()
            .map(|e| e.event.message)
            .collect();
        assert_eq!(messages, vec!["HTTP 500 #0", "HTTP 500 #1", "HTTP 500 #2"]);
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let ledger = ErrorLedger::new(1000);
        for n in 0..1200 {
            ledger.append(failure(n));
        }

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1000);
        assert_eq!(entries[0].event.message, "HTTP 500 #200");
        assert_eq!(entries[999].event.message, "HTTP 500 #1199");
    }

    #[test]
    fn test_latest_is_newest_first() {
        let ledger = ErrorLedger::new(10);
        for n in 0..5 {
            ledger.append(failure(n));
        }
        let latest = ledger.latest(2);
        assert_eq!(latest[0].event.message, "HTTP 500 #4");
        assert_eq!(latest[1].event.message, "HTTP 500 #3");
    }

    #[test]
    fn test_occurrences_by_identity() {
        let ledger = ErrorLedger::new(10);
        let repeated: ClassifiedFailure = FailureEvent::network(None, "refused")
            .with_origin("http://h/a")
            .into();
        ledger.append(repeated.clone());
        ledger.append(repeated.clone());
        ledger.append(failure(1));

        assert_eq!(ledger.occurrences(&repeated.identity()), 2);
        assert_eq!(ledger.occurrences("network:nope:"), 0);
    }

    #[test]
    fn test_stats() {
        let ledger = ErrorLedger::new(10);
        let now = Utc::now();

        ledger.append(failure(0));
        ledger.append(FailureEvent::rejection("lost").into());
        ledger.append(
            ClassifiedFailure::new(
                FailureEvent::script(ScriptFault::NotAFunction, "x")
                    .at(now - ChronoDuration::hours(2)),
            ),
        );

        let stats = ledger.stats_at(now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get("network"), Some(&1));
        assert_eq!(stats.by_kind.get("rejection"), Some(&1));
        assert_eq!(stats.by_kind.get("script"), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::Medium), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::Critical), Some(&1));
        assert_eq!(stats.recent, 2);
    }

    #[test]
    fn test_persisted_history_is_bounded_and_restored() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let ledger = ErrorLedger::persistent(50, 10, store.clone());
            for n in 0..30 {
                ledger.append(failure(n));
            }
            assert_eq!(ledger.len(), 30);
        }

        let restored = ErrorLedger::persistent(50, 10, store);
        let entries = restored.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].event.message, "HTTP 500 #20");
        assert_eq!(entries[9].event.message, "HTTP 500 #29");
    }

    #[test]
    fn test_clear_removes_persisted_copy() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = ErrorLedger::persistent(10, 10, store.clone());
        ledger.append(failure(0));
        assert!(store.get(ERROR_LOG_KEY).unwrap().is_some());

        ledger.clear();
        assert!(ledger.is_empty());
        assert!(store.get(ERROR_LOG_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_appends_are_written_behind() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = ErrorLedger::persistent(50, 10, store.clone());
        for n in 0..30 {
            ledger.append(failure(n));
        }

        ledger.flush();
        let persisted: Vec<ClassifiedFailure> =
            serde_json::from_str(&store.get(ERROR_LOG_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted.len(), 10);
        assert_eq!(persisted[9].event.message, "HTTP 500 #29");
    }

    #[tokio::test]
    async fn test_cleared_log_is_not_rewritten_by_pending_writes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ledger = ErrorLedger::persistent(50, 10, store.clone());
        for n in 0..20 {
            ledger.append(failure(n));
        }
        ledger.clear();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ledger.flush();
        assert!(store.get(ERROR_LOG_KEY).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_persisted_log_is_ignored() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(ERROR_LOG_KEY, "not json").unwrap();

        let ledger = ErrorLedger::persistent(10, 10, store);
        assert!(ledger.is_empty());
    }
}
