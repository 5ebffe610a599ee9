//! Exponential backoff and per-failure attempt counting.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Configuration for retry behavior with exponential backoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap for any retry attempt.
    pub max_delay: Duration,
    /// Maximum number of retries for one failure identity.
    pub max_attempts: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryStrategy {
    /// Creates a new retry strategy with the specified parameters.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(31); // Prevent overflow
        let multiplier = 1u64 << exponent;
        let base_millis = self.base_delay.as_millis() as u64;
        let delay_millis = base_millis.saturating_mul(multiplier);

        Duration::from_millis(delay_millis.min(self.max_delay.as_millis() as u64))
    }

    /// Returns true while `attempts` retries leave room for another.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Attempt counts keyed by failure identity.
#[derive(Debug, Default)]
pub struct RetryCounter {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryCounter {
    /// Creates an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts recorded for `identity`.
    pub fn get(&self, identity: &str) -> u32 {
        self.attempts.lock().get(identity).copied().unwrap_or(0)
    }

    /// Records one more attempt and returns the previous count.
    pub fn bump(&self, identity: &str) -> u32 {
        let mut attempts = self.attempts.lock();
        let slot = attempts.entry(identity.to_string()).or_insert(0);
        let previous = *slot;
        *slot += 1;
        previous
    }

    /// Forgets `identity`.
    pub fn reset(&self, identity: &str) {
        self.attempts.lock().remove(identity);
    }

    /// Forgets everything.
    pub fn clear(&self) {
        self.attempts.lock().clear();
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.attempts.lock().len()
    }
}
