//! Process-wide degraded mode.
//!
//! Entered after a critical failure. UI collaborators consult
//! [`SafeMode::is_active`] to switch off non-essential features. It stays
//! on until the session is explicitly reloaded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared safe-mode flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct SafeMode {
    active: Arc<AtomicBool>,
}

impl SafeMode {
    /// Creates an inactive flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns safe mode on. Returns true only for the call that switched it.
    pub fn enter(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    /// Turns safe mode off. Returns true if it was on.
    pub fn exit(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Checks if safe mode is on.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
