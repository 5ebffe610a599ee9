//! Failure taxonomy and severity classification.
//!
//! Every runtime failure, whatever its origin, is captured as a
//! [`FailureEvent`] at the point where it happens and mapped to a
//! [`Severity`] tier by [`classify`]. The tier decides how the recovery
//! engine reacts to it.

pub mod classification;
pub mod failure;

// Re-export main types for convenient access
pub use classification::{classify, ClassifiedFailure, Severity};
pub use failure::{FailureEvent, FailureKind, ScriptFault};
