//! Error types for the tocsin-core crate.

use thiserror::Error;

/// Errors that can occur while building or validating the core model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A matcher definition is invalid.
    #[error("invalid matcher '{name}': {reason}")]
    InvalidMatcher {
        /// The label name the matcher applies to.
        name: String,
        /// The reason the matcher is invalid.
        reason: String,
    },

    /// A regex matcher pattern failed to compile.
    #[error("invalid match pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The compile error reported by the regex engine.
        reason: String,
    },

    /// An alert failed admission validation.
    #[error("invalid alert: {reason}")]
    InvalidAlert {
        /// The reason the alert is invalid.
        reason: String,
    },
}

/// Result type for core model operations.
pub type Result<T> = std::result::Result<T, CoreError>;
