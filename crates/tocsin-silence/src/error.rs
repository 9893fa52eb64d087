//! Error types for the tocsin-silence crate.

use thiserror::Error;

/// Errors that can occur while managing silences.
#[derive(Debug, Error)]
pub enum SilenceError {
    /// No silence exists with the given ID.
    #[error("silence not found: {id}")]
    NotFound {
        /// The silence ID that was not found.
        id: String,
    },

    /// The silence time window is invalid.
    #[error("invalid silence window: {reason}")]
    InvalidWindow {
        /// The reason the window is invalid.
        reason: String,
    },

    /// The silence has no usable matchers.
    #[error("silence must have at least one matcher with a non-empty name")]
    NoMatchers,
}

/// Result type for silence operations.
pub type Result<T> = std::result::Result<T, SilenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = SilenceError::NotFound {
            id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "silence not found: abc-123");
    }

    #[test]
    fn error_display_invalid_window() {
        let err = SilenceError::InvalidWindow {
            reason: "ends before it starts".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid silence window: ends before it starts"
        );
    }
}
