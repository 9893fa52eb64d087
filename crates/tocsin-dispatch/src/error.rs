//! Error types for the tocsin-dispatch crate.

use thiserror::Error;
use tocsin_core::CoreError;
use tocsin_silence::SilenceError;

/// Errors that can occur while configuring or driving dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The routing tree definition is malformed.
    #[error("invalid route '{route}': {reason}")]
    InvalidRoute {
        /// The id of the offending route node ("0" is the root).
        route: String,
        /// The reason the route is invalid.
        reason: String,
    },

    /// A route or alert references a receiver that is not configured.
    #[error("unknown receiver: {name}")]
    UnknownReceiver {
        /// The missing receiver name.
        name: String,
    },

    /// Two receivers share the same name.
    #[error("duplicate receiver: {name}")]
    DuplicateReceiver {
        /// The duplicated receiver name.
        name: String,
    },

    /// A receiver definition is malformed.
    #[error("invalid receiver: {reason}")]
    InvalidReceiver {
        /// The reason the receiver is invalid.
        reason: String,
    },

    /// A matcher in the configuration is invalid.
    #[error("matcher error: {0}")]
    Matcher(#[from] CoreError),

    /// One or more integrations of a receiver failed to build.
    #[error("invalid integrations for receiver '{receiver}': {}", .failures.join("; "))]
    IntegrationBuild {
        /// The receiver whose integrations failed.
        receiver: String,
        /// One message per failed integration.
        failures: Vec<String>,
    },

    /// Some alerts of an admission batch were rejected. The rest of the
    /// batch was still admitted.
    #[error("{} alert(s) rejected at admission", .rejected.len())]
    AlertsRejected {
        /// Batch index and reason for each rejected alert.
        rejected: Vec<(usize, String)>,
    },

    /// A silence operation failed.
    #[error("silence error: {0}")]
    Silence(#[from] SilenceError),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
