//! Notification log keys and entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tocsin_core::Fingerprint;

/// The identity a log entry is recorded under.
///
/// One entry exists per `(group key, receiver, integration, index)` — the
/// index distinguishes multiple integrations of the same kind within one
/// receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogKey {
    /// The alert group key.
    pub group_key: String,
    /// The receiver name.
    pub receiver: String,
    /// The integration name within the receiver.
    pub integration: String,
    /// The integration's position in its receiver's integration list.
    pub integration_index: u32,
}

impl LogKey {
    /// Creates a log key.
    #[must_use]
    pub fn new(
        group_key: impl Into<String>,
        receiver: impl Into<String>,
        integration: impl Into<String>,
        integration_index: u32,
    ) -> Self {
        Self {
            group_key: group_key.into(),
            receiver: receiver.into(),
            integration: integration.into(),
            integration_index,
        }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.group_key, self.receiver, self.integration, self.integration_index
        )
    }
}

/// What was last sent under a [`LogKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Content fingerprint of the notified alert set.
    pub fingerprint: Fingerprint,
    /// When the notification was delivered.
    pub timestamp: DateTime<Utc>,
}
