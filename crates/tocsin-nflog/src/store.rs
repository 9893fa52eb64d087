//! The notification log store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tocsin_core::Fingerprint;
use tracing::debug;

use crate::types::{LogEntry, LogKey};

/// Configuration for the notification log.
#[derive(Debug, Clone)]
pub struct NotificationLogConfig {
    /// How long entries are kept before garbage collection (in seconds).
    pub retention_secs: u64,
}

impl Default for NotificationLogConfig {
    fn default() -> Self {
        Self {
            retention_secs: 86_400, // 24 hours
        }
    }
}

/// Append-only, garbage-collected record of delivered notifications.
///
/// Entries for different keys are independent; only the newest entry per key
/// is kept. Reads and writes take short critical sections on the backing map
/// and are never held across a suspension point.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    config: NotificationLogConfig,
    entries: Arc<RwLock<HashMap<LogKey, LogEntry>>>,
}

impl NotificationLog {
    /// Creates a log with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(NotificationLogConfig::default())
    }

    /// Creates a log with custom configuration.
    #[must_use]
    pub fn with_config(config: NotificationLogConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the authoritative (latest) entry for a key.
    #[must_use]
    pub fn last_sent(&self, key: &LogKey) -> Option<LogEntry> {
        self.entries.read().get(key).copied()
    }

    /// Records a delivered notification.
    ///
    /// An entry with a newer timestamp than the one being recorded stays
    /// authoritative; stale writes are dropped.
    pub fn record(&self, key: LogKey, fingerprint: Fingerprint, timestamp: DateTime<Utc>) {
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(existing) if existing.timestamp > timestamp => {
                debug!(key = %key, "dropping stale notification log write");
            }
            _ => {
                entries.insert(
                    key,
                    LogEntry {
                        fingerprint,
                        timestamp,
                    },
                );
            }
        }
    }

    /// Removes entries older than the retention window. Returns the number
    /// of entries removed.
    pub fn gc(&self, now: DateTime<Utc>) -> usize {
        let retention = Duration::seconds(self.config.retention_secs as i64);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.timestamp + retention > now);
        let removed = before - entries.len();

        if removed > 0 {
            debug!(removed, "garbage collected notification log entries");
        }
        removed
    }

    /// Returns all entries for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(LogKey, LogEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), *e))
            .collect()
    }

    /// Replaces the log contents with a previously taken snapshot.
    pub fn restore(&self, records: Vec<(LogKey, LogEntry)>) {
        let mut entries = self.entries.write();
        entries.clear();
        entries.extend(records);
        debug!(count = entries.len(), "restored notification log");
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}
