//! The alert store and update stream.
//!
//! The [`AlertProvider`] owns the current set of admitted alerts and
//! publishes every accepted upsert to subscribers. Many readers may hold
//! subscriptions; logically there is a single writer stream feeding
//! [`AlertProvider::put`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use tocsin_core::{Alert, Fingerprint};

use crate::error::{DispatchError, Result};

/// Configuration for the alert provider.
#[derive(Debug, Clone)]
pub struct AlertProviderConfig {
    /// How long resolved alerts are kept before garbage collection
    /// (in seconds).
    pub resolved_retention_secs: u64,
    /// Capacity of the update broadcast channel. Slow subscribers past this
    /// lag are told to resync from the full set.
    pub update_buffer: usize,
}

impl Default for AlertProviderConfig {
    fn default() -> Self {
        Self {
            resolved_retention_secs: 300,
            update_buffer: 256,
        }
    }
}

/// Thread-safe store of the current alert set with change subscriptions.
#[derive(Debug, Clone)]
pub struct AlertProvider {
    config: AlertProviderConfig,
    alerts: Arc<RwLock<HashMap<Fingerprint, Alert>>>,
    updates: broadcast::Sender<Alert>,
}

impl AlertProvider {
    /// Creates a provider with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AlertProviderConfig::default())
    }

    /// Creates a provider with custom configuration.
    #[must_use]
    pub fn with_config(config: AlertProviderConfig) -> Self {
        let (updates, _) = broadcast::channel(config.update_buffer.max(1));
        Self {
            config,
            alerts: Arc::new(RwLock::new(HashMap::new())),
            updates,
        }
    }

    /// Admits a batch of alerts.
    ///
    /// Each alert is validated individually; invalid ones are rejected while
    /// the rest of the batch is still admitted and published to subscribers.
    /// An alert whose fingerprint is already known replaces the stored one,
    /// keeping the earliest start time — that is how resolutions arrive.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlertsRejected`] listing the batch index and
    /// reason of every rejected alert. Admission of the others has already
    /// happened when this error is returned.
    pub fn put(&self, alerts: Vec<Alert>) -> Result<()> {
        let mut rejected = Vec::new();

        for (index, mut alert) in alerts.into_iter().enumerate() {
            if let Err(e) = alert.validate() {
                warn!(index, error = %e, "rejecting alert at admission");
                rejected.push((index, e.to_string()));
                continue;
            }

            let fingerprint = alert.fingerprint();
            {
                let mut stored = self.alerts.write();
                if let Some(existing) = stored.get(&fingerprint) {
                    if existing.starts_at < alert.starts_at {
                        alert.starts_at = existing.starts_at;
                    }
                }
                stored.insert(fingerprint, alert.clone());
            }

            debug!(alert = %alert, "admitted alert");
            // Send fails only when nobody subscribes yet; the dispatcher
            // replays the full set on startup, so nothing is lost.
            let _ = self.updates.send(alert);
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::AlertsRejected { rejected })
        }
    }

    /// Returns the alert stored under a fingerprint.
    #[must_use]
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Alert> {
        self.alerts.read().get(&fingerprint).cloned()
    }

    /// Returns the full current alert set.
    #[must_use]
    pub fn list(&self) -> Vec<Alert> {
        self.alerts.read().values().cloned().collect()
    }

    /// Returns the alerts currently firing at `now`.
    #[must_use]
    pub fn firing(&self, now: DateTime<Utc>) -> Vec<Alert> {
        self.alerts
            .read()
            .values()
            .filter(|a| a.is_firing(now))
            .cloned()
            .collect()
    }

    /// Subscribes to alert upserts.
    ///
    /// The receiver yields every alert accepted after this call. A lagged
    /// receiver should resync from [`AlertProvider::list`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.updates.subscribe()
    }

    /// Removes alerts that have been resolved longer than the retention
    /// window. Returns the number of alerts removed.
    pub fn gc(&self, now: DateTime<Utc>) -> usize {
        let retention = Duration::seconds(self.config.resolved_retention_secs as i64);
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|_, a| match a.ends_at {
            Some(ends_at) => ends_at + retention > now,
            None => true,
        });
        let removed = before - alerts.len();

        if removed > 0 {
            debug!(removed, "garbage collected resolved alerts");
        }
        removed
    }

    /// Returns the number of stored alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// Returns true if no alerts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }
}

impl Default for AlertProvider {
    fn default() -> Self {
        Self::new()
    }
}
