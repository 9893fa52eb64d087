//! The silence store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tocsin_core::{LabelSet, Matcher, matches_all};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SilenceError};
use crate::types::{Silence, SilenceState};

/// Configuration for the silence store.
#[derive(Debug, Clone)]
pub struct SilenceStoreConfig {
    /// How long expired silences are kept before garbage collection
    /// (in seconds).
    pub retention_secs: u64,
}

impl Default for SilenceStoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: 86_400, // 24 hours
        }
    }
}

/// Thread-safe store of silence records.
///
/// Silences are immutable once stored: every mutation (edit, expiry) replaces
/// the record under its ID with a fresh `updated_at`, so concurrent readers
/// never observe a partially written silence. Records are removed only by
/// [`SilenceStore::gc`] once they have been expired longer than the
/// configured retention.
#[derive(Debug, Clone)]
pub struct SilenceStore {
    config: SilenceStoreConfig,
    silences: Arc<RwLock<HashMap<String, Silence>>>,
}

impl SilenceStore {
    /// Creates a store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SilenceStoreConfig::default())
    }

    /// Creates a store with custom configuration.
    #[must_use]
    pub fn with_config(config: SilenceStoreConfig) -> Self {
        Self {
            config,
            silences: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stores a silence, returning its ID.
    ///
    /// A silence without an ID gets a generated one. Storing a silence whose
    /// ID already exists replaces the previous version — this is the only
    /// edit mechanism. `updated_at` is refreshed on every store.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the silence window or matcher set is
    /// invalid.
    pub fn create(&self, mut silence: Silence) -> Result<String> {
        silence.validate()?;

        if silence.id.is_empty() {
            silence.id = Uuid::new_v4().to_string();
        }
        silence.updated_at = Utc::now();

        let id = silence.id.clone();
        let replaced = self.silences.write().insert(id.clone(), silence).is_some();

        info!(silence_id = %id, replaced, "stored silence");
        Ok(id)
    }

    /// Expires a silence by setting its end time to now.
    ///
    /// A pending silence collapses to an empty window starting now; an
    /// already expired silence is left untouched. The record is replaced,
    /// never mutated in place, and never physically removed here.
    ///
    /// # Errors
    ///
    /// Returns [`SilenceError::NotFound`] if no silence has the given ID.
    pub fn expire(&self, id: &str) -> Result<()> {
        let mut silences = self.silences.write();
        let existing = silences.get(id).ok_or_else(|| SilenceError::NotFound {
            id: id.to_string(),
        })?;

        let now = Utc::now();
        let mut replacement = existing.clone();
        match replacement.state(now) {
            SilenceState::Expired => return Ok(()),
            SilenceState::Pending => {
                replacement.starts_at = now;
                replacement.ends_at = now;
            }
            SilenceState::Active => replacement.ends_at = now,
        }
        replacement.updated_at = now;
        silences.insert(id.to_string(), replacement);

        info!(silence_id = %id, "expired silence");
        Ok(())
    }

    /// Returns a silence by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Silence> {
        self.silences.read().get(id).cloned()
    }

    /// Lists silences consistent with the filter matchers.
    ///
    /// The filter is applied to each silence's `name -> pattern` projection.
    /// The result is ordered: active silences by soonest end first, then
    /// pending by soonest start first, then expired most-recently-ended
    /// first. Callers rely on this ordering.
    #[must_use]
    pub fn list(&self, filter: &[Matcher]) -> Vec<Silence> {
        let now = Utc::now();
        let mut active = Vec::new();
        let mut pending = Vec::new();
        let mut expired = Vec::new();

        for silence in self.silences.read().values() {
            if !matches_all(filter, &silence.matcher_labels()) {
                continue;
            }
            match silence.state(now) {
                SilenceState::Active => active.push(silence.clone()),
                SilenceState::Pending => pending.push(silence.clone()),
                SilenceState::Expired => expired.push(silence.clone()),
            }
        }

        active.sort_by_key(|s| s.ends_at);
        pending.sort_by_key(|s| s.starts_at);
        expired.sort_by(|a, b| b.ends_at.cmp(&a.ends_at));

        let mut out = active;
        out.append(&mut pending);
        out.append(&mut expired);
        out
    }

    /// Returns the IDs of all silences actively suppressing the labels at
    /// `now`, in ID order.
    #[must_use]
    pub fn silenced_by(&self, labels: &LabelSet, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .silences
            .read()
            .values()
            .filter(|s| s.suppresses(labels, now))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns true if any active silence matches the labels at `now`.
    #[must_use]
    pub fn is_silenced(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        self.silences
            .read()
            .values()
            .any(|s| s.suppresses(labels, now))
    }

    /// Removes silences that have been expired longer than the retention
    /// window. Returns the number of records removed.
    pub fn gc(&self, now: DateTime<Utc>) -> usize {
        let retention = Duration::seconds(self.config.retention_secs as i64);
        let mut silences = self.silences.write();
        let before = silences.len();
        silences.retain(|_, s| s.ends_at + retention > now);
        let removed = before - silences.len();

        if removed > 0 {
            debug!(removed, "garbage collected silences");
        }
        removed
    }

    /// Returns all silence records for persistence.
    ///
    /// The caller owns the snapshot format and file handling; records are
    /// plain serde-serializable values.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Silence> {
        self.silences.read().values().cloned().collect()
    }

    /// Replaces the store contents with a previously taken snapshot.
    pub fn restore(&self, records: Vec<Silence>) {
        let mut silences = self.silences.write();
        silences.clear();
        for silence in records {
            silences.insert(silence.id.clone(), silence);
        }
        info!(count = silences.len(), "restored silences from snapshot");
    }

    /// Returns the number of stored silences, including expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.silences.read().len()
    }

    /// Returns true if the store holds no silences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.silences.read().is_empty()
    }
}

impl Default for SilenceStore {
    fn default() -> Self {
        Self::new()
    }
}
