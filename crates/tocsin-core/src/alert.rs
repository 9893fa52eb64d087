//! Alert instances.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::labels::{Fingerprint, LabelSet};

/// The derived status of an alert at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// The alert condition is still active.
    Firing,
    /// The alert has ended.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single alert instance, identified by its label set.
///
/// Alerts are immutable once admitted except for `ends_at`, which is set when
/// the condition resolves. Status is never stored; it is derived from
/// `ends_at` and the current time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// The identifying label set.
    pub labels: LabelSet,
    /// Free-form context attached to the alert.
    pub annotations: BTreeMap<String, String>,
    /// When the condition started.
    pub starts_at: DateTime<Utc>,
    /// When the condition ended. `None` while the alert is firing.
    pub ends_at: Option<DateTime<Utc>>,
    /// Opaque reference to whatever produced the alert.
    pub generator_url: String,
    /// Optional receiver hint. When set, routing-tree lookup is bypassed and
    /// the alert goes straight to the named receiver.
    pub receiver: Option<String>,
}

impl Alert {
    /// Creates a firing alert starting now.
    #[must_use]
    pub fn firing(labels: LabelSet) -> Self {
        Self {
            labels,
            annotations: BTreeMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: String::new(),
            receiver: None,
        }
    }

    /// Sets the start time.
    #[must_use]
    pub fn with_starts_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self
    }

    /// Sets the end time, marking the alert resolved from that point on.
    #[must_use]
    pub fn with_ends_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }

    /// Sets the generator reference.
    #[must_use]
    pub fn with_generator_url(mut self, url: impl Into<String>) -> Self {
        self.generator_url = url.into();
        self
    }

    /// Sets the receiver hint.
    #[must_use]
    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    /// Marks the alert resolved as of `at`.
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.ends_at = Some(at);
    }

    /// Returns the status of this alert at `now`.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> AlertStatus {
        match self.ends_at {
            Some(ends_at) if ends_at <= now => AlertStatus::Resolved,
            _ => AlertStatus::Firing,
        }
    }

    /// Returns true if the alert is firing at `now`.
    #[must_use]
    pub fn is_firing(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == AlertStatus::Firing
    }

    /// Computes the identity fingerprint over the label set.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.labels.fingerprint()
    }

    /// Validates the alert for admission.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidAlert`] if the label set is empty, a label
    /// name or value is empty, or `ends_at` precedes `starts_at`.
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(CoreError::InvalidAlert {
                reason: "label set cannot be empty".to_string(),
            });
        }

        for (name, value) in self.labels.iter() {
            if name.is_empty() {
                return Err(CoreError::InvalidAlert {
                    reason: "label name cannot be empty".to_string(),
                });
            }
            if value.is_empty() {
                return Err(CoreError::InvalidAlert {
                    reason: format!("label '{name}' has an empty value"),
                });
            }
        }

        if let Some(ends_at) = self.ends_at {
            if ends_at < self.starts_at {
                return Err(CoreError::InvalidAlert {
                    reason: "ends_at precedes starts_at".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.labels, self.fingerprint())
    }
}
