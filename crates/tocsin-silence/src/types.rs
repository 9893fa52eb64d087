//! Silence records and their derived temporal state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tocsin_core::{LabelSet, Matcher, matches_all};
use uuid::Uuid;

use crate::error::{Result, SilenceError};

/// The temporal state of a silence, derived from its window and the clock.
///
/// The state is never stored; it is always recomputed, and as time advances
/// it only moves forward: pending, then active, then expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    /// The silence has not started yet.
    Pending,
    /// The silence is currently suppressing matching alerts.
    Active,
    /// The silence has ended.
    Expired,
}

impl SilenceState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SilenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Computes the state of a silence window at `now`.
#[must_use]
pub fn silence_state(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SilenceState {
    if now < starts_at {
        SilenceState::Pending
    } else if now < ends_at {
        SilenceState::Active
    } else {
        SilenceState::Expired
    }
}

/// A time-bounded rule suppressing notifications for matching alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    /// Unique identifier for this silence.
    pub id: String,
    /// Alerts matching all of these matchers are silenced.
    pub matchers: Vec<Matcher>,
    /// When the silence starts.
    pub starts_at: DateTime<Utc>,
    /// When the silence ends.
    pub ends_at: DateTime<Utc>,
    /// Who created the silence.
    pub created_by: String,
    /// Comment explaining the silence.
    pub comment: String,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Silence {
    /// Creates a new silence with a generated ID.
    ///
    /// # Errors
    ///
    /// Returns [`SilenceError::InvalidWindow`] if `ends_at` is not after
    /// `starts_at`, and [`SilenceError::NoMatchers`] if the matcher set is
    /// empty or contains a matcher with an empty label name.
    pub fn new(
        matchers: Vec<Matcher>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        created_by: impl Into<String>,
        comment: impl Into<String>,
    ) -> Result<Self> {
        let silence = Self {
            id: Uuid::new_v4().to_string(),
            matchers,
            starts_at,
            ends_at,
            created_by: created_by.into(),
            comment: comment.into(),
            updated_at: Utc::now(),
        };
        silence.validate()?;
        Ok(silence)
    }

    /// Validates the window and matcher set.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Silence::new`].
    pub fn validate(&self) -> Result<()> {
        if self.ends_at <= self.starts_at {
            return Err(SilenceError::InvalidWindow {
                reason: "silence end time must be after start time".to_string(),
            });
        }

        if self.matchers.is_empty() || self.matchers.iter().any(|m| m.name().is_empty()) {
            return Err(SilenceError::NoMatchers);
        }

        Ok(())
    }

    /// Returns the state of this silence at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> SilenceState {
        silence_state(self.starts_at, self.ends_at, now)
    }

    /// Returns true if this silence is active at `now` and its matcher set
    /// matches the labels.
    #[must_use]
    pub fn suppresses(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        self.state(now) == SilenceState::Active && matches_all(&self.matchers, labels)
    }

    /// Projects the matcher set to a `name -> pattern` label set.
    ///
    /// Used when filtering silence listings: the filter matchers are applied
    /// to this projection rather than to any concrete alert.
    #[must_use]
    pub fn matcher_labels(&self) -> LabelSet {
        self.matchers
            .iter()
            .map(|m| (m.name(), m.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window(start_offset_h: i64, end_offset_h: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (
            now + Duration::hours(start_offset_h),
            now + Duration::hours(end_offset_h),
        )
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    mod state_tests {
        use super::*;

        #[test]
        fn state_progression_is_monotonic() {
            let start = Utc::now();
            let end = start + Duration::hours(1);

            assert_eq!(
                silence_state(start, end, start - Duration::minutes(1)),
                SilenceState::Pending
            );
            assert_eq!(silence_state(start, end, start), SilenceState::Active);
            assert_eq!(
                silence_state(start, end, end - Duration::seconds(1)),
                SilenceState::Active
            );
            assert_eq!(silence_state(start, end, end), SilenceState::Expired);
            assert_eq!(
                silence_state(start, end, end + Duration::hours(5)),
                SilenceState::Expired
            );
        }

        #[test]
        fn state_as_str() {
            assert_eq!(SilenceState::Pending.as_str(), "pending");
            assert_eq!(SilenceState::Active.as_str(), "active");
            assert_eq!(SilenceState::Expired.as_str(), "expired");
        }
    }

    mod silence_tests {
        use super::*;

        #[test]
        fn create_silence() {
            let (start, end) = window(0, 4);
            let silence = Silence::new(
                vec![Matcher::equal("team", "db")],
                start,
                end,
                "admin",
                "Maintenance window",
            )
            .unwrap();

            assert!(!silence.id.is_empty());
            assert_eq!(silence.created_by, "admin");
            assert_eq!(silence.comment, "Maintenance window");
        }

        #[test]
        fn end_before_start_fails() {
            let (start, end) = window(1, 0);
            let result = Silence::new(vec![Matcher::equal("a", "b")], start, end, "admin", "bad");
            assert!(matches!(result, Err(SilenceError::InvalidWindow { .. })));
        }

        #[test]
        fn empty_matchers_fail() {
            let (start, end) = window(0, 1);
            let result = Silence::new(vec![], start, end, "admin", "no matchers");
            assert!(matches!(result, Err(SilenceError::NoMatchers)));
        }

        #[test]
        fn suppresses_matching_labels_while_active() {
            let (start, end) = window(-1, 1);
            let silence =
                Silence::new(vec![Matcher::equal("team", "db")], start, end, "admin", "t").unwrap();

            let now = Utc::now();
            assert!(silence.suppresses(&labels(&[("team", "db"), ("x", "y")]), now));
            assert!(!silence.suppresses(&labels(&[("team", "web")]), now));
        }

        #[test]
        fn expired_silence_suppresses_nothing() {
            let (start, end) = window(-2, -1);
            let silence =
                Silence::new(vec![Matcher::equal("team", "db")], start, end, "admin", "t").unwrap();

            assert!(!silence.suppresses(&labels(&[("team", "db")]), Utc::now()));
        }

        #[test]
        fn pending_silence_suppresses_nothing() {
            let (start, end) = window(1, 2);
            let silence =
                Silence::new(vec![Matcher::equal("team", "db")], start, end, "admin", "t").unwrap();

            assert!(!silence.suppresses(&labels(&[("team", "db")]), Utc::now()));
        }

        #[test]
        fn matcher_labels_projection() {
            let (start, end) = window(0, 1);
            let silence = Silence::new(
                vec![
                    Matcher::equal("team", "db"),
                    Matcher::regex("node", "db-.*").unwrap(),
                ],
                start,
                end,
                "admin",
                "t",
            )
            .unwrap();

            let projected = silence.matcher_labels();
            assert_eq!(projected.get("team"), Some("db"));
            assert_eq!(projected.get("node"), Some("db-.*"));
        }

        #[test]
        fn serialization_roundtrip() {
            let (start, end) = window(0, 2);
            let original = Silence::new(
                vec![Matcher::equal("alertname", "HighCPU")],
                start,
                end,
                "admin",
                "test",
            )
            .unwrap();

            let json = serde_json::to_string(&original).unwrap();
            let parsed: Silence = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, original);
        }
    }
}
