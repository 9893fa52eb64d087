//! Silences for the Tocsin notification dispatcher.
//!
//! A silence is a time-bounded rule that suppresses notifications for alerts
//! whose labels match its matcher set. Silences are immutable once created:
//! "editing" one replaces the record wholesale with a fresh `updated_at`, and
//! deleting one sets its end time to now. Expired records linger for a
//! retention window before garbage collection removes them, so operators can
//! still inspect what was silenced recently.
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use tocsin_core::{LabelSet, Matcher};
//! use tocsin_silence::{Silence, SilenceStore};
//!
//! let store = SilenceStore::new();
//! let silence = Silence::new(
//!     vec![Matcher::equal("team", "db")],
//!     Utc::now(),
//!     Utc::now() + Duration::hours(4),
//!     "admin",
//!     "Maintenance window",
//! ).unwrap();
//! let id = store.create(silence).unwrap();
//!
//! let labels: LabelSet = [("team", "db"), ("severity", "critical")].into_iter().collect();
//! assert_eq!(store.silenced_by(&labels, Utc::now()), vec![id]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use error::{Result, SilenceError};
pub use store::{SilenceStore, SilenceStoreConfig};
pub use types::{Silence, SilenceState, silence_state};
