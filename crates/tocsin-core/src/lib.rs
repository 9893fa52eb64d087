//! Core alert model for the Tocsin notification dispatcher.
//!
//! `tocsin-core` provides the leaf types every other Tocsin crate builds on:
//!
//! - [`LabelSet`]: an ordered label mapping that identifies an alert
//! - [`Fingerprint`]: a stable content hash of a label set
//! - [`Matcher`]: a label matcher (equality, inequality, regex, negated regex)
//! - [`Alert`]: a single firing or resolved alert instance
//!
//! # Example
//!
//! ```rust
//! use tocsin_core::{Alert, LabelSet, Matcher, matches_all};
//!
//! let labels: LabelSet = [("alertname", "HighCPU"), ("team", "db")].into_iter().collect();
//! let alert = Alert::firing(labels);
//!
//! let matchers = vec![
//!     Matcher::equal("team", "db"),
//!     Matcher::regex("alertname", "High.*").unwrap(),
//! ];
//! assert!(matches_all(&matchers, &alert.labels));
//! ```
//!
//! Matching is pure and side-effect-free: evaluating a matcher set never
//! mutates anything and is safe to call from any number of threads.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alert;
pub mod error;
pub mod labels;
pub mod matcher;

// Re-export main types at crate root
pub use alert::{Alert, AlertStatus};
pub use error::{CoreError, Result};
pub use labels::{Fingerprint, LabelSet};
pub use matcher::{MatchOperator, Matcher, matches_all};
