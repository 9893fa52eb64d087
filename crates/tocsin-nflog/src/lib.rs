//! Notification log for the Tocsin dispatcher.
//!
//! The log records which notification content was last delivered for each
//! `(group key, receiver, integration, index)` identity. The deduplication
//! stage reads it to decide whether a pipeline run would repeat an unchanged
//! notification; the log-update stage writes it after a successful delivery.
//! Entries expire after a retention window.
//!
//! A missed write only risks a duplicate notification on the next cycle — it
//! never drops one — so recording is deliberately infallible.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use tocsin_core::LabelSet;
//! use tocsin_nflog::{LogKey, NotificationLog};
//!
//! let log = NotificationLog::new();
//! let key = LogKey::new("{}:{team=\"db\"}", "dba", "webhook", 0);
//! let labels: LabelSet = [("team", "db")].into_iter().collect();
//!
//! assert!(log.last_sent(&key).is_none());
//! log.record(key.clone(), labels.fingerprint(), Utc::now());
//! assert!(log.last_sent(&key).is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod store;
pub mod types;

// Re-export main types at crate root
pub use store::{NotificationLog, NotificationLogConfig};
pub use types::{LogEntry, LogKey};
