//! Routing, grouping, and the notification pipeline for Tocsin.
//!
//! `tocsin-dispatch` turns a stream of admitted alerts into notifications:
//!
//! - **Router**: a tree of routes matching alerts to receivers, with
//!   per-route grouping and interval settings
//! - **Alert Provider**: the current alert set plus an update stream
//! - **Dispatcher**: groups alerts by route and grouping labels, and drives
//!   one pipeline schedule per group
//! - **Notification Pipeline**: silencing, settle wait, deduplication
//!   against the notification log, delivery with exponential backoff, and
//!   the log update — fanned out per integration
//! - **Notifier**: the composition root wiring all of it together with the
//!   silence store and notification log
//!
//! # Example
//!
//! ```rust,no_run
//! use tocsin_core::{Alert, LabelSet};
//! use tocsin_dispatch::{Notifier, NotifierConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: NotifierConfig = serde_json::from_str(r#"{
//!         "route": {
//!             "receiver": "default",
//!             "routes": [
//!                 {
//!                     "matchers": [ { "name": "team", "op": "=", "value": "db" } ],
//!                     "receiver": "dba"
//!                 }
//!             ]
//!         },
//!         "receivers": [
//!             { "name": "default" },
//!             { "name": "dba", "webhook_configs": [ { "url": "http://example.com/hook" } ] }
//!         ]
//!     }"#)?;
//!
//!     let notifier = Notifier::new(config)?;
//!     let handle = notifier.run();
//!
//!     let labels: LabelSet = [("alertname", "HighCPU"), ("team", "db")]
//!         .into_iter()
//!         .collect();
//!     notifier.create_alerts(vec![Alert::firing(labels)])?;
//!
//!     // ... later
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod integration;
pub mod notifier;
pub mod pipeline;
pub mod provider;
pub mod route;

// Re-export main types at crate root
pub use config::{EmailConfig, NotifierConfig, ReceiverConfig, RouteConfig, WebhookConfig};
pub use dispatch::{Dispatcher, DispatcherConfig, GroupKey};
pub use error::{DispatchError, Result};
pub use integration::{DeliveryError, Integration, NotifyContext, build_integrations};
pub use notifier::{Notifier, NotifierHandle};
pub use pipeline::{
    IntegrationOutcome, IntegrationResult, NotificationPipeline, RetryConfig, RunOutcome,
    content_fingerprint,
};
pub use provider::{AlertProvider, AlertProviderConfig};
pub use route::{GroupBy, Route};
