//! Configuration input for the dispatch subsystem.
//!
//! These structs are the deserialized form of what the external config
//! loader supplies: one routing tree plus a list of receiver definitions.
//! They are validated and compiled into runtime structures
//! ([`crate::route::Route`], the integrations map) when the
//! [`crate::notifier::Notifier`] is constructed; nothing here is consulted
//! again at dispatch time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tocsin_core::Matcher;

use crate::pipeline::RetryConfig;

fn default_retention_secs() -> u64 {
    86_400 // 24 hours
}

fn default_resolved_retention_secs() -> u64 {
    300
}

fn default_maintenance_interval_secs() -> u64 {
    300
}

/// Top-level configuration for a [`crate::notifier::Notifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// The routing tree. The root must name a receiver; it acts as the
    /// default for alerts no child route claims.
    pub route: RouteConfig,
    /// Receiver definitions referenced by the routing tree.
    pub receivers: Vec<ReceiverConfig>,
    /// Pause before deduplication in every pipeline run (in seconds),
    /// giving the notification log time to settle across redundant
    /// dispatcher instances.
    #[serde(default)]
    pub settle_wait_secs: u64,
    /// Delivery retry behavior.
    #[serde(default)]
    pub retry: RetryConfig,
    /// How long expired silences are kept (in seconds).
    #[serde(default = "default_retention_secs")]
    pub silence_retention_secs: u64,
    /// How long notification log entries are kept (in seconds).
    #[serde(default = "default_retention_secs")]
    pub log_retention_secs: u64,
    /// How long resolved alerts linger in their groups and the alert store
    /// before being flushed (in seconds).
    #[serde(default = "default_resolved_retention_secs")]
    pub resolved_retention_secs: u64,
    /// Interval between store garbage collection sweeps (in seconds).
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

/// One node of the routing tree definition.
///
/// Fields left unset inherit from the parent node; the root falls back to
/// built-in defaults (30s group wait, 5m group interval, 4h repeat
/// interval, grouping by the full label set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Matchers an alert must satisfy to enter this node. The root's
    /// matchers are ignored — it matches everything.
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    /// The receiver notified for groups settled at this node.
    #[serde(default)]
    pub receiver: Option<String>,
    /// Which labels define a group: a list of names, `["..."]` for "group
    /// by all labels", or an empty list for one global group.
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
    /// How long a fresh group waits for more alerts before its first
    /// notification (in seconds).
    #[serde(default)]
    pub group_wait_secs: Option<u64>,
    /// How often a non-empty group re-runs its pipeline (in seconds).
    #[serde(default)]
    pub group_interval_secs: Option<u64>,
    /// Minimum time before unchanged content is re-delivered (in seconds).
    #[serde(default)]
    pub repeat_interval_secs: Option<u64>,
    /// Whether a match here still lets sibling routes and the parent's
    /// default contribute matches of their own.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,
    /// Child routes, tried in order.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// A named bundle of integrations.
///
/// A receiver with no integrations is legal and acts as a blackhole: groups
/// routed to it complete their pipeline runs without delivering anywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// The receiver name, referenced by routes.
    pub name: String,
    /// Webhook delivery targets.
    #[serde(default)]
    pub webhook_configs: Vec<WebhookConfig>,
    /// Email delivery targets.
    #[serde(default)]
    pub email_configs: Vec<EmailConfig>,
    /// Name of the template set used when rendering notifications.
    /// Rendering itself is the template engine's concern, not ours.
    #[serde(default)]
    pub template: Option<String>,
}

/// Configuration for a webhook integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The URL to post notifications to.
    pub url: String,
    /// HTTP headers to include with requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Maximum number of alerts per notification payload.
    #[serde(default = "WebhookConfig::default_max_alerts")]
    pub max_alerts: usize,
    /// Whether this integration is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl WebhookConfig {
    fn default_max_alerts() -> usize {
        100
    }

    /// Creates a webhook configuration for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            max_alerts: Self::default_max_alerts(),
            enabled: true,
        }
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the maximum alerts per notification.
    #[must_use]
    pub const fn with_max_alerts(mut self, max: usize) -> Self {
        self.max_alerts = max;
        self
    }

    /// Sets whether the integration is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Configuration for an email integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Sender address.
    pub from: String,
    /// Whether this integration is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl EmailConfig {
    /// Creates an email configuration.
    #[must_use]
    pub fn new(to: Vec<String>, from: impl Into<String>) -> Self {
        Self {
            to,
            from: from.into(),
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}
