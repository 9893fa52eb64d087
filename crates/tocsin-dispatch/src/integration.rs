//! Receiver integrations.
//!
//! An [`Integration`] is one concrete delivery target within a receiver. The
//! set of kinds is closed: adding a new delivery mechanism means adding a
//! variant here, never touching the pipeline. Every variant exposes the same
//! capability surface — [`Integration::attempt`], [`Integration::name`],
//! [`Integration::index`] — and `(receiver, name, index)` forms the
//! notification log identity.
//!
//! The wire-level transport is an external collaborator. [`Integration::Hook`]
//! is the seam for injecting one; the built-in webhook and email variants
//! prepare their payloads and report success once handed off.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use tocsin_core::{Alert, AlertStatus, LabelSet};

use crate::config::{EmailConfig, NotifierConfig, WebhookConfig};
use crate::error::{DispatchError, Result};

/// A delivery failure, classified for the retry stage.
#[derive(Debug, Clone, Error)]
#[error("delivery failed: {cause}")]
pub struct DeliveryError {
    /// Whether retrying could plausibly succeed.
    pub retryable: bool,
    /// Human-readable cause.
    pub cause: String,
}

impl DeliveryError {
    /// A failure worth retrying (timeouts, transient transport errors).
    #[must_use]
    pub fn retryable(cause: impl Into<String>) -> Self {
        Self {
            retryable: true,
            cause: cause.into(),
        }
    }

    /// A terminal failure retrying cannot fix (bad payload, rejected auth).
    #[must_use]
    pub fn permanent(cause: impl Into<String>) -> Self {
        Self {
            retryable: false,
            cause: cause.into(),
        }
    }
}

/// Context handed to an integration alongside the alerts.
#[derive(Debug, Clone)]
pub struct NotifyContext {
    /// The receiver this delivery belongs to.
    pub receiver: String,
    /// The alert group key.
    pub group_key: String,
    /// The labels that define the group.
    pub group_labels: LabelSet,
}

/// The function type wrapped by [`Integration::Hook`].
pub type HookFn =
    dyn Fn(&NotifyContext, &[Alert]) -> std::result::Result<(), DeliveryError> + Send + Sync;

/// One concrete delivery target within a receiver.
#[derive(Debug, Clone)]
pub enum Integration {
    /// Posts an Alertmanager-compatible JSON payload to a URL.
    Webhook(WebhookIntegration),
    /// Sends a notification email.
    Email(EmailIntegration),
    /// Writes notifications to the tracing log.
    Log(LogIntegration),
    /// Delegates delivery to an injected function.
    Hook(HookIntegration),
}

impl Integration {
    /// Creates a webhook integration.
    #[must_use]
    pub const fn webhook(config: WebhookConfig, index: u32) -> Self {
        Self::Webhook(WebhookIntegration { config, index })
    }

    /// Creates an email integration.
    #[must_use]
    pub const fn email(config: EmailConfig, index: u32) -> Self {
        Self::Email(EmailIntegration { config, index })
    }

    /// Creates a log integration.
    #[must_use]
    pub const fn log(index: u32) -> Self {
        Self::Log(LogIntegration { index })
    }

    /// Creates a hook integration delegating to `deliver`.
    pub fn hook<F>(name: impl Into<String>, index: u32, deliver: F) -> Self
    where
        F: Fn(&NotifyContext, &[Alert]) -> std::result::Result<(), DeliveryError>
            + Send
            + Sync
            + 'static,
    {
        Self::Hook(HookIntegration {
            name: name.into(),
            index,
            deliver: Arc::new(deliver),
        })
    }

    /// Returns the integration kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Email(_) => "email",
            Self::Log(_) => "log",
            Self::Hook(h) => &h.name,
        }
    }

    /// Returns the position within the receiver's integration list.
    #[must_use]
    pub const fn index(&self) -> u32 {
        match self {
            Self::Webhook(w) => w.index,
            Self::Email(e) => e.index,
            Self::Log(l) => l.index,
            Self::Hook(h) => h.index,
        }
    }

    /// Attempts one delivery of the alerts.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] carrying the retryable/terminal
    /// classification. Retrying is the pipeline's job, not the
    /// integration's.
    pub async fn attempt(
        &self,
        ctx: &NotifyContext,
        alerts: &[Alert],
    ) -> std::result::Result<(), DeliveryError> {
        match self {
            Self::Webhook(w) => w.attempt(ctx, alerts),
            Self::Email(e) => e.attempt(ctx, alerts),
            Self::Log(l) => l.attempt(ctx, alerts),
            Self::Hook(h) => (h.deliver)(ctx, alerts),
        }
    }
}

/// A webhook delivery target.
#[derive(Debug, Clone)]
pub struct WebhookIntegration {
    config: WebhookConfig,
    index: u32,
}

impl WebhookIntegration {
    /// Builds the JSON payload for a notification, truncating oversized
    /// alert lists.
    ///
    /// # Errors
    ///
    /// Returns a terminal [`DeliveryError`] if serialization fails.
    pub fn payload(
        &self,
        ctx: &NotifyContext,
        alerts: &[Alert],
    ) -> std::result::Result<String, DeliveryError> {
        let truncated = alerts.len().saturating_sub(self.config.max_alerts);
        let payload =
            WebhookPayload::build(ctx, &alerts[..alerts.len() - truncated], truncated);
        serde_json::to_string(&payload)
            .map_err(|e| DeliveryError::permanent(format!("serialize payload: {e}")))
    }

    fn attempt(
        &self,
        ctx: &NotifyContext,
        alerts: &[Alert],
    ) -> std::result::Result<(), DeliveryError> {
        if !self.config.enabled {
            debug!(url = %self.config.url, "webhook integration disabled, skipping");
            return Ok(());
        }

        let payload = self.payload(ctx, alerts)?;

        // The HTTP client is an external collaborator; delivery ends at the
        // handoff here.
        info!(
            url = %self.config.url,
            receiver = %ctx.receiver,
            alerts = alerts.len(),
            "posting webhook notification"
        );
        debug!(payload = %payload, "webhook payload");

        Ok(())
    }
}

/// An email delivery target.
#[derive(Debug, Clone)]
pub struct EmailIntegration {
    config: EmailConfig,
    index: u32,
}

impl EmailIntegration {
    fn attempt(
        &self,
        ctx: &NotifyContext,
        alerts: &[Alert],
    ) -> std::result::Result<(), DeliveryError> {
        if !self.config.enabled {
            debug!(from = %self.config.from, "email integration disabled, skipping");
            return Ok(());
        }

        // The SMTP transport is an external collaborator.
        info!(
            to = ?self.config.to,
            from = %self.config.from,
            receiver = %ctx.receiver,
            alerts = alerts.len(),
            "sending email notification"
        );

        Ok(())
    }
}

/// A tracing-log delivery target, mainly for debugging setups.
#[derive(Debug, Clone)]
pub struct LogIntegration {
    index: u32,
}

impl LogIntegration {
    fn attempt(
        &self,
        ctx: &NotifyContext,
        alerts: &[Alert],
    ) -> std::result::Result<(), DeliveryError> {
        let now = Utc::now();
        for alert in alerts {
            info!(
                group = %ctx.group_key,
                receiver = %ctx.receiver,
                status = %alert.status(now),
                alert = %alert,
                "notification"
            );
        }
        Ok(())
    }
}

/// A delivery target wrapping an injected function.
#[derive(Clone)]
pub struct HookIntegration {
    name: String,
    index: u32,
    deliver: Arc<HookFn>,
}

impl fmt::Debug for HookIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookIntegration")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// The JSON body posted by webhook integrations.
///
/// Compatible with Prometheus Alertmanager webhook receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// The payload format version.
    pub version: String,
    /// Group key identifying this alert group.
    pub group_key: String,
    /// Number of alerts dropped to honor the size limit.
    pub truncated_alerts: usize,
    /// Firing if any included alert still fires, resolved otherwise.
    pub status: AlertStatus,
    /// The receiver that handles this notification.
    pub receiver: String,
    /// The labels defining the group.
    pub group_labels: LabelSet,
    /// Labels shared by every included alert.
    pub common_labels: LabelSet,
    /// Annotations shared by every included alert.
    pub common_annotations: BTreeMap<String, String>,
    /// The alerts in this notification.
    pub alerts: Vec<PayloadAlert>,
}

impl WebhookPayload {
    fn build(ctx: &NotifyContext, alerts: &[Alert], truncated_alerts: usize) -> Self {
        let now = Utc::now();
        let status = if alerts.iter().any(|a| a.is_firing(now)) {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        };

        let (common_labels, common_annotations) = extract_common(alerts);

        Self {
            version: "4".to_string(),
            group_key: ctx.group_key.clone(),
            truncated_alerts,
            status,
            receiver: ctx.receiver.clone(),
            group_labels: ctx.group_labels.clone(),
            common_labels,
            common_annotations,
            alerts: alerts.iter().map(|a| PayloadAlert::from_alert(a, now)).collect(),
        }
    }
}

/// One alert inside a [`WebhookPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAlert {
    /// The alert status at payload build time.
    pub status: String,
    /// Labels attached to the alert.
    pub labels: LabelSet,
    /// Annotations for the alert.
    pub annotations: BTreeMap<String, String>,
    /// When the alert started, RFC 3339.
    pub starts_at: String,
    /// When the alert ended, RFC 3339, if resolved.
    pub ends_at: Option<String>,
    /// Reference to whatever produced the alert.
    pub generator_url: String,
    /// Identity fingerprint.
    pub fingerprint: String,
}

impl PayloadAlert {
    fn from_alert(alert: &Alert, now: chrono::DateTime<Utc>) -> Self {
        Self {
            status: alert.status(now).as_str().to_string(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at.to_rfc3339(),
            ends_at: alert.ends_at.map(|t| t.to_rfc3339()),
            generator_url: alert.generator_url.clone(),
            fingerprint: alert.fingerprint().to_string(),
        }
    }
}

/// Finds the labels and annotations shared by every alert.
fn extract_common(alerts: &[Alert]) -> (LabelSet, BTreeMap<String, String>) {
    let Some(first) = alerts.first() else {
        return (LabelSet::new(), BTreeMap::new());
    };

    let common_labels: LabelSet = first
        .labels
        .iter()
        .filter(|&(name, value)| alerts.iter().all(|a| a.labels.get(name) == Some(value)))
        .collect();

    let common_annotations: BTreeMap<String, String> = first
        .annotations
        .iter()
        .filter(|&(name, value)| {
            alerts.iter().all(|a| a.annotations.get(name.as_str()) == Some(value))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    (common_labels, common_annotations)
}

/// Builds the receiver-name to integrations map from configuration.
///
/// Mirrors the startup path: every receiver's integration list is built in
/// config order, with the index recording each integration's position within
/// its kind. All failures for a receiver are gathered before reporting so a
/// single pass surfaces every problem.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidReceiver`] or
/// [`DispatchError::DuplicateReceiver`] for malformed receiver lists and
/// [`DispatchError::IntegrationBuild`] when any integration of a receiver is
/// invalid.
pub fn build_integrations(
    config: &NotifierConfig,
) -> Result<std::collections::HashMap<String, Vec<Integration>>> {
    let mut map = std::collections::HashMap::with_capacity(config.receivers.len());

    for receiver in &config.receivers {
        if receiver.name.is_empty() {
            return Err(DispatchError::InvalidReceiver {
                reason: "receiver name cannot be empty".to_string(),
            });
        }
        if map.contains_key(&receiver.name) {
            return Err(DispatchError::DuplicateReceiver {
                name: receiver.name.clone(),
            });
        }

        let mut integrations = Vec::new();
        let mut failures = Vec::new();

        for (i, webhook) in receiver.webhook_configs.iter().enumerate() {
            if webhook.url.is_empty() {
                failures.push(format!("webhook {i}: url cannot be empty"));
            } else {
                integrations.push(Integration::webhook(webhook.clone(), i as u32));
            }
        }

        for (i, email) in receiver.email_configs.iter().enumerate() {
            if email.to.is_empty() {
                failures.push(format!("email {i}: no recipients"));
            } else if email.from.is_empty() {
                failures.push(format!("email {i}: sender cannot be empty"));
            } else {
                integrations.push(Integration::email(email.clone(), i as u32));
            }
        }

        if !failures.is_empty() {
            return Err(DispatchError::IntegrationBuild {
                receiver: receiver.name.clone(),
                failures,
            });
        }

        map.insert(receiver.name.clone(), integrations);
    }

    Ok(map)
}
