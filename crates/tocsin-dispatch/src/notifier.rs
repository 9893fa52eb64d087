//! The composition root.
//!
//! [`Notifier`] wires the whole dispatch subsystem together from one
//! validated configuration: routing tree, integrations map, silence store,
//! notification log, alert provider, dispatcher. Everything is constructed
//! here and passed by reference — there is no ambient registry to look
//! components up in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use tocsin_core::{Alert, Matcher};
use tocsin_nflog::{NotificationLog, NotificationLogConfig};
use tocsin_silence::{Silence, SilenceStore, SilenceStoreConfig};

use crate::config::NotifierConfig;
use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::error::{DispatchError, Result};
use crate::integration::{Integration, build_integrations};
use crate::pipeline::NotificationPipeline;
use crate::provider::{AlertProvider, AlertProviderConfig};
use crate::route::Route;

/// The assembled notification dispatch subsystem.
pub struct Notifier {
    config: NotifierConfig,
    route: Arc<Route>,
    integrations: std::collections::HashMap<String, Vec<Integration>>,
    silences: SilenceStore,
    nflog: NotificationLog,
    provider: AlertProvider,
}

impl Notifier {
    /// Builds the subsystem from configuration.
    ///
    /// All validation happens here: receiver lists, integration configs,
    /// matchers, and the routing tree. Nothing starts partially — any error
    /// means no subsystem.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error encountered.
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let integrations = build_integrations(&config)?;
        let receiver_names: HashSet<String> = integrations.keys().cloned().collect();
        let route = Arc::new(Route::build(&config.route, &receiver_names)?);

        let silences = SilenceStore::with_config(SilenceStoreConfig {
            retention_secs: config.silence_retention_secs,
        });
        let nflog = NotificationLog::with_config(NotificationLogConfig {
            retention_secs: config.log_retention_secs,
        });
        let provider = AlertProvider::with_config(AlertProviderConfig {
            resolved_retention_secs: config.resolved_retention_secs,
            ..AlertProviderConfig::default()
        });

        Ok(Self {
            config,
            route,
            integrations,
            silences,
            nflog,
            provider,
        })
    }

    /// Appends integrations to a configured receiver.
    ///
    /// This is how callers plug in transports the config cannot describe
    /// (see [`Integration::hook`]). Must be called before [`Notifier::run`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownReceiver`] if the receiver is not
    /// configured.
    pub fn add_integrations(
        &mut self,
        receiver: &str,
        integrations: Vec<Integration>,
    ) -> Result<()> {
        let list =
            self.integrations
                .get_mut(receiver)
                .ok_or_else(|| DispatchError::UnknownReceiver {
                    name: receiver.to_string(),
                })?;
        list.extend(integrations);
        Ok(())
    }

    /// Returns the silence store (e.g. for snapshot/restore wiring).
    #[must_use]
    pub fn silences(&self) -> &SilenceStore {
        &self.silences
    }

    /// Returns the notification log (e.g. for snapshot/restore wiring).
    #[must_use]
    pub fn notification_log(&self) -> &NotificationLog {
        &self.nflog
    }

    /// Returns the alert provider.
    #[must_use]
    pub fn alerts(&self) -> &AlertProvider {
        &self.provider
    }

    /// Admits a batch of alerts.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlertsRejected`] listing per-alert failures;
    /// the valid remainder of the batch has been admitted regardless.
    pub fn create_alerts(&self, alerts: Vec<Alert>) -> Result<()> {
        self.provider.put(alerts)
    }

    /// Creates (or replaces) a silence, returning its ID.
    ///
    /// # Errors
    ///
    /// Returns the silence validation error, if any.
    pub fn create_silence(&self, silence: Silence) -> Result<String> {
        Ok(self.silences.create(silence)?)
    }

    /// Expires a silence: its end time becomes now. Records are never
    /// physically deleted here.
    ///
    /// # Errors
    ///
    /// Returns [`tocsin_silence::SilenceError::NotFound`] wrapped in
    /// [`DispatchError::Silence`] for an unknown ID.
    pub fn delete_silence(&self, id: &str) -> Result<()> {
        Ok(self.silences.expire(id)?)
    }

    /// Lists silences consistent with the filter, ordered active, pending,
    /// then expired.
    #[must_use]
    pub fn list_silences(&self, filter: &[Matcher]) -> Vec<Silence> {
        self.silences.list(filter)
    }

    /// Starts the dispatcher and maintenance tasks.
    ///
    /// The returned handle stops them; alert admission and the silence API
    /// keep working on this `Notifier` while they run.
    #[must_use]
    pub fn run(&self) -> NotifierHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Arc::new(
            NotificationPipeline::new(self.silences.clone(), self.nflog.clone())
                .with_retry(self.config.retry.clone())
                .with_settle_wait(Duration::from_secs(self.config.settle_wait_secs)),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.route),
            Arc::new(self.integrations.clone()),
            pipeline,
            self.provider.clone(),
            DispatcherConfig {
                resolved_retention_secs: self.config.resolved_retention_secs,
            },
        );

        let dispatch_shutdown = shutdown_rx.clone();
        let dispatch_task = tokio::spawn(async move {
            dispatcher.run(dispatch_shutdown).await;
        });
        let maintenance_task = tokio::spawn(Self::maintenance_loop(
            self.silences.clone(),
            self.nflog.clone(),
            self.provider.clone(),
            Duration::from_secs(self.config.maintenance_interval_secs.max(1)),
            shutdown_rx,
        ));

        info!("notifier started");
        NotifierHandle {
            shutdown: shutdown_tx,
            tasks: vec![dispatch_task, maintenance_task],
        }
    }

    /// Periodic retention sweep over all three stores.
    async fn maintenance_loop(
        silences: SilenceStore,
        nflog: NotificationLog,
        provider: AlertProvider,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                () = sleep(interval) => {
                    let now = Utc::now();
                    silences.gc(now);
                    nflog.gc(now);
                    provider.gc(now);
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Controls a running [`Notifier`].
pub struct NotifierHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NotifierHandle {
    /// Signals shutdown and waits for the dispatcher to drain.
    ///
    /// In-flight pipeline runs finish or time out; no new runs are
    /// scheduled once the signal fires.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "task aborted during shutdown");
            }
        }
        info!("notifier stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverConfig, RouteConfig, WebhookConfig};
    use chrono::Duration as ChronoDuration;
    use tocsin_core::LabelSet;

    fn base_config() -> NotifierConfig {
        let raw = r#"{
            "route": { "receiver": "default" },
            "receivers": [
                { "name": "default" },
                { "name": "dba", "webhook_configs": [ { "url": "http://example.com/hook" } ] }
            ]
        }"#;
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn new_validates_the_whole_config() {
        assert!(Notifier::new(base_config()).is_ok());
    }

    #[test]
    fn unknown_route_receiver_is_fatal() {
        let mut config = base_config();
        config.route.routes = vec![RouteConfig {
            receiver: Some("ghost".to_string()),
            ..RouteConfig::default()
        }];

        let result = Notifier::new(config);
        assert!(matches!(
            result,
            Err(DispatchError::UnknownReceiver { name }) if name == "ghost"
        ));
    }

    #[test]
    fn broken_integration_is_fatal() {
        let mut config = base_config();
        config.receivers.push(ReceiverConfig {
            name: "broken".to_string(),
            webhook_configs: vec![WebhookConfig::new("")],
            ..ReceiverConfig::default()
        });

        assert!(matches!(
            Notifier::new(config),
            Err(DispatchError::IntegrationBuild { .. })
        ));
    }

    #[test]
    fn add_integrations_requires_known_receiver() {
        let mut notifier = Notifier::new(base_config()).unwrap();

        assert!(
            notifier
                .add_integrations("dba", vec![Integration::log(1)])
                .is_ok()
        );
        assert!(matches!(
            notifier.add_integrations("ghost", vec![Integration::log(0)]),
            Err(DispatchError::UnknownReceiver { .. })
        ));
    }

    #[test]
    fn silence_api_round_trip() {
        let notifier = Notifier::new(base_config()).unwrap();
        let silence = Silence::new(
            vec![Matcher::equal("team", "db")],
            Utc::now() - ChronoDuration::hours(1),
            Utc::now() + ChronoDuration::hours(1),
            "admin",
            "maintenance",
        )
        .unwrap();

        let id = notifier.create_silence(silence).unwrap();

        let listed = notifier.list_silences(&[]);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        notifier.delete_silence(&id).unwrap();
        let after = notifier.list_silences(&[]);
        assert_eq!(
            after[0].state(Utc::now()),
            tocsin_silence::SilenceState::Expired
        );
    }

    #[test]
    fn admission_reports_per_alert_errors() {
        let notifier = Notifier::new(base_config()).unwrap();
        let batch = vec![
            Alert::firing([("alertname", "A")].into_iter().collect::<LabelSet>()),
            Alert::firing(LabelSet::new()),
        ];

        let result = notifier.create_alerts(batch);

        assert!(matches!(
            result,
            Err(DispatchError::AlertsRejected { ref rejected }) if rejected.len() == 1
        ));
        assert_eq!(notifier.alerts().len(), 1);
    }
}
