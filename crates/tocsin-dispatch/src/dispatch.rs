//! The dispatcher: alert intake, grouping, and pipeline scheduling.
//!
//! The [`Dispatcher`] consumes the alert provider's update stream, resolves
//! each alert's routes, and folds it into alert groups. Every group owns one
//! task that waits out the route's group-wait, then re-runs the notification
//! pipeline on each group-interval tick — woken early when membership grows —
//! until the group empties out and tears itself down.
//!
//! The group map is the only coarsely synchronized shared state. Its critical
//! sections cover membership bookkeeping exclusively; no lock is ever held
//! across a pipeline run or any other suspension point.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use tocsin_core::{Alert, Fingerprint, LabelSet};

use crate::integration::{Integration, NotifyContext};
use crate::pipeline::NotificationPipeline;
use crate::provider::AlertProvider;
use crate::route::Route;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long resolved alerts stay members of their groups before being
    /// flushed (in seconds). A group whose alerts are all flushed is torn
    /// down.
    pub resolved_retention_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            resolved_retention_secs: 300,
        }
    }
}

/// The identity of an alert group: a route node, a receiver, and the
/// projection of alert labels the route groups by.
///
/// The receiver is part of the identity so receiver-hinted alerts sharing a
/// route never share a group with differently-hinted ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    /// The route node id.
    pub route_id: String,
    /// The receiver notified for this group.
    pub receiver: String,
    /// The grouping labels.
    pub labels: LabelSet,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.route_id, self.receiver, self.labels)
    }
}

/// Scheduling parameters a group task needs, resolved from its route.
#[derive(Debug, Clone)]
struct GroupParams {
    key: GroupKey,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
}

/// The mutable membership of one alert group.
#[derive(Debug, Default)]
struct GroupState {
    alerts: HashMap<Fingerprint, Alert>,
}

impl GroupState {
    fn with(alert: Alert) -> Self {
        let mut state = Self::default();
        state.upsert(alert);
        state
    }

    /// Inserts or replaces an alert. Returns true when the fingerprint is
    /// new to the group — a material membership change.
    fn upsert(&mut self, alert: Alert) -> bool {
        self.alerts.insert(alert.fingerprint(), alert).is_none()
    }

    /// Drops alerts that have been resolved longer than the flush window.
    fn prune(&mut self, now: DateTime<Utc>, flush: chrono::Duration) {
        self.alerts
            .retain(|_, a| a.is_firing(now) || a.ends_at.is_some_and(|e| e + flush > now));
    }

    fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Returns the members in fingerprint order for deterministic runs.
    fn snapshot(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.values().cloned().collect();
        alerts.sort_by_key(Alert::fingerprint);
        alerts
    }
}

/// A live group: its membership, its wake signal, and its task.
struct GroupHandle {
    state: Arc<Mutex<GroupState>>,
    changed: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Watches the alert provider and drives one pipeline schedule per group.
pub struct Dispatcher {
    route: Arc<Route>,
    integrations: Arc<HashMap<String, Vec<Integration>>>,
    pipeline: Arc<NotificationPipeline>,
    provider: AlertProvider,
    config: DispatcherConfig,
    groups: Arc<Mutex<HashMap<GroupKey, GroupHandle>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over an already validated route tree and
    /// integrations map.
    #[must_use]
    pub fn new(
        route: Arc<Route>,
        integrations: Arc<HashMap<String, Vec<Integration>>>,
        pipeline: Arc<NotificationPipeline>,
        provider: AlertProvider,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            route,
            integrations,
            pipeline,
            provider,
            config,
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the number of live groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.lock().len()
    }

    /// Runs the intake loop until the shutdown signal flips to true, then
    /// drains every group task. In-flight pipeline runs finish before their
    /// tasks exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut updates = self.provider.subscribe();

        // Replay the current set: alerts admitted before this task started
        // still need groups. Upserts are idempotent, so overlap with the
        // subscription is harmless.
        for alert in self.provider.list() {
            self.ingest(alert, &shutdown);
        }

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                update = updates.recv() => match update {
                    Ok(alert) => self.ingest(alert, &shutdown),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "alert update stream lagged, resyncing from the full set");
                        for alert in self.provider.list() {
                            self.ingest(alert, &shutdown);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("dispatcher stopping, draining group tasks");
        self.drain().await;
    }

    /// Resolves an alert's targets and folds it into the matching groups.
    fn ingest(&self, alert: Alert, shutdown: &watch::Receiver<bool>) {
        let targets: Vec<GroupParams> = if let Some(receiver) = &alert.receiver {
            // A receiver hint bypasses the routing tree; the root's grouping
            // settings apply.
            if !self.integrations.contains_key(receiver) {
                warn!(
                    receiver = %receiver,
                    alert = %alert,
                    "dropping alert hinted at an unknown receiver"
                );
                return;
            }
            vec![Self::params_for(&self.route, receiver.clone(), &alert.labels)]
        } else {
            self.route
                .matching(&alert.labels)
                .into_iter()
                .map(|route| Self::params_for(route, route.receiver.clone(), &alert.labels))
                .collect()
        };

        for params in targets {
            let mut groups = self.groups.lock();
            if let Some(handle) = groups.get(&params.key) {
                if handle.state.lock().upsert(alert.clone()) {
                    handle.changed.notify_one();
                }
            } else {
                let state = Arc::new(Mutex::new(GroupState::with(alert.clone())));
                let changed = Arc::new(Notify::new());
                let task = self.spawn_group(
                    params.clone(),
                    Arc::clone(&state),
                    Arc::clone(&changed),
                    shutdown.clone(),
                );
                debug!(group = %params.key, "created alert group");
                groups.insert(
                    params.key,
                    GroupHandle {
                        state,
                        changed,
                        task,
                    },
                );
            }
        }
    }

    fn params_for(route: &Route, receiver: String, labels: &LabelSet) -> GroupParams {
        GroupParams {
            key: GroupKey {
                route_id: route.id.clone(),
                receiver,
                labels: route.group_by.project(labels),
            },
            group_wait: route.group_wait,
            group_interval: route.group_interval,
            repeat_interval: route.repeat_interval,
        }
    }

    /// Spawns the task driving one group's pipeline schedule.
    fn spawn_group(
        &self,
        params: GroupParams,
        state: Arc<Mutex<GroupState>>,
        changed: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let integrations = Arc::clone(&self.integrations);
        let groups = Arc::clone(&self.groups);
        let flush = chrono::Duration::seconds(self.config.resolved_retention_secs as i64);

        tokio::spawn(async move {
            // Let the group coalesce before its first notification.
            tokio::select! {
                () = sleep(params.group_wait) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }

            loop {
                if *shutdown.borrow() {
                    break;
                }

                // Prune and check emptiness while holding the group map lock,
                // so a concurrent insert cannot land in a group mid-teardown.
                let alerts = {
                    let mut groups_guard = groups.lock();
                    let mut state_guard = state.lock();
                    state_guard.prune(Utc::now(), flush);
                    if state_guard.is_empty() {
                        groups_guard.remove(&params.key);
                        debug!(group = %params.key, "removed empty alert group");
                        return;
                    }
                    state_guard.snapshot()
                };

                let Some(receiver_integrations) = integrations.get(&params.key.receiver) else {
                    // Receivers are validated at startup and at ingest.
                    warn!(receiver = %params.key.receiver, "receiver disappeared, dropping group");
                    groups.lock().remove(&params.key);
                    return;
                };

                let ctx = NotifyContext {
                    receiver: params.key.receiver.clone(),
                    group_key: params.key.to_string(),
                    group_labels: params.key.labels.clone(),
                };
                let outcome = pipeline
                    .run(&ctx, params.repeat_interval, alerts, receiver_integrations)
                    .await;
                debug!(
                    group = %params.key,
                    delivered = outcome.delivered(),
                    failed = outcome.failed(),
                    "pipeline run complete"
                );

                tokio::select! {
                    () = sleep(params.group_interval) => {}
                    () = changed.notified() => {}
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Awaits every group task. Called after the shutdown signal fired, so
    /// the tasks are already on their way out.
    async fn drain(&self) {
        let handles: Vec<(GroupKey, GroupHandle)> = self.groups.lock().drain().collect();
        for (key, handle) in handles {
            if let Err(e) = handle.task.await {
                warn!(group = %key, error = %e, "group task aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    fn alert(pairs: &[(&str, &str)]) -> Alert {
        Alert::firing(labels(pairs))
    }

    mod group_key_tests {
        use super::*;

        #[test]
        fn display_combines_route_receiver_and_labels() {
            let key = GroupKey {
                route_id: "0/1".to_string(),
                receiver: "dba".to_string(),
                labels: labels(&[("team", "db")]),
            };
            assert_eq!(format!("{key}"), "0/1/dba:{team=\"db\"}");
        }

        #[test]
        fn receiver_is_part_of_the_identity() {
            let a = GroupKey {
                route_id: "0".to_string(),
                receiver: "dba".to_string(),
                labels: labels(&[("team", "db")]),
            };
            let mut b = a.clone();
            b.receiver = "pager".to_string();
            assert_ne!(a, b);
        }
    }

    mod group_state_tests {
        use super::*;

        #[test]
        fn upsert_reports_new_membership() {
            let mut state = GroupState::default();

            assert!(state.upsert(alert(&[("node", "n1")])));
            assert!(!state.upsert(alert(&[("node", "n1")])));
            assert!(state.upsert(alert(&[("node", "n2")])));
            assert_eq!(state.alerts.len(), 2);
        }

        #[test]
        fn prune_flushes_old_resolved_alerts() {
            let now = Utc::now();
            let flush = chrono::Duration::minutes(5);
            let mut state = GroupState::default();

            state.upsert(alert(&[("node", "live")]));
            let mut recent = alert(&[("node", "recent")]);
            recent.resolve(now - chrono::Duration::minutes(1));
            state.upsert(recent);
            let mut old = alert(&[("node", "old")]);
            old.resolve(now - chrono::Duration::minutes(30));
            state.upsert(old);

            state.prune(now, flush);

            let remaining: Vec<Alert> = state.snapshot();
            let nodes: Vec<&str> = remaining
                .iter()
                .filter_map(|a| a.labels.get("node"))
                .collect();
            assert_eq!(remaining.len(), 2);
            assert!(nodes.contains(&"live"));
            assert!(nodes.contains(&"recent"));
        }

        #[test]
        fn snapshot_is_fingerprint_ordered() {
            let mut state = GroupState::default();
            state.upsert(alert(&[("node", "n1")]));
            state.upsert(alert(&[("node", "n2")]));
            state.upsert(alert(&[("node", "n3")]));

            let snapshot = state.snapshot();
            let prints: Vec<Fingerprint> = snapshot.iter().map(Alert::fingerprint).collect();
            let mut sorted = prints.clone();
            sorted.sort_unstable();
            assert_eq!(prints, sorted);
        }
    }
}
