//! The notification pipeline.
//!
//! One [`NotificationPipeline::run`] processes one alert group for one
//! receiver. Stages execute strictly in order: silence filtering, a settle
//! wait, then per-integration deduplication, delivery with retry, and the
//! notification log update. The per-integration stages fan out concurrently;
//! a run completes only when every integration branch has finished, and no
//! branch outcome ever affects another.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use tocsin_core::{Alert, Fingerprint};
use tocsin_nflog::{LogKey, NotificationLog};
use tocsin_silence::SilenceStore;

use crate::integration::{DeliveryError, Integration, NotifyContext};

fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_secs() -> u64 {
    30
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    5
}
fn default_max_elapsed_secs() -> u64 {
    120
}
fn default_attempt_timeout_secs() -> u64 {
    30
}

/// Exponential backoff settings for the delivery stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (in milliseconds).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Ceiling on any single backoff delay (in seconds).
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Maximum number of delivery attempts, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Budget for the whole retry loop (in seconds).
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
    /// Per-attempt timeout (in seconds). A timed-out attempt counts as a
    /// retryable failure and is abandoned, not killed mid-transport.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            max_elapsed_secs: default_max_elapsed_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl RetryConfig {
    /// Calculates the backoff delay after the given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(delay_millis).min(Duration::from_secs(self.max_delay_secs))
    }

    fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// How one integration branch of a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationOutcome {
    /// The notification was delivered.
    Delivered {
        /// Number of attempts it took.
        attempts: u32,
    },
    /// Identical content was already sent within the repeat interval.
    Deduplicated,
    /// Delivery failed terminally or retries ran out.
    Failed {
        /// Number of attempts made.
        attempts: u32,
        /// Why delivery gave up.
        cause: String,
    },
}

/// The outcome of one integration branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationResult {
    /// The integration kind name.
    pub integration: String,
    /// The integration's index within its receiver.
    pub index: u32,
    /// How the branch ended.
    pub outcome: IntegrationOutcome,
}

/// The outcome of a whole pipeline run for one (group, receiver) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every alert in the group was silenced; nothing reached delivery and
    /// no log entry was written.
    FullySilenced {
        /// How many alerts were suppressed.
        silenced: usize,
    },
    /// The per-integration stages ran; one result per integration.
    Completed {
        /// Branch results in integration order.
        results: Vec<IntegrationResult>,
    },
}

impl RunOutcome {
    /// Returns the number of branches that delivered.
    #[must_use]
    pub fn delivered(&self) -> usize {
        match self {
            Self::FullySilenced { .. } => 0,
            Self::Completed { results } => results
                .iter()
                .filter(|r| matches!(r.outcome, IntegrationOutcome::Delivered { .. }))
                .count(),
        }
    }

    /// Returns the number of branches that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        match self {
            Self::FullySilenced { .. } => 0,
            Self::Completed { results } => results
                .iter()
                .filter(|r| matches!(r.outcome, IntegrationOutcome::Failed { .. }))
                .count(),
        }
    }
}

/// Computes the content fingerprint of an alert set.
///
/// The hash covers each alert's identity and its firing/resolved status at
/// `now`, independent of ordering — a group whose membership and statuses are
/// unchanged fingerprints identically across runs.
#[must_use]
pub fn content_fingerprint(alerts: &[Alert], now: DateTime<Utc>) -> Fingerprint {
    let mut items: Vec<(u64, bool)> = alerts
        .iter()
        .map(|a| (a.fingerprint().value(), a.is_firing(now)))
        .collect();
    items.sort_unstable();

    let mut hasher = DefaultHasher::new();
    for item in items {
        item.hash(&mut hasher);
    }
    Fingerprint::from_raw(hasher.finish())
}

/// The per-group, per-receiver processing pipeline.
#[derive(Debug, Clone)]
pub struct NotificationPipeline {
    silences: SilenceStore,
    nflog: NotificationLog,
    retry: RetryConfig,
    settle_wait: Duration,
}

impl NotificationPipeline {
    /// Creates a pipeline over the given stores with default retry behavior
    /// and no settle wait.
    #[must_use]
    pub fn new(silences: SilenceStore, nflog: NotificationLog) -> Self {
        Self {
            silences,
            nflog,
            retry: RetryConfig::default(),
            settle_wait: Duration::ZERO,
        }
    }

    /// Sets the retry behavior.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the settle wait applied between silencing and deduplication.
    #[must_use]
    pub const fn with_settle_wait(mut self, wait: Duration) -> Self {
        self.settle_wait = wait;
        self
    }

    /// Runs the full stage sequence for one group and receiver.
    ///
    /// Silenced alerts are filtered from this run but stay members of the
    /// group; if nothing survives, the run ends as
    /// [`RunOutcome::FullySilenced`] without touching the notification log.
    pub async fn run(
        &self,
        ctx: &NotifyContext,
        repeat_interval: Duration,
        alerts: Vec<Alert>,
        integrations: &[Integration],
    ) -> RunOutcome {
        // Silence stage.
        let now = Utc::now();
        let total = alerts.len();
        let survivors: Vec<Alert> = alerts
            .into_iter()
            .filter(|alert| {
                let silenced_by = self.silences.silenced_by(&alert.labels, now);
                if silenced_by.is_empty() {
                    true
                } else {
                    debug!(alert = %alert, silences = ?silenced_by, "alert silenced");
                    false
                }
            })
            .collect();

        let silenced = total - survivors.len();
        if survivors.is_empty() {
            info!(
                group = %ctx.group_key,
                receiver = %ctx.receiver,
                silenced,
                "group fully silenced"
            );
            return RunOutcome::FullySilenced { silenced };
        }

        // Wait stage: let the notification log settle before deduplicating.
        if !self.settle_wait.is_zero() {
            sleep(self.settle_wait).await;
        }

        let fingerprint = content_fingerprint(&survivors, Utc::now());
        let results = join_all(integrations.iter().map(|integration| {
            self.notify_one(ctx, repeat_interval, fingerprint, &survivors, integration)
        }))
        .await;

        RunOutcome::Completed { results }
    }

    /// Deduplication, delivery with retry, and the log update for one
    /// integration branch.
    async fn notify_one(
        &self,
        ctx: &NotifyContext,
        repeat_interval: Duration,
        fingerprint: Fingerprint,
        alerts: &[Alert],
        integration: &Integration,
    ) -> IntegrationResult {
        let key = LogKey::new(
            ctx.group_key.clone(),
            ctx.receiver.clone(),
            integration.name(),
            integration.index(),
        );

        // Deduplication stage.
        if let Some(entry) = self.nflog.last_sent(&key) {
            let repeat_due = Utc::now() >= entry.timestamp + chrono_duration(repeat_interval);
            if entry.fingerprint == fingerprint && !repeat_due {
                debug!(key = %key, "notification deduplicated");
                return IntegrationResult {
                    integration: integration.name().to_string(),
                    index: integration.index(),
                    outcome: IntegrationOutcome::Deduplicated,
                };
            }
        }

        // Delivery stage with exponential backoff, then the log update.
        let started = Instant::now();
        let mut attempt = 0u32;
        let outcome = loop {
            attempt += 1;

            let delivery = match timeout(
                self.retry.attempt_timeout(),
                integration.attempt(ctx, alerts),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::retryable(format!(
                    "attempt timed out after {}s",
                    self.retry.attempt_timeout_secs
                ))),
            };

            match delivery {
                Ok(()) => {
                    self.nflog.record(key.clone(), fingerprint, Utc::now());
                    info!(key = %key, attempts = attempt, "notification delivered");
                    break IntegrationOutcome::Delivered { attempts: attempt };
                }
                Err(err) if !err.retryable => {
                    warn!(key = %key, error = %err, "notification failed terminally");
                    break IntegrationOutcome::Failed {
                        attempts: attempt,
                        cause: err.cause,
                    };
                }
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            key = %key,
                            attempts = attempt,
                            error = %err,
                            "notification failed, retries exhausted"
                        );
                        break IntegrationOutcome::Failed {
                            attempts: attempt,
                            cause: format!("retries exhausted: {}", err.cause),
                        };
                    }

                    let delay = self.retry.delay_for_attempt(attempt);
                    if started.elapsed() + delay > self.retry.max_elapsed() {
                        warn!(
                            key = %key,
                            attempts = attempt,
                            error = %err,
                            "notification failed, retry budget exhausted"
                        );
                        break IntegrationOutcome::Failed {
                            attempts: attempt,
                            cause: format!("retry budget exhausted: {}", err.cause),
                        };
                    }

                    debug!(key = %key, attempt, delay_ms = delay.as_millis() as u64, "retrying delivery");
                    sleep(delay).await;
                }
            }
        };

        IntegrationResult {
            integration: integration.name().to_string(),
            index: integration.index(),
            outcome,
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tocsin_core::{LabelSet, Matcher};
    use tocsin_silence::Silence;

    fn ctx() -> NotifyContext {
        NotifyContext {
            receiver: "dba".to_string(),
            group_key: "0:{team=\"db\"}".to_string(),
            group_labels: [("team", "db")].into_iter().collect(),
        }
    }

    fn alert(pairs: &[(&str, &str)]) -> Alert {
        Alert::firing(pairs.iter().copied().collect::<LabelSet>())
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay_ms: 1,
            max_delay_secs: 1,
            multiplier: 2.0,
            max_attempts: 5,
            max_elapsed_secs: 10,
            attempt_timeout_secs: 5,
        }
    }

    fn pipeline() -> NotificationPipeline {
        NotificationPipeline::new(SilenceStore::new(), NotificationLog::new())
            .with_retry(fast_retry())
    }

    /// Hook that counts attempts and fails (retryably) the first
    /// `failures` times.
    fn flaky_hook(failures: u32, counter: Arc<AtomicU32>) -> Integration {
        Integration::hook("hook", 0, move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(DeliveryError::retryable("transport busy"))
            } else {
                Ok(())
            }
        })
    }

    const REPEAT: Duration = Duration::from_secs(3600);

    mod backoff_tests {
        use super::*;

        #[test]
        fn delay_doubles_and_caps() {
            let retry = RetryConfig {
                initial_delay_ms: 1000,
                max_delay_secs: 5,
                multiplier: 2.0,
                ..RetryConfig::default()
            };

            assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(1));
            assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(2));
            assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(4));
            assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(5)); // capped
            assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(5));
        }
    }

    mod fingerprint_tests {
        use super::*;

        #[test]
        fn order_independent() {
            let now = Utc::now();
            let a = alert(&[("node", "n1")]);
            let b = alert(&[("node", "n2")]);

            assert_eq!(
                content_fingerprint(&[a.clone(), b.clone()], now),
                content_fingerprint(&[b, a], now)
            );
        }

        #[test]
        fn changes_with_membership() {
            let now = Utc::now();
            let a = alert(&[("node", "n1")]);
            let b = alert(&[("node", "n2")]);

            assert_ne!(
                content_fingerprint(&[a.clone()], now),
                content_fingerprint(&[a, b], now)
            );
        }

        #[test]
        fn changes_when_an_alert_resolves() {
            let now = Utc::now();
            let firing = alert(&[("node", "n1")]);
            let mut resolved = firing.clone();
            resolved.resolve(now - chrono::Duration::seconds(1));

            assert_ne!(
                content_fingerprint(&[firing], now),
                content_fingerprint(&[resolved], now)
            );
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn second_identical_run_is_deduplicated() {
            let pipeline = pipeline();
            let counter = Arc::new(AtomicU32::new(0));
            let integrations = vec![flaky_hook(0, Arc::clone(&counter))];
            let alerts = vec![alert(&[("team", "db")])];

            let first = pipeline.run(&ctx(), REPEAT, alerts.clone(), &integrations).await;
            let second = pipeline.run(&ctx(), REPEAT, alerts, &integrations).await;

            assert_eq!(first.delivered(), 1);
            assert_eq!(
                second,
                RunOutcome::Completed {
                    results: vec![IntegrationResult {
                        integration: "hook".to_string(),
                        index: 0,
                        outcome: IntegrationOutcome::Deduplicated,
                    }]
                }
            );
            // Exactly one delivery happened.
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn fully_silenced_group_writes_no_log_entry() {
            let silences = SilenceStore::new();
            silences
                .create(
                    Silence::new(
                        vec![Matcher::equal("team", "db")],
                        Utc::now() - chrono::Duration::hours(1),
                        Utc::now() + chrono::Duration::hours(1),
                        "admin",
                        "maintenance",
                    )
                    .unwrap(),
                )
                .unwrap();
            let nflog = NotificationLog::new();
            let pipeline = NotificationPipeline::new(silences, nflog.clone());

            let counter = Arc::new(AtomicU32::new(0));
            let integrations = vec![flaky_hook(0, Arc::clone(&counter))];

            let outcome = pipeline
                .run(&ctx(), REPEAT, vec![alert(&[("team", "db")])], &integrations)
                .await;

            assert_eq!(outcome, RunOutcome::FullySilenced { silenced: 1 });
            assert_eq!(counter.load(Ordering::SeqCst), 0);
            assert!(nflog.is_empty());
        }

        #[tokio::test]
        async fn silenced_alerts_are_filtered_not_fatal() {
            let silences = SilenceStore::new();
            silences
                .create(
                    Silence::new(
                        vec![Matcher::equal("node", "n1")],
                        Utc::now() - chrono::Duration::hours(1),
                        Utc::now() + chrono::Duration::hours(1),
                        "admin",
                        "n1 down for maintenance",
                    )
                    .unwrap(),
                )
                .unwrap();
            let pipeline = NotificationPipeline::new(silences, NotificationLog::new());

            let seen = Arc::new(AtomicU32::new(0));
            let seen_in_hook = Arc::clone(&seen);
            let integrations = vec![Integration::hook("hook", 0, move |_, alerts| {
                seen_in_hook.store(alerts.len() as u32, Ordering::SeqCst);
                Ok(())
            })];

            let outcome = pipeline
                .run(
                    &ctx(),
                    REPEAT,
                    vec![
                        alert(&[("team", "db"), ("node", "n1")]),
                        alert(&[("team", "db"), ("node", "n2")]),
                    ],
                    &integrations,
                )
                .await;

            assert_eq!(outcome.delivered(), 1);
            assert_eq!(seen.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn retryable_failure_then_success_logs_once() {
            let nflog = NotificationLog::new();
            let pipeline = NotificationPipeline::new(SilenceStore::new(), nflog.clone())
                .with_retry(fast_retry());

            let counter = Arc::new(AtomicU32::new(0));
            let integrations = vec![flaky_hook(2, Arc::clone(&counter))];

            let before = Utc::now();
            let outcome = pipeline
                .run(&ctx(), REPEAT, vec![alert(&[("team", "db")])], &integrations)
                .await;

            match outcome {
                RunOutcome::Completed { ref results } => {
                    assert_eq!(
                        results[0].outcome,
                        IntegrationOutcome::Delivered { attempts: 3 }
                    );
                }
                ref other => panic!("expected completion, got {other:?}"),
            }
            assert_eq!(counter.load(Ordering::SeqCst), 3);
            assert_eq!(nflog.len(), 1);

            let key = LogKey::new(ctx().group_key, "dba", "hook", 0);
            let entry = nflog.last_sent(&key).unwrap();
            assert!(entry.timestamp >= before);
        }

        #[tokio::test]
        async fn permanent_failure_is_not_retried() {
            let nflog = NotificationLog::new();
            let pipeline = NotificationPipeline::new(SilenceStore::new(), nflog.clone())
                .with_retry(fast_retry());

            let counter = Arc::new(AtomicU32::new(0));
            let count_in_hook = Arc::clone(&counter);
            let integrations = vec![Integration::hook("hook", 0, move |_, _| {
                count_in_hook.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::permanent("bad payload"))
            })];

            let outcome = pipeline
                .run(&ctx(), REPEAT, vec![alert(&[("team", "db")])], &integrations)
                .await;

            match outcome {
                RunOutcome::Completed { ref results } => {
                    assert!(matches!(
                        results[0].outcome,
                        IntegrationOutcome::Failed { attempts: 1, .. }
                    ));
                }
                ref other => panic!("expected completion, got {other:?}"),
            }
            assert_eq!(counter.load(Ordering::SeqCst), 1);
            assert!(nflog.is_empty());
        }

        #[tokio::test]
        async fn one_failing_integration_does_not_block_others() {
            let nflog = NotificationLog::new();
            let pipeline = NotificationPipeline::new(SilenceStore::new(), nflog.clone())
                .with_retry(RetryConfig {
                    max_attempts: 2,
                    ..fast_retry()
                });

            let integrations = vec![
                Integration::hook("pager", 0, |_, _| {
                    Err(DeliveryError::retryable("always down"))
                }),
                Integration::hook("chat", 0, |_, _| Ok(())),
            ];

            let outcome = pipeline
                .run(&ctx(), REPEAT, vec![alert(&[("team", "db")])], &integrations)
                .await;

            assert_eq!(outcome.failed(), 1);
            assert_eq!(outcome.delivered(), 1);
            // Only the successful branch wrote a log entry.
            assert_eq!(nflog.len(), 1);
            let chat_key = LogKey::new(ctx().group_key, "dba", "chat", 0);
            assert!(nflog.last_sent(&chat_key).is_some());
        }

        #[tokio::test]
        async fn elapsed_repeat_interval_allows_resend() {
            let nflog = NotificationLog::new();
            let pipeline = NotificationPipeline::new(SilenceStore::new(), nflog.clone())
                .with_retry(fast_retry());

            let alerts = vec![alert(&[("team", "db")])];
            let fingerprint = content_fingerprint(&alerts, Utc::now());
            let key = LogKey::new(ctx().group_key, "dba", "hook", 0);
            // A delivery recorded two hours ago, repeat interval of one hour.
            nflog.record(
                key.clone(),
                fingerprint,
                Utc::now() - chrono::Duration::hours(2),
            );

            let counter = Arc::new(AtomicU32::new(0));
            let integrations = vec![flaky_hook(0, Arc::clone(&counter))];

            let outcome = pipeline.run(&ctx(), REPEAT, alerts, &integrations).await;

            assert_eq!(outcome.delivered(), 1);
            assert_eq!(counter.load(Ordering::SeqCst), 1);
            assert!(nflog.last_sent(&key).unwrap().timestamp > Utc::now() - chrono::Duration::minutes(1));
        }

        #[tokio::test]
        async fn changed_content_is_not_deduplicated() {
            let pipeline = pipeline();
            let counter = Arc::new(AtomicU32::new(0));
            let integrations = vec![flaky_hook(0, Arc::clone(&counter))];

            let first = vec![alert(&[("team", "db"), ("node", "n1")])];
            let grown = vec![
                alert(&[("team", "db"), ("node", "n1")]),
                alert(&[("team", "db"), ("node", "n2")]),
            ];

            pipeline.run(&ctx(), REPEAT, first, &integrations).await;
            let second = pipeline.run(&ctx(), REPEAT, grown, &integrations).await;

            assert_eq!(second.delivered(), 1);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
    }
}
