//! Retry wrapper for remote calls.
//!
//! Every call to an external service goes through [`RetryRunner::run`]. A
//! failure is logged, reported to the operator with the upcoming delay, and
//! retried after `delays[attempt]`. Past the end of the delay list the last
//! delay is reused. With `capped` the runner gives up after one wait per
//! configured delay; otherwise it retries until the call succeeds.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{ConfigError, RemoteError, SyncError};
use crate::notify::Notifications;

/// Backoff schedule and give-up behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Non-decreasing wait before each retry.
    pub delays: Vec<Duration>,
    /// Stop after `delays.len()` waits instead of retrying forever.
    pub capped: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let five_minutes = Duration::from_secs(5 * 60);
        Self {
            delays: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                five_minutes,
                five_minutes,
                five_minutes,
                five_minutes,
                five_minutes,
            ],
            capped: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>, capped: bool) -> Result<Self, ConfigError> {
        if delays.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "RETRY_DELAYS_SECS".into(),
                message: "at least one delay is required".into(),
            });
        }
        if delays.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::InvalidValue {
                key: "RETRY_DELAYS_SECS".into(),
                message: "delays must not decrease".into(),
            });
        }
        Ok(Self { delays, capped })
    }

    /// Wait before retry number `attempt` (0-based), saturating at the last delay.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.delays
            .get(attempt)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Whether another wait is allowed after `waits` waits already happened.
    pub fn allows_wait(&self, waits: usize) -> bool {
        !self.capped || waits < self.delays.len()
    }
}

/// Runs remote operations under a [`RetryPolicy`], alerting on each failure.
#[derive(Clone)]
pub struct RetryRunner {
    policy: RetryPolicy,
    notifications: Notifications,
}

impl RetryRunner {
    pub fn new(policy: RetryPolicy, notifications: Notifications) -> Self {
        Self {
            policy,
            notifications,
        }
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// `label` describes the action in logs and alerts.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut waits = 0usize;
        loop {
            debug!(action = label, attempt = waits + 1, "Running remote action");

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.policy.allows_wait(waits) {
                error!(action = label, attempts = waits + 1, error = %err, "Max retries reached");
                self.notifications
                    .alert(&format!("Max retries reached for action: {label}: `{err}`"));
                return Err(SyncError::RetriesExhausted {
                    label: label.to_string(),
                    attempts: (waits + 1) as u32,
                    source: err,
                });
            }

            let delay = self.policy.delay_for(waits);
            warn!(
                action = label,
                attempt = waits + 1,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "Remote action failed, will retry"
            );
            self.notifications.alert(&format!(
                "{label}: `{err}`. Retrying in {}...",
                describe_delay(delay)
            ));

            tokio::time::sleep(delay).await;
            waits += 1;
        }
    }
}

/// Human wording for a delay in alerts: `30 seconds`, `5 minutes`, `250 ms`.
fn describe_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    if secs == 0 {
        format!("{} ms", delay.as_millis())
    } else if secs % 60 == 0 {
        let mins = secs / 60;
        format!("{mins} minute{}", if mins == 1 { "" } else { "s" })
    } else {
        format!("{secs} seconds")
    }
}
