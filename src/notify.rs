//! Operator notifications over a chat webhook.
//!
//! Delivery is best-effort: [`Notifications::dispatch`] spawns the send and
//! returns immediately, and a failed send is only logged. Nothing in the
//! pipelines waits on, or reacts to, a notification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SlackConfig;
use crate::error::NotifyError;

/// A chat message sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Slack workflow webhook (`{"message": "..."}` payload).
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "message": text }))
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::Rejected {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(notification = %text, "Webhook not configured; notification logged only");
        Ok(())
    }
}

/// Non-blocking notification handle shared by the retry runner and pipelines.
#[derive(Clone)]
pub struct Notifications {
    notifier: Arc<dyn Notifier>,
    tag_user: Option<String>,
}

impl Notifications {
    pub fn new(notifier: Arc<dyn Notifier>, tag_user: Option<String>) -> Self {
        Self { notifier, tag_user }
    }

    /// Pick the Slack webhook when configured, the log sink otherwise.
    pub fn from_config(config: &SlackConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => Arc::new(SlackNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        };
        Self::new(notifier, config.tag_user.clone())
    }

    /// Send `text` in the background.
    ///
    /// The returned handle may be dropped; it exists so tests can wait for
    /// delivery.
    pub fn dispatch(&self, text: impl Into<String>) -> JoinHandle<()> {
        let text = text.into();
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            match notifier.send(&text).await {
                Ok(()) => debug!("Notification delivered"),
                Err(e) => warn!(error = %e, "Notification failed"),
            }
        })
    }

    /// Operator alert: prefixed with the stop marker and the configured mention.
    pub fn alert(&self, description: &str) -> JoinHandle<()> {
        self.dispatch(self.format_alert(description))
    }

    /// Warning for an overdue job.
    pub fn warning(&self, description: &str) -> JoinHandle<()> {
        self.dispatch(format!("⚠️ {description}"))
    }

    fn format_alert(&self, description: &str) -> String {
        match &self.tag_user {
            Some(user) => format!("⛔️ {user} {description}"),
            None => format!("⛔️ {description}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recording {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn send(&self, _text: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected { status: 500 })
        }
    }

    #[tokio::test]
    async fn alert_carries_mention_and_marker() {
        let sink = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
        });
        let notifications = Notifications::new(sink.clone(), Some("@Ops".into()));

        notifications.alert("Sync stalled").await.unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), ["⛔️ @Ops Sync stalled"]);
    }

    #[tokio::test]
    async fn failed_delivery_does_not_propagate() {
        let notifications = Notifications::new(Arc::new(Failing), None);
        // The task completes normally even though the webhook rejected it.
        notifications.dispatch("hello").await.unwrap();
    }

    #[tokio::test]
    async fn slack_payload_uses_message_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({ "message": "Email sent" }),
            ))
            .with_status(200)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url()));
        notifier.send("Email sent").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn slack_rejection_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(403)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url()));
        let err = notifier.send("x").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 403 }));
    }
}
