//! Transactional mail sender (Postmark batch API).

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::automation::Contact;
use crate::config::PostmarkConfig;
use crate::error::RemoteError;
use crate::pipeline::render::{ContactVariables, substitute};

const SERVICE: &str = "postmark";

/// One personalized message in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub message_stream: String,
}

/// Per-recipient outcome of a batch send. Error code 0 means accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendResult {
    pub error_code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "MessageID")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl SendResult {
    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }
}

/// A batch's results split by outcome, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub succeeded: Vec<SendResult>,
    pub failed: Vec<SendResult>,
}

impl BatchOutcome {
    pub fn partition(results: Vec<SendResult>) -> Self {
        let (succeeded, failed) = results.into_iter().partition(SendResult::is_success);
        Self { succeeded, failed }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// One line per failed recipient.
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|r| {
                format!(
                    "Error sending to {}: {} (code {})",
                    r.to.as_deref().unwrap_or("unknown recipient"),
                    r.message,
                    r.error_code
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Sender identity shared by every message of a batch.
#[derive(Debug, Clone)]
pub struct Sender {
    pub from: String,
    pub message_stream: String,
}

/// Build one message per recipient with placeholders filled from that
/// recipient's variables.
///
/// A recipient without a variable set gets the basic contact attributes.
pub fn build_batch(
    sender: &Sender,
    recipients: &[Contact],
    subject: &str,
    html: &str,
    variables: &HashMap<String, ContactVariables>,
) -> Vec<OutboundMessage> {
    recipients
        .iter()
        .map(|contact| {
            let body = match variables.get(&contact.id) {
                Some(vars) => substitute(html, vars),
                None => {
                    warn!(contact = %contact.email, "No variables found for contact");
                    substitute(html, &ContactVariables::basic(contact))
                }
            };
            OutboundMessage {
                from: sender.from.clone(),
                to: contact.email.clone(),
                subject: subject.to_string(),
                html_body: body,
                text_body: String::new(),
                message_stream: sender.message_stream.clone(),
            }
        })
        .collect()
}

/// Submits message batches.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<Vec<SendResult>, RemoteError>;
}

pub struct PostmarkMailer {
    config: PostmarkConfig,
    client: reqwest::Client,
}

impl PostmarkMailer {
    pub fn new(config: PostmarkConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Http {
                service: SERVICE.into(),
                reason: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    pub fn sender(&self) -> Sender {
        Sender {
            from: self.config.from_email.clone(),
            message_stream: self.config.message_stream.clone(),
        }
    }
}

#[async_trait]
impl Mailer for PostmarkMailer {
    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<Vec<SendResult>, RemoteError> {
        info!(count = messages.len(), "Sending batch email");

        let url = format!("{}/email/batch", self.config.api_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", self.config.server_token.expose_secret())
            .json(messages)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(SERVICE, e, self.config.request_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                service: SERVICE.into(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let results: Vec<SendResult> = resp
            .json()
            .await
            .map_err(|e| RemoteError::from_reqwest(SERVICE, e, self.config.request_timeout))?;
        debug!(count = results.len(), "Batch email accepted");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;

    fn contact(id: &str, email: &str, first: &str) -> Contact {
        Contact {
            id: id.into(),
            email: email.into(),
            first_name: first.into(),
            last_name: String::new(),
            phone: String::new(),
        }
    }

    fn sender() -> Sender {
        Sender {
            from: "news@example.com".into(),
            message_stream: "outbound".into(),
        }
    }

    #[test]
    fn partition_splits_on_error_code() {
        let results: Vec<SendResult> = serde_json::from_str(
            r#"[
                {"ErrorCode": 0, "Message": "OK", "MessageID": "m1", "To": "a@x.io"},
                {"ErrorCode": 406, "Message": "Inactive recipient", "To": "b@x.io"},
                {"ErrorCode": 0, "Message": "OK", "MessageID": "m3", "To": "c@x.io"}
            ]"#,
        )
        .unwrap();

        let outcome = BatchOutcome::partition(results);
        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.total(), 3);
        assert_eq!(
            outcome.failure_summary(),
            "Error sending to b@x.io: Inactive recipient (code 406)"
        );
    }

    #[test]
    fn batch_personalizes_each_recipient() {
        let recipients = vec![contact("1", "a@x.io", "Ana"), contact("2", "b@x.io", "Ben")];
        let mut variables = HashMap::new();
        variables.insert("1".to_string(), ContactVariables::basic(&recipients[0]));

        let batch = build_batch(&sender(), &recipients, "Hi", "<p>Hello %FIRSTNAME%</p>", &variables);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].html_body, "<p>Hello Ana</p>");
        // falls back to basic attributes when no variable set was resolved
        assert_eq!(batch[1].html_body, "<p>Hello Ben</p>");
        assert_eq!(batch[1].to, "b@x.io");
        assert_eq!(batch[1].message_stream, "outbound");
    }

    #[test]
    fn outbound_message_uses_postmark_casing() {
        let msg = OutboundMessage {
            from: "f@x.io".into(),
            to: "t@x.io".into(),
            subject: "S".into(),
            html_body: "<p/>".into(),
            text_body: String::new(),
            message_stream: "outbound".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["HtmlBody"], "<p/>");
        assert_eq!(json["MessageStream"], "outbound");
    }

    #[tokio::test]
    async fn postmark_batch_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/email/batch")
            .match_header("X-Postmark-Server-Token", "pm-token")
            .with_body(r#"[{"ErrorCode": 0, "Message": "OK", "To": "a@x.io"}]"#)
            .create_async()
            .await;

        let mailer = PostmarkMailer::new(PostmarkConfig {
            api_url: server.url(),
            server_token: SecretString::from("pm-token"),
            from_email: "news@example.com".into(),
            message_stream: "outbound".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let batch = build_batch(
            &mailer.sender(),
            &[contact("1", "a@x.io", "Ana")],
            "Hi",
            "<p/>",
            &HashMap::new(),
        );
        let results = mailer.send_batch(&batch).await.unwrap();
        assert!(results[0].is_success());
        mock.assert_async().await;
    }
}
