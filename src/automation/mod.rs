//! Automation platform (ActiveCampaign) access.
//!
//! Single-object lookups (`get_automation`, `get_template`) return the raw
//! [`RemoteError`] so callers wrap them in their own retry label. Listings
//! are paginated here and retry each page internally.

pub mod paginate;
pub mod types;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ActiveCampaignConfig;
use crate::error::{RemoteError, SyncError};
use crate::retry::RetryRunner;

use self::paginate::{PageRequest, PageSource, fetch_all};
pub use self::types::{Automation, Contact, ContactRun, Field, FieldValue, Template};

const SERVICE: &str = "activecampaign";

/// Source of automations, templates and audience membership.
#[async_trait]
pub trait AutomationSource: Send + Sync {
    async fn get_automation(&self, automation_id: &str) -> Result<Automation, RemoteError>;

    async fn get_template(&self, template_id: &str) -> Result<Template, RemoteError>;

    /// Every contact that has entered the automation.
    async fn list_audience(&self, automation_id: &str) -> Result<Vec<Contact>, SyncError>;

    /// Run records (contact ↔ automation) for the automation.
    async fn list_runs(&self, automation_id: &str) -> Result<Vec<ContactRun>, SyncError>;

    /// The custom field catalogue.
    async fn list_fields(&self) -> Result<Vec<Field>, SyncError>;

    /// Custom field values set on one contact.
    async fn list_field_values(&self, contact_id: &str) -> Result<Vec<FieldValue>, SyncError>;
}

/// ActiveCampaign v3 REST client.
pub struct ActiveCampaignClient {
    config: ActiveCampaignConfig,
    client: reqwest::Client,
    retry: RetryRunner,
}

impl ActiveCampaignClient {
    pub fn new(config: ActiveCampaignConfig, retry: RetryRunner) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Http {
                service: SERVICE.into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            client,
            retry,
        })
    }

    async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value, RemoteError> {
        let url = format!("{}{}", self.config.api_url, path);
        let resp = self
            .client
            .get(&url)
            .header("Api-Token", self.config.api_key.expose_secret())
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(SERVICE, e, self.config.request_timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                service: SERVICE.into(),
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| RemoteError::from_reqwest(SERVICE, e, self.config.request_timeout))
    }

    /// GET a single object wrapped under `key`, e.g. `{"automation": {...}}`.
    async fn get_wrapped<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<T, RemoteError> {
        let mut body = self.get_json(path, &[]).await?;
        let inner = body
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| RemoteError::decode(SERVICE, format!("missing '{key}' in {path}")))?;
        serde_json::from_value(inner)
            .map_err(|e| RemoteError::decode(SERVICE, format!("{path}: {e}")))
    }

    fn listing<'a>(&self, endpoint: &'a str, result_key: &'a str) -> PageRequest<'a> {
        PageRequest::new(endpoint, result_key)
            .page_size(self.config.page_size)
            .throttle(self.config.fetch_delay)
    }
}

#[async_trait]
impl PageSource for ActiveCampaignClient {
    async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, RemoteError> {
        self.get_json(endpoint, params).await
    }
}

#[async_trait]
impl AutomationSource for ActiveCampaignClient {
    async fn get_automation(&self, automation_id: &str) -> Result<Automation, RemoteError> {
        debug!(automation_id, "Fetching automation details");
        self.get_wrapped(&format!("/automations/{automation_id}"), "automation")
            .await
    }

    async fn get_template(&self, template_id: &str) -> Result<Template, RemoteError> {
        debug!(template_id, "Fetching template contents");
        self.get_wrapped(&format!("/templates/{template_id}"), "template")
            .await
    }

    async fn list_audience(&self, automation_id: &str) -> Result<Vec<Contact>, SyncError> {
        let request = self
            .listing("/contacts", "contacts")
            .param("seriesid", automation_id);
        let contacts: Vec<Contact> =
            fetch_all(self, &self.retry, &request, "Listing automation contacts").await?;
        info!(automation_id, count = contacts.len(), "Fetched automation contacts");
        Ok(contacts)
    }

    async fn list_runs(&self, automation_id: &str) -> Result<Vec<ContactRun>, SyncError> {
        let request = self
            .listing("/contactAutomations", "contactAutomations")
            .param("filters[seriesid]", automation_id);
        let runs: Vec<ContactRun> =
            fetch_all(self, &self.retry, &request, "Listing automation runs").await?;
        debug!(automation_id, count = runs.len(), "Fetched automation runs");
        Ok(runs)
    }

    async fn list_fields(&self) -> Result<Vec<Field>, SyncError> {
        let request = self.listing("/fields", "fields");
        fetch_all(self, &self.retry, &request, "Listing custom fields").await
    }

    async fn list_field_values(&self, contact_id: &str) -> Result<Vec<FieldValue>, SyncError> {
        let endpoint = format!("/contacts/{contact_id}/fieldValues");
        let request = self.listing(&endpoint, "fieldValues");
        fetch_all(self, &self.retry, &request, "Listing contact field values").await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mockito::Matcher;
    use secrecy::SecretString;

    use super::*;
    use crate::notify::{LogNotifier, Notifications};
    use crate::retry::RetryPolicy;

    fn client(url: String) -> ActiveCampaignClient {
        let config = ActiveCampaignConfig {
            api_url: url,
            api_key: SecretString::from("ac-key"),
            page_size: 2,
            fetch_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        };
        let retry = RetryRunner::new(
            RetryPolicy::new(vec![Duration::from_millis(1)], true).unwrap(),
            Notifications::new(Arc::new(LogNotifier), None),
        );
        ActiveCampaignClient::new(config, retry).unwrap()
    }

    #[tokio::test]
    async fn automation_is_unwrapped_and_token_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/automations/12")
            .match_header("Api-Token", "ac-key")
            .with_status(200)
            .with_body(r#"{"automation": {"id": "12", "name": "Welcome series", "status": "1"}}"#)
            .create_async()
            .await;

        let automation = client(server.url()).get_automation("12").await.unwrap();
        assert_eq!(automation.name, "Welcome series");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_becomes_remote_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/templates/9")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let err = client(server.url()).get_template("9").await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn audience_pages_until_total() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/contacts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("seriesid".into(), "5".into()),
                Matcher::UrlEncoded("offset".into(), "0".into()),
            ]))
            .with_body(
                r#"{"contacts": [{"id": "1", "email": "a@x.io"}, {"id": "2", "email": "b@x.io"}], "meta": {"total": "3"}}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/contacts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("seriesid".into(), "5".into()),
                Matcher::UrlEncoded("offset".into(), "2".into()),
            ]))
            .with_body(r#"{"contacts": [{"id": "3", "email": "c@x.io"}], "meta": {"total": "3"}}"#)
            .create_async()
            .await;

        let contacts = client(server.url()).list_audience("5").await.unwrap();
        let emails: Vec<&str> = contacts.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.io", "b@x.io", "c@x.io"]);
        first.assert_async().await;
        second.assert_async().await;
    }
}
