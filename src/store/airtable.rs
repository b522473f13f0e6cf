//! Airtable-backed [`RecordStore`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::RecordStore;
use super::model::{EmailJob, EmailStatus, JobFilter, JobUpdate};
use crate::config::AirtableConfig;
use crate::error::RemoteError;

const SERVICE: &str = "airtable";

/// One page of `GET /{base}/{table}`.
#[derive(Debug, Deserialize)]
struct RecordPage {
    records: Vec<RawRecord>,
    /// Cursor for the next page; absent on the last one.
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

pub struct AirtableStore {
    config: AirtableConfig,
    client: reqwest::Client,
}

impl AirtableStore {
    pub fn new(config: AirtableConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Http {
                service: SERVICE.into(),
                reason: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.base_id,
            self.config.table_id
        )
    }

    async fn fetch_page(&self, formula: &str, offset: Option<&str>) -> Result<RecordPage, RemoteError> {
        let mut query = vec![("filterByFormula", formula)];
        if let Some(token) = offset {
            query.push(("offset", token));
        }

        let resp = self
            .client
            .get(self.table_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .query(&query)
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

        resp.json()
            .await
            .map_err(|e| RemoteError::from_reqwest(SERVICE, e, self.config.request_timeout))
    }
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn list(&self, filter: &JobFilter) -> Result<Vec<EmailJob>, RemoteError> {
        let formula = filter.formula();
        let mut jobs = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let page = self.fetch_page(&formula, offset.as_deref()).await?;
            jobs.extend(page.records.into_iter().map(record_to_job));
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(filter = filter.label(), count = jobs.len(), "Listed email jobs");
        Ok(jobs)
    }

    async fn update(&self, record_id: &str, update: &JobUpdate) -> Result<(), RemoteError> {
        let body = json!({
            "records": [{ "id": record_id, "fields": update_fields(update) }],
            "typecast": true,
        });

        let resp = self
            .client
            .patch(self.table_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
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
        Ok(())
    }
}

/// Column values written for each update.
fn update_fields(update: &JobUpdate) -> Value {
    match update {
        JobUpdate::Metadata {
            automation_name,
            template_name,
        } => json!({
            "Automation Name": automation_name,
            "Template Name": template_name,
        }),
        JobUpdate::Tested { test_number } => json!({
            "Status": EmailStatus::UnderQaReview.label(),
            "Test Number": test_number,
        }),
        JobUpdate::Sent { at } => json!({
            "Status": EmailStatus::Sent.label(),
            "Sent At": at.to_rfc3339(),
        }),
        JobUpdate::Warning(tag) => json!({ "Warning": tag.label() }),
        JobUpdate::ClearWarning => json!({ "Warning": Value::Null }),
    }
}

fn record_to_job(record: RawRecord) -> EmailJob {
    let fields = &record.fields;
    EmailJob {
        email_id: text(fields, "Email ID"),
        automation_id: text(fields, "Automation ID"),
        template_id: text(fields, "Template ID"),
        schedule_date: timestamp(fields, "Schedule Date"),
        status: EmailStatus::from(text(fields, "Status")),
        subject: text(fields, "Subject"),
        test_number: fields
            .get("Test Number")
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64().map(|f| f.max(0.0) as u32),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(0),
        warning: text(fields, "Warning"),
        sent_at: timestamp(fields, "Sent At"),
        last_modified: timestamp(fields, "Email Last Modified"),
        metadata_populated_at: timestamp(fields, "Metadata Last Populated"),
        automation_name: optional_text(fields, "Automation Name"),
        template_name: optional_text(fields, "Template Name"),
        record_id: record.id,
    }
}

fn optional_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(fields: &Map<String, Value>, key: &str) -> String {
    optional_text(fields, key).unwrap_or_default()
}

/// RFC 3339 timestamps, or bare dates taken as midnight UTC.
fn timestamp(fields: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = optional_text(fields, key)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
