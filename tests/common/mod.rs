//! Shared in-memory collaborators for the pipeline and route tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use campaign_sync::automation::{
    Automation, AutomationSource, Contact, ContactRun, Field, FieldValue, Template,
};
use campaign_sync::config::PipelineSettings;
use campaign_sync::error::{NotifyError, RemoteError, SyncError};
use campaign_sync::mailer::{Mailer, OutboundMessage, SendResult, Sender};
use campaign_sync::notify::{Notifications, Notifier};
use campaign_sync::pipeline::{Orchestrator, OrchestratorDeps};
use campaign_sync::retry::{RetryPolicy, RetryRunner};
use campaign_sync::store::{EmailJob, EmailStatus, JobFilter, JobUpdate, RecordStore};

pub const TEST_AUTOMATION: &str = "900";

pub fn job(record_id: &str, status: EmailStatus) -> EmailJob {
    EmailJob {
        record_id: record_id.to_string(),
        email_id: format!("EM-{record_id}"),
        automation_id: "42".to_string(),
        template_id: "7".to_string(),
        schedule_date: None,
        status,
        subject: "Weekly digest".to_string(),
        test_number: 0,
        warning: String::new(),
        sent_at: None,
        last_modified: None,
        metadata_populated_at: None,
        automation_name: None,
        template_name: None,
    }
}

pub fn contact(id: &str) -> Contact {
    Contact {
        id: id.to_string(),
        email: format!("c{id}@example.com"),
        first_name: format!("First{id}"),
        last_name: String::new(),
        phone: String::new(),
    }
}

pub fn run(contact: &str, automation: &str, completed: bool) -> ContactRun {
    ContactRun {
        contact: contact.to_string(),
        seriesid: automation.to_string(),
        completed,
    }
}

fn not_found(what: &str) -> RemoteError {
    RemoteError::Status {
        service: "fake".into(),
        status: 404,
        body: format!("{what} not found"),
    }
}

// ── Record store ────────────────────────────────────────────────────────

/// Pauses the first `list` call until released.
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<Vec<EmailJob>>,
    failing_records: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub updates: Mutex<Vec<(String, JobUpdate)>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl MemoryStore {
    pub fn with_jobs(jobs: Vec<EmailJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        }
    }

    pub fn job(&self, record_id: &str) -> EmailJob {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.record_id == record_id)
            .cloned()
            .unwrap()
    }

    pub fn fail_updates_for(&self, record_id: &str) {
        self.failing_records.lock().unwrap().insert(record_id.to_string());
    }

    pub fn gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, filter: &JobFilter) -> Result<Vec<EmailJob>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let now = Utc::now();
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| filter.matches(j, now))
            .cloned()
            .collect())
    }

    async fn update(&self, record_id: &str, update: &JobUpdate) -> Result<(), RemoteError> {
        if self.failing_records.lock().unwrap().contains(record_id) {
            return Err(RemoteError::Status {
                service: "fake-store".into(),
                status: 500,
                body: "write rejected".into(),
            });
        }

        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.record_id == record_id)
            .ok_or_else(|| not_found(record_id))?;
        update.apply(job, now);
        self.updates
            .lock()
            .unwrap()
            .push((record_id.to_string(), update.clone()));
        Ok(())
    }
}

// ── Automation source ───────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    pub automations: HashMap<String, String>,
    pub templates: HashMap<String, Template>,
    pub audiences: HashMap<String, (Vec<Contact>, Vec<ContactRun>)>,
    pub fields: Vec<Field>,
    pub field_values: HashMap<String, Vec<FieldValue>>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn automation(mut self, id: &str, name: &str) -> Self {
        self.automations.insert(id.to_string(), name.to_string());
        self
    }

    pub fn template(mut self, id: &str, name: &str, preview: &str) -> Self {
        self.templates.insert(
            id.to_string(),
            Template {
                id: id.to_string(),
                name: name.to_string(),
                subject: None,
                content: String::new(),
                preview_content: preview.to_string(),
            },
        );
        self
    }

    pub fn audience(mut self, automation: &str, contacts: Vec<Contact>, runs: Vec<ContactRun>) -> Self {
        self.audiences.insert(automation.to_string(), (contacts, runs));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationSource for FakeSource {
    async fn get_automation(&self, automation_id: &str) -> Result<Automation, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = self
            .automations
            .get(automation_id)
            .ok_or_else(|| not_found(automation_id))?;
        Ok(Automation {
            id: automation_id.to_string(),
            name: name.clone(),
            status: None,
        })
    }

    async fn get_template(&self, template_id: &str) -> Result<Template, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| not_found(template_id))
    }

    async fn list_audience(&self, automation_id: &str) -> Result<Vec<Contact>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .audiences
            .get(automation_id)
            .map(|(contacts, _)| contacts.clone())
            .unwrap_or_default())
    }

    async fn list_runs(&self, automation_id: &str) -> Result<Vec<ContactRun>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .audiences
            .get(automation_id)
            .map(|(_, runs)| runs.clone())
            .unwrap_or_default())
    }

    async fn list_fields(&self) -> Result<Vec<Field>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fields.clone())
    }

    async fn list_field_values(&self, contact_id: &str) -> Result<Vec<FieldValue>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.field_values.get(contact_id).cloned().unwrap_or_default())
    }
}

// ── Mailer ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingMailer {
    pub batches: Mutex<Vec<Vec<OutboundMessage>>>,
    /// Recipients answered with code 406.
    pub inactive: HashSet<String>,
}

impl RecordingMailer {
    pub fn rejecting(emails: &[&str]) -> Self {
        Self {
            inactive: emails.iter().map(|e| e.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn last_batch(&self) -> Vec<OutboundMessage> {
        self.batches.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<Vec<SendResult>, RemoteError> {
        self.batches.lock().unwrap().push(messages.to_vec());
        Ok(messages
            .iter()
            .map(|m| {
                let rejected = self.inactive.contains(&m.to);
                SendResult {
                    error_code: if rejected { 406 } else { 0 },
                    message: if rejected { "Inactive recipient".into() } else { "OK".into() },
                    message_id: None,
                    to: Some(m.to.clone()),
                }
            })
            .collect())
    }
}

// ── Notifier ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(needle)).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Let spawned notification tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ── Wiring ──────────────────────────────────────────────────────────────

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeSource>,
    pub mailer: Arc<RecordingMailer>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        test_automation_id: TEST_AUTOMATION.to_string(),
        resolve_custom_fields: false,
        variable_fetch_delay: Duration::ZERO,
        ..PipelineSettings::default()
    }
}

pub fn harness(store: MemoryStore, source: FakeSource, mailer: RecordingMailer) -> Harness {
    harness_with(store, source, mailer, settings())
}

pub fn harness_with(
    store: MemoryStore,
    source: FakeSource,
    mailer: RecordingMailer,
    settings: PipelineSettings,
) -> Harness {
    let store = Arc::new(store);
    let source = Arc::new(source);
    let mailer = Arc::new(mailer);
    let notifier = Arc::new(RecordingNotifier::default());

    let notifications = Notifications::new(notifier.clone(), Some("@ops".into()));
    let policy = RetryPolicy::new(vec![Duration::from_millis(1)], true).unwrap();
    let retry = RetryRunner::new(policy, notifications.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            store: store.clone(),
            source: source.clone(),
            mailer: mailer.clone(),
            sender: Sender {
                from: "news@example.com".into(),
                message_stream: "outbound".into(),
            },
            notifications,
            retry,
        },
        settings,
    ));

    Harness {
        store,
        source,
        mailer,
        notifier,
        orchestrator,
    }
}

pub fn scheduled(mut job: EmailJob, at: DateTime<Utc>) -> EmailJob {
    job.schedule_date = Some(at);
    job
}
