//! Pipeline orchestrator: sequences store, automation, mail and notification
//! calls per email job.
//!
//! **At most one run per pipeline.** A trigger arriving while the same
//! pipeline runs gets [`RunOutcome::Busy`] and makes no remote calls.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::audience;
use super::latch::BusyLatch;
use super::subject::test_subject;
use super::{Pipeline, RunOutcome, RunReport};
use crate::automation::{AutomationSource, Field};
use crate::config::PipelineSettings;
use crate::error::SyncError;
use crate::mailer::{BatchOutcome, Mailer, Sender, build_batch};
use crate::notify::Notifications;
use crate::retry::RetryRunner;
use crate::store::{EmailJob, JobFilter, JobUpdate, RecordStore, WarningTag};

/// Collaborators shared by every pipeline.
pub struct OrchestratorDeps {
    pub store: Arc<dyn RecordStore>,
    pub source: Arc<dyn AutomationSource>,
    pub mailer: Arc<dyn Mailer>,
    pub sender: Sender,
    pub notifications: Notifications,
    pub retry: RetryRunner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendMode {
    Test,
    Live,
}

/// What happened to one job in a send pipeline.
enum Delivery {
    Sent(BatchOutcome),
    NoAudience,
}

#[derive(Default)]
struct Latches {
    metadata: BusyLatch,
    test: BusyLatch,
    live: BusyLatch,
    warnings: BusyLatch,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    settings: PipelineSettings,
    latches: Latches,
    /// Last time the warning tags were cleared by this process.
    warnings_cleared_at: Mutex<Option<Instant>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, settings: PipelineSettings) -> Self {
        Self {
            deps,
            settings,
            latches: Latches::default(),
            warnings_cleared_at: Mutex::new(None),
        }
    }

    pub fn is_running(&self, pipeline: Pipeline) -> bool {
        self.latch(pipeline).is_busy()
    }

    pub async fn refresh_metadata(&self) -> RunOutcome {
        self.run(Pipeline::MetadataRefresh).await
    }

    pub async fn send_tests(&self) -> RunOutcome {
        self.run(Pipeline::TestSend).await
    }

    pub async fn send_live(&self) -> RunOutcome {
        self.run(Pipeline::LiveSend).await
    }

    pub async fn sweep_warnings(&self) -> RunOutcome {
        self.run(Pipeline::WarningSweep).await
    }

    /// Run `pipeline` once, or return `Busy` if it is already running.
    pub async fn run(&self, pipeline: Pipeline) -> RunOutcome {
        let Some(_guard) = self.latch(pipeline).try_acquire() else {
            info!(pipeline = pipeline.name(), "Pipeline already running, trigger dropped");
            return RunOutcome::Busy;
        };

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", pipeline = pipeline.name(), run_id = %run_id);

        async move {
            info!("Pipeline run started");
            let report = RunReport::new(pipeline, run_id);
            let result = match pipeline {
                Pipeline::MetadataRefresh => self.refresh_all(report).await,
                Pipeline::TestSend => self.send_all(report, SendMode::Test).await,
                Pipeline::LiveSend => self.send_all(report, SendMode::Live).await,
                Pipeline::WarningSweep => self.sweep(report).await,
            };

            let outcome = match result {
                Ok(Some(report)) => RunOutcome::Completed(report),
                Ok(None) => RunOutcome::NothingToDo,
                Err(e) => {
                    error!(error = %e, "Pipeline run aborted");
                    self.deps
                        .notifications
                        .alert(&format!("{} aborted: `{e}`", pipeline.title()));
                    RunOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            match &outcome {
                RunOutcome::Completed(r) => info!(
                    candidates = r.candidates,
                    processed = r.processed,
                    skipped = r.skipped,
                    failed = r.failed,
                    "Pipeline run finished"
                ),
                other => info!(outcome = other.label(), "Pipeline run finished"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    fn latch(&self, pipeline: Pipeline) -> &BusyLatch {
        match pipeline {
            Pipeline::MetadataRefresh => &self.latches.metadata,
            Pipeline::TestSend => &self.latches.test,
            Pipeline::LiveSend => &self.latches.live,
            Pipeline::WarningSweep => &self.latches.warnings,
        }
    }

    async fn candidates(&self, filter: JobFilter, label: &str) -> Result<Vec<EmailJob>, SyncError> {
        let store = &self.deps.store;
        let jobs = self.deps.retry.run(label, || store.list(&filter)).await?;
        debug!(filter = filter.label(), count = jobs.len(), "Candidate jobs listed");
        Ok(jobs)
    }

    fn report_failure(&self, pipeline: Pipeline, job: &EmailJob, err: &SyncError) {
        error!(
            email_id = %job.email_id,
            record_id = %job.record_id,
            error = %err,
            "Failed to process email"
        );
        self.deps.notifications.alert(&format!(
            "{} failed for email '{}': `{err}`",
            pipeline.title(),
            job.email_id
        ));
    }

    // ── Metadata refresh ────────────────────────────────────────────────

    async fn refresh_all(&self, mut report: RunReport) -> Result<Option<RunReport>, SyncError> {
        let jobs = self
            .candidates(JobFilter::NeedsMetadata, "Checking for emails that need new metadata")
            .await?;
        if jobs.is_empty() {
            info!("No emails need metadata");
            return Ok(None);
        }

        report.candidates = jobs.len();
        for job in &jobs {
            match self.refresh_one(job).await {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    report.failed += 1;
                    self.report_failure(Pipeline::MetadataRefresh, job, &e);
                }
            }
        }
        Ok(Some(report))
    }

    async fn refresh_one(&self, job: &EmailJob) -> Result<(), SyncError> {
        let source = &self.deps.source;
        let retry = &self.deps.retry;

        let automation = retry
            .run("Getting automation details", || source.get_automation(&job.automation_id))
            .await?;
        let template = retry
            .run("Getting template details", || source.get_template(&job.template_id))
            .await?;

        let update = JobUpdate::Metadata {
            automation_name: automation.name,
            template_name: template.name,
        };
        let store = &self.deps.store;
        retry
            .run("Updating email metadata", || store.update(&job.record_id, &update))
            .await?;

        info!(email_id = %job.email_id, "Email metadata refreshed");
        Ok(())
    }

    // ── Test and live sends ─────────────────────────────────────────────

    async fn send_all(
        &self,
        mut report: RunReport,
        mode: SendMode,
    ) -> Result<Option<RunReport>, SyncError> {
        let (filter, label) = match mode {
            SendMode::Test => (JobFilter::ReadyToTest, "Checking for emails that need testing"),
            SendMode::Live => (JobFilter::DueToSend, "Checking for emails ready to send"),
        };
        let jobs = self.candidates(filter, label).await?;
        if jobs.is_empty() {
            info!("No emails to send");
            return Ok(None);
        }

        let fields = self.field_catalogue().await?;
        report.candidates = jobs.len();

        for job in &jobs {
            match self.deliver(job, mode, &fields).await {
                Ok(Delivery::Sent(outcome)) => {
                    report.processed += 1;
                    report.recipients_sent += outcome.succeeded.len();
                    report.recipients_failed += outcome.failed.len();
                }
                Ok(Delivery::NoAudience) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    self.report_failure(report.pipeline, job, &e);
                }
            }
        }
        Ok(Some(report))
    }

    /// Custom field definitions, fetched once per run.
    async fn field_catalogue(&self) -> Result<Vec<Field>, SyncError> {
        if !self.settings.resolve_custom_fields {
            return Ok(Vec::new());
        }
        let fields = self.deps.source.list_fields().await?;
        debug!(count = fields.len(), "Field catalogue loaded");
        Ok(fields)
    }

    async fn deliver(
        &self,
        job: &EmailJob,
        mode: SendMode,
        fields: &[Field],
    ) -> Result<Delivery, SyncError> {
        let now = Utc::now();
        let source = &self.deps.source;
        let retry = &self.deps.retry;

        let automation_id = match mode {
            SendMode::Test => self.settings.test_automation_id.as_str(),
            SendMode::Live => job.automation_id.as_str(),
        };

        let automation = retry
            .run("Getting automation details", || source.get_automation(automation_id))
            .await?;

        let recipients = audience::active_audience(source.as_ref(), automation_id).await?;
        if recipients.is_empty() {
            warn!(
                email_id = %job.email_id,
                automation = %automation.name,
                "No active contacts in automation, skipping"
            );
            self.deps.notifications.alert(&format!(
                "No active contacts found in automation '{}' for email '{}'. Skipping.",
                automation.name, job.email_id
            ));
            return Ok(Delivery::NoAudience);
        }

        let template = retry
            .run("Getting template details", || source.get_template(&job.template_id))
            .await?;
        let html = self.settings.render.render(&template);

        let variables = audience::resolve_variables(
            source.as_ref(),
            &recipients,
            fields,
            self.settings.variable_fetch_delay,
        )
        .await?;

        let (subject, update) = match mode {
            SendMode::Test => {
                let test_number = job.test_number + 1;
                let subject = test_subject(
                    &job.subject,
                    test_number,
                    job.schedule_date,
                    now,
                    self.settings.time_zone,
                );
                (subject, JobUpdate::Tested { test_number })
            }
            SendMode::Live => (job.subject.clone(), JobUpdate::Sent { at: now }),
        };

        let messages = build_batch(&self.deps.sender, &recipients, &subject, &html, &variables);
        let mailer = &self.deps.mailer;
        let results = retry
            .run("Sending email with Postmark", || mailer.send_batch(&messages))
            .await?;

        let outcome = BatchOutcome::partition(results);
        info!(
            email_id = %job.email_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Batch delivered"
        );
        if !outcome.failed.is_empty() {
            for rejected in &outcome.failed {
                warn!(
                    to = rejected.to.as_deref().unwrap_or_default(),
                    code = rejected.error_code,
                    message = %rejected.message,
                    "Recipient rejected"
                );
            }
            self.deps.notifications.alert(&format!(
                "Errors sending email '{}':\n{}",
                job.email_id,
                outcome.failure_summary()
            ));
        }

        let store = &self.deps.store;
        let update_label = match mode {
            SendMode::Test => "Updating email after test send",
            SendMode::Live => "Updating email after send",
        };
        retry
            .run(update_label, || store.update(&job.record_id, &update))
            .await?;

        if mode == SendMode::Live {
            self.deps
                .notifications
                .dispatch(send_summary(&job.email_id, &automation.name, &outcome));
        }
        Ok(Delivery::Sent(outcome))
    }

    // ── Warning sweep ───────────────────────────────────────────────────

    async fn sweep(&self, mut report: RunReport) -> Result<Option<RunReport>, SyncError> {
        if self.clear_due() {
            let cleared = self.clear_warnings(&mut report).await?;
            report.warnings_cleared = cleared;
        }

        let checks = [
            (
                JobFilter::OverdueReview,
                WarningTag::LateQa,
                "Checking for emails late for QA",
            ),
            (
                JobFilter::OverdueSend,
                WarningTag::LateSend,
                "Checking for emails late to send",
            ),
        ];

        for (filter, tag, label) in checks {
            let jobs = self.candidates(filter, label).await?;
            report.candidates += jobs.len();

            for job in &jobs {
                if job.has_warning(tag) {
                    debug!(email_id = %job.email_id, tag = tag.label(), "Already tagged");
                    report.skipped += 1;
                    continue;
                }
                match self.tag(job, tag).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        report.failed += 1;
                        self.report_failure(Pipeline::WarningSweep, job, &e);
                    }
                }
            }
        }

        if report.candidates == 0 && report.warnings_cleared == 0 {
            return Ok(None);
        }
        Ok(Some(report))
    }

    fn clear_due(&self) -> bool {
        let last = self
            .warnings_cleared_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            None => true,
            Some(at) => at.elapsed() >= self.settings.warning_clear_interval,
        }
    }

    fn mark_cleared(&self) {
        let mut last = self
            .warnings_cleared_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }

    async fn clear_warnings(&self, report: &mut RunReport) -> Result<usize, SyncError> {
        let jobs = self
            .candidates(JobFilter::Warned, "Checking for emails with warnings")
            .await?;

        let store = &self.deps.store;
        let update = JobUpdate::ClearWarning;
        let mut cleared = 0;
        for job in &jobs {
            match self
                .deps
                .retry
                .run("Clearing email warning", || store.update(&job.record_id, &update))
                .await
            {
                Ok(()) => cleared += 1,
                Err(e) => {
                    report.failed += 1;
                    self.report_failure(Pipeline::WarningSweep, job, &e);
                }
            }
        }

        self.mark_cleared();
        info!(cleared, "Warning tags cleared");
        Ok(cleared)
    }

    async fn tag(&self, job: &EmailJob, tag: WarningTag) -> Result<(), SyncError> {
        let store = &self.deps.store;
        let update = JobUpdate::Warning(tag);
        self.deps
            .retry
            .run("Tagging overdue email", || store.update(&job.record_id, &update))
            .await?;

        info!(email_id = %job.email_id, tag = tag.label(), "Overdue email tagged");
        self.deps
            .notifications
            .warning(&overdue_message(job, tag, self.settings.time_zone));
        Ok(())
    }
}

fn send_summary(email_id: &str, automation: &str, outcome: &BatchOutcome) -> String {
    let line = format!(
        "Email '{email_id}' successfully sent to {}/{} recipients in '{automation}'.",
        outcome.succeeded.len(),
        outcome.total()
    );
    if outcome.failed.is_empty() {
        line
    } else {
        format!("{line}\n{} sends had errors.", outcome.failed.len())
    }
}

fn overdue_message(job: &EmailJob, tag: WarningTag, tz: Tz) -> String {
    let scheduled = job
        .schedule_date
        .map(|at| local_time(at, tz))
        .unwrap_or_else(|| "unscheduled".to_string());
    let problem = match tag {
        WarningTag::LateQa => "is still waiting on QA review",
        WarningTag::LateSend => "has not been sent",
    };
    format!(
        "Email '{}' {problem}.\nSubject: {}\nSchedule Date: {scheduled}",
        job.email_id, job.subject
    )
}

fn local_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%-m-%-d %-I:%M%p").to_string()
}
