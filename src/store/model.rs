//! Email job records and the selections/updates the pipelines apply to them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How far ahead of "now" a schedule date still counts as due.
pub const DUE_LEEWAY_MINUTES: i64 = 1;

/// Lifecycle status of an email job, as labelled in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EmailStatus {
    Draft,
    NeedsTesting,
    UnderQaReview,
    ReadyToSend,
    Sent,
    /// Any label this service does not act on.
    Other(String),
}

impl EmailStatus {
    pub fn label(&self) -> &str {
        match self {
            EmailStatus::Draft => "Draft",
            EmailStatus::NeedsTesting => "Needs Testing",
            EmailStatus::UnderQaReview => "Under QA Review",
            EmailStatus::ReadyToSend => "Ready",
            EmailStatus::Sent => "Sent",
            EmailStatus::Other(label) => label,
        }
    }
}

impl From<String> for EmailStatus {
    fn from(label: String) -> Self {
        match label.as_str() {
            "Draft" => EmailStatus::Draft,
            "Needs Testing" => EmailStatus::NeedsTesting,
            "Under QA Review" => EmailStatus::UnderQaReview,
            "Ready" => EmailStatus::ReadyToSend,
            "Sent" => EmailStatus::Sent,
            _ => EmailStatus::Other(label),
        }
    }
}

impl From<EmailStatus> for String {
    fn from(status: EmailStatus) -> Self {
        status.label().to_string()
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Warning attached to an overdue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningTag {
    LateQa,
    LateSend,
}

impl WarningTag {
    pub fn label(&self) -> &'static str {
        match self {
            WarningTag::LateQa => "Late QA",
            WarningTag::LateSend => "Late Send",
        }
    }
}

impl fmt::Display for WarningTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One schedulable send tracked in the record store.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailJob {
    /// Record id in the store (used for updates).
    pub record_id: String,
    /// Human-facing identifier.
    pub email_id: String,
    pub automation_id: String,
    pub template_id: String,
    pub schedule_date: Option<DateTime<Utc>>,
    pub status: EmailStatus,
    pub subject: String,
    /// Number of test sends performed so far.
    pub test_number: u32,
    /// Free-text warning tag; empty when untagged.
    pub warning: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata_populated_at: Option<DateTime<Utc>>,
    pub automation_name: Option<String>,
    pub template_name: Option<String>,
}

impl EmailJob {
    pub fn has_warning(&self, tag: WarningTag) -> bool {
        self.warning.trim() == tag.label()
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule_date
            .is_some_and(|at| at <= now + Duration::minutes(DUE_LEEWAY_MINUTES))
    }
}

/// Candidate selections used by the pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFilter {
    /// Active jobs whose display metadata is missing or stale.
    NeedsMetadata,
    /// Jobs waiting for a test send.
    ReadyToTest,
    /// Approved jobs whose schedule date has arrived and that were not sent.
    DueToSend,
    /// Jobs still in QA review when their send time has arrived.
    OverdueReview,
    /// Approved jobs past their send time that are still unsent.
    OverdueSend,
    /// Jobs carrying any warning tag.
    Warned,
}

impl JobFilter {
    /// Airtable `filterByFormula` rendering of this selection.
    pub fn formula(&self) -> String {
        let due = format!(
            "{{Schedule Date}} <= DATEADD(NOW(), {}, 'minute')",
            DUE_LEEWAY_MINUTES
        );
        match self {
            JobFilter::NeedsMetadata => format!(
                "AND({{Status}} != '{}', {{Status}} != '{}', OR({{Metadata Last Populated}} = BLANK(), IS_AFTER({{Email Last Modified}}, {{Metadata Last Populated}})))",
                EmailStatus::Draft,
                EmailStatus::Sent
            ),
            JobFilter::ReadyToTest => format!("{{Status}} = '{}'", EmailStatus::NeedsTesting),
            JobFilter::DueToSend => format!(
                "AND({{Status}} = '{}', {due}, {{Sent At}} = '')",
                EmailStatus::ReadyToSend
            ),
            JobFilter::OverdueReview => format!(
                "AND({{Status}} = '{}', {due}, {{Warning}} != '{}')",
                EmailStatus::UnderQaReview,
                WarningTag::LateQa
            ),
            JobFilter::OverdueSend => format!(
                "AND({{Status}} = '{}', {due}, {{Sent At}} = '', {{Warning}} != '{}')",
                EmailStatus::ReadyToSend,
                WarningTag::LateSend
            ),
            JobFilter::Warned => "{Warning} != ''".to_string(),
        }
    }

    /// In-memory evaluation of the same selection as [`formula`](Self::formula).
    pub fn matches(&self, job: &EmailJob, now: DateTime<Utc>) -> bool {
        match self {
            JobFilter::NeedsMetadata => {
                !matches!(job.status, EmailStatus::Draft | EmailStatus::Sent)
                    && match (job.metadata_populated_at, job.last_modified) {
                        (None, _) => true,
                        (Some(populated), Some(modified)) => modified > populated,
                        (Some(_), None) => false,
                    }
            }
            JobFilter::ReadyToTest => job.status == EmailStatus::NeedsTesting,
            JobFilter::DueToSend => {
                job.status == EmailStatus::ReadyToSend && job.is_due(now) && job.sent_at.is_none()
            }
            JobFilter::OverdueReview => {
                job.status == EmailStatus::UnderQaReview
                    && job.is_due(now)
                    && !job.has_warning(WarningTag::LateQa)
            }
            JobFilter::OverdueSend => {
                job.status == EmailStatus::ReadyToSend
                    && job.is_due(now)
                    && job.sent_at.is_none()
                    && !job.has_warning(WarningTag::LateSend)
            }
            JobFilter::Warned => !job.warning.trim().is_empty(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobFilter::NeedsMetadata => "needs-metadata",
            JobFilter::ReadyToTest => "ready-to-test",
            JobFilter::DueToSend => "due-to-send",
            JobFilter::OverdueReview => "overdue-review",
            JobFilter::OverdueSend => "overdue-send",
            JobFilter::Warned => "warned",
        }
    }
}

/// The writes the pipelines perform on a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Resolved display names; no status change.
    Metadata {
        automation_name: String,
        template_name: String,
    },
    /// Test send done: status moves to QA review with the new counter.
    Tested { test_number: u32 },
    /// Live send done.
    Sent { at: DateTime<Utc> },
    Warning(WarningTag),
    ClearWarning,
}

impl JobUpdate {
    /// Apply this update to an in-memory copy of the job.
    pub fn apply(&self, job: &mut EmailJob, now: DateTime<Utc>) {
        match self {
            JobUpdate::Metadata {
                automation_name,
                template_name,
            } => {
                job.automation_name = Some(automation_name.clone());
                job.template_name = Some(template_name.clone());
                job.metadata_populated_at = Some(now);
            }
            JobUpdate::Tested { test_number } => {
                job.status = EmailStatus::UnderQaReview;
                job.test_number = *test_number;
            }
            JobUpdate::Sent { at } => {
                job.status = EmailStatus::Sent;
                job.sent_at = Some(*at);
            }
            JobUpdate::Warning(tag) => job.warning = tag.label().to_string(),
            JobUpdate::ClearWarning => job.warning.clear(),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_job(record_id: &str, status: EmailStatus) -> EmailJob {
    EmailJob {
        record_id: record_id.to_string(),
        email_id: format!("email-{record_id}"),
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
