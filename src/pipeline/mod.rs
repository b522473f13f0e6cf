//! The four sync pipelines.
//!
//! Every trigger (HTTP route, cron tick, `/ping`) goes through
//! [`Orchestrator::run`]:
//! 1. Take the pipeline's [`BusyLatch`](latch::BusyLatch); a held latch means `Busy`
//! 2. List candidate jobs from the record store
//! 3. Process each job in order, isolating per-job failures
//! 4. Report a [`RunOutcome`]

pub mod audience;
pub mod latch;
pub mod orchestrator;
pub mod render;
pub mod subject;

use serde::Serialize;

pub use self::orchestrator::{Orchestrator, OrchestratorDeps};

/// The fixed set of pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    MetadataRefresh,
    TestSend,
    LiveSend,
    WarningSweep,
}

impl Pipeline {
    pub const ALL: [Pipeline; 4] = [
        Pipeline::MetadataRefresh,
        Pipeline::TestSend,
        Pipeline::LiveSend,
        Pipeline::WarningSweep,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::MetadataRefresh => "metadata_refresh",
            Pipeline::TestSend => "test_send",
            Pipeline::LiveSend => "live_send",
            Pipeline::WarningSweep => "warning_sweep",
        }
    }

    /// Wording used in operator alerts.
    pub fn title(&self) -> &'static str {
        match self {
            Pipeline::MetadataRefresh => "Metadata refresh",
            Pipeline::TestSend => "Test send",
            Pipeline::LiveSend => "Live send",
            Pipeline::WarningSweep => "Warning sweep",
        }
    }
}

/// Counters for one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pipeline: Pipeline,
    pub run_id: String,
    /// Jobs returned by the candidate listings.
    pub candidates: usize,
    /// Jobs fully processed (metadata written, batch sent, or tag applied).
    pub processed: usize,
    /// Jobs passed over without a write (no audience, already tagged).
    pub skipped: usize,
    /// Jobs whose processing failed.
    pub failed: usize,
    pub recipients_sent: usize,
    pub recipients_failed: usize,
    /// Warning tags removed by the periodic clear.
    pub warnings_cleared: usize,
}

impl RunReport {
    pub(crate) fn new(pipeline: Pipeline, run_id: String) -> Self {
        Self {
            pipeline,
            run_id,
            candidates: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            recipients_sent: 0,
            recipients_failed: 0,
            warnings_cleared: 0,
        }
    }
}

/// Result of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// No candidate jobs.
    NothingToDo,
    /// Another run of the same pipeline holds the latch.
    Busy,
    /// A candidate listing could not be completed; nothing was processed
    /// past that point.
    Failed { reason: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::NothingToDo => "nothing_to_do",
            RunOutcome::Busy => "busy",
            RunOutcome::Failed { .. } => "failed",
        }
    }
}
