//! Cron ticker that fires every pipeline on a schedule.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::pipeline::{Orchestrator, Pipeline, RunOutcome};

/// Parse a six-field (seconds-first) cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expr.trim()).map_err(|e| ConfigError::InvalidValue {
        key: "SYNC_SCHEDULE".into(),
        message: format!("'{expr}': {e}"),
    })
}

/// Start all four pipelines, each on its own task.
///
/// A pipeline that is still running from an earlier trigger returns `Busy`.
pub fn fire_all(orchestrator: &Arc<Orchestrator>) -> Vec<JoinHandle<RunOutcome>> {
    Pipeline::ALL
        .into_iter()
        .map(|pipeline| {
            let orchestrator = Arc::clone(orchestrator);
            tokio::spawn(async move { orchestrator.run(pipeline).await })
        })
        .collect()
}

/// Start all four pipelines and log each outcome once they finish.
pub fn fire_and_log(orchestrator: &Arc<Orchestrator>) -> JoinHandle<()> {
    let handles = fire_all(orchestrator);
    tokio::spawn(async move {
        let results = futures::future::join_all(handles).await;
        for (pipeline, result) in Pipeline::ALL.iter().zip(results) {
            match result {
                Ok(outcome) => debug!(pipeline = pipeline.name(), outcome = outcome.label(), "Triggered run done"),
                Err(e) => error!(pipeline = pipeline.name(), error = %e, "Pipeline task panicked"),
            }
        }
    })
}

/// Spawn the background ticker.
pub fn spawn_cron_ticker(orchestrator: Arc<Orchestrator>, schedule: Schedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(schedule = %schedule, "Sync ticker started");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Sync schedule has no upcoming ticks, ticker stopped");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            debug!(tick = %next, "Sync tick");
            fire_and_log(&orchestrator);
        }
    })
}
