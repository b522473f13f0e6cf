//! HTTP trigger endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::{Orchestrator, Pipeline, RunOutcome};
use crate::scheduler;

/// Build the router: one route per pipeline, plus `/ping` and `/health`.
pub fn sync_routes(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/updateMetadata", get(update_metadata))
        .route("/testEmails", get(test_emails))
        .route("/sendEmails", get(send_emails))
        .route("/sendWarnings", get(send_warnings))
        .route("/ping", get(ping))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "campaign-sync"
    }))
}

// ── Pipeline triggers ───────────────────────────────────────────────────

async fn update_metadata(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    outcome_response(orchestrator.run(Pipeline::MetadataRefresh).await)
}

async fn test_emails(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    outcome_response(orchestrator.run(Pipeline::TestSend).await)
}

async fn send_emails(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    outcome_response(orchestrator.run(Pipeline::LiveSend).await)
}

async fn send_warnings(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    outcome_response(orchestrator.run(Pipeline::WarningSweep).await)
}

/// Fire every pipeline in the background and answer at once.
async fn ping(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    info!("Ping received, starting all pipelines");
    scheduler::fire_and_log(&orchestrator);
    Json(serde_json::json!({ "status": "started" }))
}

/// `Completed` → 200 with the report, `NothingToDo` → 204, `Busy` → 429,
/// `Failed` → 502.
pub fn outcome_response(outcome: RunOutcome) -> Response {
    match outcome {
        RunOutcome::Completed(report) => (StatusCode::OK, Json(report)).into_response(),
        RunOutcome::NothingToDo => StatusCode::NO_CONTENT.into_response(),
        RunOutcome::Busy => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "status": "busy" })),
        )
            .into_response(),
        RunOutcome::Failed { reason } => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "status": "failed", "reason": reason })),
        )
            .into_response(),
    }
}
