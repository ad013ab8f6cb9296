//! Internal HTTP surface: event ingest, manual runs, health.
//!
//! Events reaching `/events` are already verified by the edge that
//! received them from the chat platform.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tidewater_core::{ExecutionId, WorkflowId};
use tidewater_scheduler::{Dispatcher, InboundEvent};
use tidewater_workflow::{RunOutcome, StartOptions};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Builds the router.
pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ingest_event))
        .route("/workflows/{id}/run", post(run_workflow))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn health() -> &'static str {
    "ok"
}

/// Accepts an event and dispatches it on its own task.
async fn ingest_event(
    State(dispatcher): State<Dispatcher>,
    Json(event): Json<InboundEvent>,
) -> StatusCode {
    tokio::spawn(async move {
        match dispatcher.dispatch(&event).await {
            Ok(report) => info!(
                event = event.kind(),
                matched = report.matched,
                fired = report.fired,
                failed = report.failed,
                "dispatched event"
            ),
            Err(e) => warn!(event = event.kind(), error = %e, "failed to dispatch event"),
        }
    });
    StatusCode::ACCEPTED
}

/// Body of a manual run request.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub user_id: String,
    #[serde(default)]
    pub interaction_id: Option<String>,
}

/// Response to a manual run request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub execution_id: ExecutionId,
    pub outcome: String,
}

fn describe(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Suspended { step_index } => format!("suspended at step {step_index}"),
        RunOutcome::Completed => "completed".to_string(),
        RunOutcome::Cancelled => "cancelled".to_string(),
        RunOutcome::Superseded => "superseded".to_string(),
    }
}

/// Starts a run of a workflow on behalf of a user.
async fn run_workflow(
    State(dispatcher): State<Dispatcher>,
    Path(id): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let workflow_id = WorkflowId::from_str(&id).map_err(|_| ApiError::InvalidId)?;
    let engine = dispatcher.engine();
    let workflow = engine
        .workflow(workflow_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    if !workflow.is_installed() {
        return Err(ApiError::NotInstalled);
    }

    let options = StartOptions::default().with_interaction(request.interaction_id);
    let started = engine
        .start_execution(&workflow, &request.user_id, options)
        .await
        .map_err(|e| ApiError::RunFailed(e.to_string()))?;

    Ok(Json(RunResponse {
        execution_id: started.execution.id,
        outcome: describe(started.outcome),
    }))
}

/// Errors returned by the HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    InvalidId,
    NotFound,
    NotInstalled,
    RunFailed(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidId => (StatusCode::BAD_REQUEST, "Invalid workflow id"),
            Self::NotFound => (StatusCode::NOT_FOUND, "Workflow not found"),
            Self::NotInstalled => (StatusCode::CONFLICT, "Workflow is not installed"),
            Self::RunFailed(msg) => {
                warn!("Run failed: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "Run failed")
            }
            Self::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}
