//! Handlers for the `/jobs` resource: the four job operations.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reportbridge_core::job::PublicStatus;
use reportbridge_core::types::{JobId, UserIdentity};
use reportbridge_orchestrator::{JobSnapshot, JobTarget, StartRequest};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJob {
    pub script: String,
    pub server_uri: String,
    /// Target app id on the platform.
    pub app: String,
    pub user: UserIdentity,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub task_id: JobId,
    pub status: PublicStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultText {
    pub task_id: JobId,
    pub result: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Answer with the single snapshot for an id, the full list for `all`.
fn snapshots_response(target: JobTarget, snapshots: Vec<JobSnapshot>) -> AppResult<Response> {
    match target {
        JobTarget::All => Ok(Json(DataResponse { data: snapshots }).into_response()),
        JobTarget::One(id) => {
            let snapshot = snapshots
                .into_iter()
                .next()
                .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))?;
            Ok(Json(DataResponse { data: snapshot }).into_response())
        }
    }
}

fn parse_id(raw: &str) -> AppResult<JobId> {
    JobId::parse(raw).ok_or_else(|| AppError::BadRequest(format!("'{raw}' is not a job id")))
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Resolve and submit a script. Returns 201 with the new task id even when
/// the engine refused the job; the refusal is visible through its status.
pub async fn start_job(
    State(state): State<AppState>,
    Json(input): Json<StartJob>,
) -> AppResult<impl IntoResponse> {
    let request = StartRequest {
        script: input.script,
        server_uri: input.server_uri,
        app_id: input.app,
        user: input.user,
    };
    let id = state.orchestrator.start(request).await?;

    let status = state
        .orchestrator
        .pool()
        .get(id)
        .map(|record| record.public_status())
        .unwrap_or(PublicStatus::Error);

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: StartedJob {
                task_id: id,
                status,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// `{id}` may be `all`. Asking about a single job counts as client contact
/// for the idle timeout.
pub async fn get_status(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> AppResult<Response> {
    let target: JobTarget = target.parse()?;
    let snapshots = state.orchestrator.status(target)?;
    snapshots_response(target, snapshots)
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/stop
pub async fn stop_job(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> AppResult<Response> {
    let target: JobTarget = target.parse()?;
    let snapshots = state.orchestrator.stop(target).await?;
    tracing::info!(target = ?target, stopped = snapshots.len(), "Stop requested");
    snapshots_response(target, snapshots)
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/result
///
/// 404 while the job has no distribution result.
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let result = state
        .orchestrator
        .result(id)?
        .ok_or_else(|| AppError::NotFound(format!("Job {id} has no result yet")))?;

    Ok(Json(DataResponse {
        data: JobResultText { task_id: id, result },
    }))
}
