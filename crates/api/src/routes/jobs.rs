//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                -> start_job
/// GET    /{id}            -> get_status
/// POST   /{id}/stop       -> stop_job
/// GET    /{id}/result     -> get_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::start_job))
        .route("/{id}", get(jobs::get_status))
        .route("/{id}/stop", post(jobs::stop_job))
        .route("/{id}/result", get(jobs::get_result))
}
