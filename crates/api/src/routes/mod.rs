pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                     start (POST)
/// /jobs/{id}                status, `{id}` may be `all` (GET)
/// /jobs/{id}/stop           stop, `{id}` may be `all` (POST)
/// /jobs/{id}/result         formatted distribution result (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
