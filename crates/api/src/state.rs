use std::sync::Arc;

use reportbridge_orchestrator::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job orchestration engine serving the four operations.
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<ServerConfig>,
}
