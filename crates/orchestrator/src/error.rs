use reportbridge_core::error::JobErrorKind;
use reportbridge_core::script::ScriptError;
use reportbridge_engine::EngineError;
use reportbridge_session::SessionError;

/// Errors returned to callers of the operation handlers.
///
/// Failures that happen after a job exists are captured on the job record
/// instead and surface through its status.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Invalid job reference '{0}'")]
    InvalidTarget(String),

    #[error("Could not obtain a platform session")]
    Auth(#[from] SessionError),

    #[error("Could not resolve the job script")]
    Script(#[from] ScriptError),

    #[error("The orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// Taxonomy category, for failures that have one.
    pub fn kind(&self) -> Option<JobErrorKind> {
        match self {
            Self::Auth(_) => Some(JobErrorKind::Auth),
            Self::Script(_) => Some(JobErrorKind::Script),
            Self::NotFound(_) | Self::InvalidTarget(_) | Self::ShuttingDown => None,
        }
    }
}

/// Failures of the watcher loop.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Every poll of a pass failed; the engine is most likely unreachable.
    #[error("Rendering engine unavailable, {failed} polls failed")]
    EngineUnavailable {
        failed: usize,
        #[source]
        source: EngineError,
    },

    #[error("Watcher pass panicked: {0}")]
    Panicked(String),

    /// The restart budget is spent; the watcher has stopped.
    #[error("Watcher stopped after {restarts} consecutive failed passes")]
    RetriesExhausted {
        restarts: u32,
        #[source]
        last: Box<WatcherError>,
    },
}
