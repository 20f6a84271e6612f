//! Rendering-engine integration.
//!
//! The orchestrator talks to the engine only through the
//! [`RenderingEngine`] trait; [`EngineApi`] is the HTTP implementation.

pub mod api;

use async_trait::async_trait;
use reportbridge_core::results::JobResult;
use reportbridge_core::script::JobSpecification;
use reportbridge_core::types::JobId;
use serde::{Deserialize, Serialize};

pub use api::EngineApi;

/// Errors from the rendering engine client.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    /// The engine returned a non-2xx status code.
    #[error("Rendering engine error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The engine answered but refused the job.
    #[error("Rendering engine rejected the job: {0}")]
    Rejected(String),

    #[error("Invalid rendering engine URL: {0}")]
    InvalidUrl(String),
}

/// Answer to a job submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubmitResponse {
    /// Turn a refused submission into an error.
    pub fn into_result(self) -> Result<Option<String>, EngineError> {
        if self.success {
            Ok(self.operation_id)
        } else {
            Err(EngineError::Rejected(
                self.error
                    .unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}

/// Operations the orchestrator needs from the rendering engine.
#[async_trait]
pub trait RenderingEngine: Send + Sync {
    /// Submit a resolved specification under `job_id`.
    async fn submit(&self, job_id: JobId, spec: &JobSpecification)
        -> Result<SubmitResponse, EngineError>;

    /// Current per-task results; empty while the engine has nothing yet.
    async fn poll_results(&self, job_id: JobId) -> Result<Vec<JobResult>, EngineError>;

    /// Fetch a produced file by name, `None` when it does not exist.
    async fn download_artifact(&self, job_id: JobId, name: &str)
        -> Result<Option<Vec<u8>>, EngineError>;

    /// Ask the engine to abort the job.
    async fn stop(&self, job_id: JobId) -> Result<bool, EngineError>;

    /// Delete a job working directory or an uploaded-artifact directory.
    async fn delete_working_dir(&self, id: &str) -> Result<bool, EngineError>;

    /// Upload a template file, returning the engine's artifact id.
    async fn upload_artifact(&self, filename: &str, data: Vec<u8>) -> Result<String, EngineError>;
}
