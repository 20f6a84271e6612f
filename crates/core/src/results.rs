//! Rendering-engine result types and their interpretation.
//!
//! The engine reports one [`JobResult`] per task of the submitted
//! specification. [`classify`] folds a poll response into the single
//! [`EngineOutcome`] the watcher acts on.

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Status the engine reports for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineStatus {
    Success,
    Warning,
    Error,
    /// Abort is pending on the engine side; the task has not settled yet.
    Abort,
    Inactive,
    Running,
}

impl EngineStatus {
    /// Whether the task produced artifacts worth downloading.
    pub fn has_artifacts(self) -> bool {
        matches!(self, Self::Success | Self::Warning)
    }
}

/// A file produced by the engine, held in memory until distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub name: String,
    #[serde(serialize_with = "encode_base64", deserialize_with = "decode_base64")]
    pub data: Vec<u8>,
}

/// One rendered report inside a task result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResult {
    #[serde(default)]
    pub name: Option<String>,
    /// Engine-side paths of the produced files.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Downloaded file contents, filled in by the orchestrator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ReportArtifact>,
}

/// Result of one task as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub status: EngineStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reports: Vec<ReportResult>,
}

/// What a poll response means for the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The engine has not produced any result yet.
    Pending,
    /// At least one task is still running (or settling an abort).
    InProgress,
    /// Every task settled and at least one produced artifacts.
    Completed,
    /// The engine failed the job; carries an explanatory message.
    Failed(String),
}

/// Fold the engine's per-task results into one outcome.
///
/// Precedence: running/aborting tasks keep the job in progress, any error
/// fails it, any success or warning completes it. Results that settled
/// without a single successful task (all inactive) fail with a
/// synthesized message instead of completing silently.
pub fn classify(results: &[JobResult]) -> EngineOutcome {
    if results.is_empty() {
        return EngineOutcome::Pending;
    }

    if results
        .iter()
        .any(|r| matches!(r.status, EngineStatus::Running | EngineStatus::Abort))
    {
        return EngineOutcome::InProgress;
    }

    if let Some(failed) = results.iter().find(|r| r.status == EngineStatus::Error) {
        let message = failed
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "the rendering engine reported an error".to_string());
        return EngineOutcome::Failed(message);
    }

    if results.iter().any(|r| r.status.has_artifacts()) {
        return EngineOutcome::Completed;
    }

    let inactive = results
        .iter()
        .filter(|r| r.status == EngineStatus::Inactive)
        .count();
    EngineOutcome::Failed(format!(
        "the rendering engine finished without a successful report ({inactive} of {} tasks inactive)",
        results.len()
    ))
}

fn encode_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64_STANDARD.encode(data))
}

fn decode_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
