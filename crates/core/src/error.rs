use std::fmt;

use serde::Serialize;

/// Category of a failure captured on a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Session or credential issuance failed.
    Auth,
    /// The user script was malformed or could not be resolved.
    Script,
    /// The rendering engine rejected or failed the job.
    Engine,
    /// Delivering the rendered artifacts failed.
    Distribution,
    /// The job was stopped because the client stopped polling.
    Timeout,
    /// The job was stopped on request.
    Cancelled,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::Script => "script",
            Self::Engine => "engine",
            Self::Distribution => "distribution",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A failure recorded on a job, with the full cause chain flattened into
/// one human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct JobFailure {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Capture `err` and every error in its `source()` chain.
    pub fn from_error<E>(kind: JobErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(kind, flatten_error(err))
    }
}

/// Render an error and its sources as `outer: inner: root`.
pub fn flatten_error<E>(err: E) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{:#}", anyhow::Error::new(err))
}
