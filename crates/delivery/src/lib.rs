//! Distribution of rendered reports.
//!
//! The orchestrator hands downloaded results to a [`Distributor`] and keeps
//! the text it returns as the job's result. [`summary::format_summary`]
//! turns that text into what the `result` operation reports.

pub mod api;
pub mod summary;

use async_trait::async_trait;
use reportbridge_core::results::JobResult;
use reportbridge_core::types::JobId;
use tokio_util::sync::CancellationToken;

pub use api::DistributionApi;
pub use summary::{format_summary, DistributionEntry};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    /// The distribution service returned a non-2xx status code.
    #[error("Distribution service error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The job was stopped while the call was in flight.
    #[error("Distribution was cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Distributor
// ---------------------------------------------------------------------------

/// Delivers finished artifacts to their destinations.
#[async_trait]
pub trait Distributor: Send + Sync {
    /// Deliver `results` for `job_id`, returning the service's result text.
    ///
    /// Implementations must give up with [`DistributionError::Cancelled`]
    /// once `cancel` fires.
    async fn distribute(
        &self,
        job_id: JobId,
        results: &[JobResult],
        cancel: CancellationToken,
    ) -> Result<String, DistributionError>;
}
