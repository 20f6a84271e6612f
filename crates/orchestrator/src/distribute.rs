//! Delivery of finished jobs: artifact download followed by distribution.
//!
//! Runs as a tracked background task holding the job's [`JobClaim`], so the
//! watcher leaves the job alone until delivery settles.

use std::sync::Arc;

use reportbridge_core::error::{JobErrorKind, JobFailure};
use reportbridge_core::job::JobPhase;
use reportbridge_core::results::{JobResult, ReportArtifact};
use reportbridge_core::types::JobId;
use reportbridge_delivery::DistributionError;
use tokio_util::sync::CancellationToken;

use crate::handlers::{Orchestrator, CANCELED_BY_USER};
use crate::record::{JobClaim, JobRecord};

const SHUTTING_DOWN: &str = "service shutting down";

impl Orchestrator {
    /// Hand a job that finished rendering to a delivery task.
    pub(crate) fn spawn_delivery(self: &Arc<Self>, claim: JobClaim) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move { this.deliver(claim).await });
    }

    async fn deliver(self: Arc<Self>, claim: JobClaim) {
        let record = Arc::clone(claim.record());
        let id = record.id();
        let cancel = record.cancel_token().clone();

        let mut results = record.results();
        let downloaded = self.download_artifacts(id, &mut results, &cancel).await;
        tracing::info!(job_id = %id, artifacts = downloaded, "Downloaded report artifacts");

        if record.stop_requested() {
            self.note_stopped(&record);
            self.sessions.release(record.session()).await;
        } else {
            record.set_results(results.clone());
            self.distribute(&record, results, cancel).await;
        }

        drop(claim);
        if record.phase().is_terminal() {
            self.schedule_cleanup(&record);
        }
    }

    async fn distribute(&self, record: &JobRecord, results: Vec<JobResult>, cancel: CancellationToken) {
        let id = record.id();
        if !record.transition(JobPhase::Distributing) {
            return;
        }

        let outcome = self.distributor.distribute(id, &results, cancel).await;
        self.sessions.release(record.session()).await;

        if record.stop_requested() {
            self.note_stopped(record);
            return;
        }
        match outcome {
            Ok(summary) => {
                record.set_result_summary(summary);
                if record.transition(JobPhase::Distributed) {
                    tracing::info!(job_id = %id, "Job distributed");
                }
            }
            Err(DistributionError::Cancelled) => self.note_stopped(record),
            Err(e) => {
                record.fail(JobFailure::from_error(JobErrorKind::Distribution, e));
            }
        }
    }

    /// Fetch the files of every task that produced artifacts.
    ///
    /// Missing or failing files are skipped; returns how many were fetched.
    async fn download_artifacts(
        &self,
        id: JobId,
        results: &mut [JobResult],
        cancel: &CancellationToken,
    ) -> usize {
        let mut downloaded = 0;
        for result in results.iter_mut().filter(|r| r.status.has_artifacts()) {
            for report in &mut result.reports {
                for path in &report.paths {
                    if cancel.is_cancelled() {
                        return downloaded;
                    }
                    // The engine serves produced files by name from the job's
                    // working directory, not by the path it reported.
                    let name = artifact_name(path);
                    match self.engine.download_artifact(id, name).await {
                        Ok(Some(data)) => {
                            report.artifacts.push(ReportArtifact {
                                name: name.to_string(),
                                data,
                            });
                            downloaded += 1;
                        }
                        Ok(None) => {
                            tracing::warn!(job_id = %id, path = %path, "Artifact not found on rendering engine");
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %id, path = %path, error = %e, "Failed to download artifact");
                        }
                    }
                }
            }
        }
        downloaded
    }

    /// Explain an interrupted delivery unless the stop already did.
    fn note_stopped(&self, record: &JobRecord) {
        if record.message().is_some() {
            return;
        }
        record.set_message(if self.is_shutting_down() {
            SHUTTING_DOWN
        } else {
            CANCELED_BY_USER
        });
    }
}

/// File name of an engine path, which may use either separator.
fn artifact_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
