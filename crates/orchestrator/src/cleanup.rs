//! Delayed retirement of terminal jobs.

use std::sync::Arc;

use reportbridge_core::job::JobPhase;

use crate::handlers::Orchestrator;
use crate::record::JobRecord;

impl Orchestrator {
    /// Retire `record` after the cleanup delay, or right away at shutdown.
    ///
    /// Scheduling twice is a no-op.
    pub(crate) fn schedule_cleanup(self: &Arc<Self>, record: &Arc<JobRecord>) {
        if !record.mark_cleanup_scheduled() {
            return;
        }
        tracing::debug!(
            job_id = %record.id(),
            delay_secs = self.config.cleanup_delay.as_secs(),
            "Cleanup scheduled",
        );

        let this = Arc::clone(self);
        let record = Arc::clone(record);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(this.config.cleanup_delay) => {}
                _ = this.shutdown.cancelled() => {}
            }
            this.retire(&record).await;
        });
    }

    /// Drop the job from the pool and release everything it holds.
    async fn retire(&self, record: &JobRecord) {
        let id = record.id();
        let final_phase = record.phase();

        self.pool.remove(id);
        record.transition(JobPhase::Cleanup);
        self.sessions.release(record.session()).await;

        match self.engine.delete_working_dir(&id.to_string()).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(job_id = %id, "No working directory to delete"),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to delete working directory"),
        }

        for artifact_id in record.uploaded_artifact_ids() {
            if let Err(e) = self.engine.delete_working_dir(artifact_id).await {
                tracing::warn!(job_id = %id, artifact_id = %artifact_id, error = %e, "Failed to delete uploaded template");
            }
        }

        tracing::info!(job_id = %id, phase = ?final_phase, "Job retired");
    }
}
