//! The per-job record held in the task pool.
//!
//! Immutable facts (id, session, specification, uploaded artifacts) sit
//! directly on [`JobRecord`]; everything that changes over the lifecycle is
//! behind one short-lived mutex that is never held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use reportbridge_core::error::JobFailure;
use reportbridge_core::job::{JobPhase, PublicStatus};
use reportbridge_core::results::JobResult;
use reportbridge_core::script::JobSpecification;
use reportbridge_core::types::{JobId, Timestamp};
use reportbridge_session::SessionLease;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct JobState {
    phase: JobPhase,
    last_client_contact: Option<Timestamp>,
    operation_id: Option<String>,
    results: Vec<JobResult>,
    result_summary: Option<String>,
    message: Option<String>,
    error: Option<JobFailure>,
}

/// One submitted report request, tracked end to end.
#[derive(Debug)]
pub struct JobRecord {
    id: JobId,
    created_at: Timestamp,
    session: SessionLease,
    spec: JobSpecification,
    uploaded_artifact_ids: Vec<String>,
    cancel: CancellationToken,
    /// Set while a watcher pass or a delivery task works on the job.
    busy: AtomicBool,
    cleanup_scheduled: AtomicBool,
    state: Mutex<JobState>,
}

/// Read-only view of a job for callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: PublicStatus,
    pub phase: JobPhase,
    pub created_at: Timestamp,
    pub last_client_contact: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub has_result: bool,
    pub uploaded_artifact_ids: Vec<String>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        session: SessionLease,
        spec: JobSpecification,
        uploaded_artifact_ids: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            session,
            spec,
            uploaded_artifact_ids,
            cancel,
            busy: AtomicBool::new(false),
            cleanup_scheduled: AtomicBool::new(false),
            state: Mutex::new(JobState {
                phase: JobPhase::JobSubmitted,
                last_client_contact: None,
                operation_id: None,
                results: Vec::new(),
                result_summary: None,
                message: None,
                error: None,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn session(&self) -> &SessionLease {
        &self.session
    }

    pub fn spec(&self) -> &JobSpecification {
        &self.spec
    }

    pub fn uploaded_artifact_ids(&self) -> &[String] {
        &self.uploaded_artifact_ids
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- lifecycle ----

    pub fn phase(&self) -> JobPhase {
        self.state().phase
    }

    pub fn public_status(&self) -> PublicStatus {
        self.phase().public_status()
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&self, next: JobPhase) -> bool {
        let mut state = self.state();
        let current = state.phase;
        if !current.can_transition_to(next) {
            tracing::debug!(job_id = %self.id, from = ?current, to = ?next, "Transition refused");
            return false;
        }
        if current != next {
            state.phase = next;
            tracing::debug!(job_id = %self.id, from = ?current, to = ?next, "Job phase changed");
        }
        true
    }

    /// Move to `Error` and record why.
    pub fn fail(&self, failure: JobFailure) -> bool {
        let mut state = self.state();
        if !state.phase.can_transition_to(JobPhase::Error) {
            tracing::debug!(job_id = %self.id, phase = ?state.phase, error = %failure, "Failure ignored");
            return false;
        }
        tracing::warn!(job_id = %self.id, from = ?state.phase, error = %failure, "Job failed");
        state.phase = JobPhase::Error;
        state.message = Some(failure.message.clone());
        state.error = Some(failure);
        true
    }

    /// Move from `StopRequested` to `Stopped`, recording the cause.
    pub fn finish_stop(&self, cause: JobFailure) -> bool {
        let mut state = self.state();
        if !state.phase.can_transition_to(JobPhase::Stopped) {
            return false;
        }
        state.phase = JobPhase::Stopped;
        state.message = Some(cause.message.clone());
        state.error = Some(cause);
        true
    }

    /// Whether a stop was requested, by a caller, an idle timeout or shutdown.
    pub fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
            || matches!(self.phase(), JobPhase::StopRequested | JobPhase::Stopped)
    }

    // ---- client contact ----

    /// Record that the client asked about this job now.
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    pub fn touch_at(&self, at: Timestamp) {
        self.state().last_client_contact = Some(at);
    }

    /// Time since the last client contact, `None` if the client never asked.
    pub fn idle_for(&self, now: Timestamp) -> Option<Duration> {
        let last = self.state().last_client_contact?;
        Some((now - last).to_std().unwrap_or(Duration::ZERO))
    }

    // ---- outputs ----

    pub fn set_operation_id(&self, operation_id: Option<String>) {
        self.state().operation_id = operation_id;
    }

    pub fn results(&self) -> Vec<JobResult> {
        self.state().results.clone()
    }

    pub fn set_results(&self, results: Vec<JobResult>) {
        self.state().results = results;
    }

    pub fn result_summary(&self) -> Option<String> {
        self.state().result_summary.clone()
    }

    pub fn set_result_summary(&self, summary: String) {
        self.state().result_summary = Some(summary);
    }

    pub fn message(&self) -> Option<String> {
        self.state().message.clone()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.state().message = Some(message.into());
    }

    pub fn error(&self) -> Option<JobFailure> {
        self.state().error.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        JobSnapshot {
            id: self.id,
            status: state.phase.public_status(),
            phase: state.phase,
            created_at: self.created_at,
            last_client_contact: state.last_client_contact,
            operation_id: state.operation_id.clone(),
            message: state.message.clone(),
            error: state.error.clone(),
            has_result: state.result_summary.is_some(),
            uploaded_artifact_ids: self.uploaded_artifact_ids.clone(),
        }
    }

    // ---- ownership ----

    /// Claim exclusive right to advance the job, `None` if someone holds it.
    pub fn try_claim(self: &Arc<Self>) -> Option<JobClaim> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobClaim {
                record: Arc::clone(self),
            })
    }

    pub fn is_claimed(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Mark cleanup as scheduled; `false` if it already was.
    pub fn mark_cleanup_scheduled(&self) -> bool {
        !self.cleanup_scheduled.swap(true, Ordering::AcqRel)
    }
}

/// Exclusive right to advance a job, released on drop.
#[derive(Debug)]
pub struct JobClaim {
    record: Arc<JobRecord>,
}

impl JobClaim {
    pub fn record(&self) -> &Arc<JobRecord> {
        &self.record
    }
}

impl Drop for JobClaim {
    fn drop(&mut self) {
        self.record.busy.store(false, Ordering::Release);
    }
}
