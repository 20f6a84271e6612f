//! The four operation handlers: start, status, stop and result.
//!
//! Handlers only create records or read and mutate fields on existing ones;
//! the lifecycle itself is driven by the [`Watcher`](crate::watcher::Watcher)
//! and the background tasks it spawns.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reportbridge_core::error::{JobErrorKind, JobFailure};
use reportbridge_core::job::JobPhase;
use reportbridge_core::script::ConfigResolver;
use reportbridge_core::types::{JobId, UserIdentity};
use reportbridge_delivery::{format_summary, Distributor};
use reportbridge_engine::{RenderingEngine, SubmitResponse};
use reportbridge_session::{SessionCache, SessionKey};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::record::{JobRecord, JobSnapshot};
use crate::registry::TaskPool;

/// Message recorded on jobs stopped by a caller.
pub const CANCELED_BY_USER: &str = "canceled by user";

/// Everything needed to start a job.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Raw user script (JSON, relaxed JSON or YAML).
    pub script: String,
    pub server_uri: String,
    pub app_id: String,
    pub user: UserIdentity,
}

/// A single job or every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTarget {
    All,
    One(JobId),
}

impl FromStr for JobTarget {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        JobId::parse(s)
            .map(Self::One)
            .ok_or_else(|| OrchestratorError::InvalidTarget(s.to_string()))
    }
}

/// Why a job is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A caller invoked stop.
    User,
    /// The client stopped polling for longer than the idle timeout.
    IdleTimeout,
}

impl StopReason {
    fn cause(self, idle_timeout: Option<std::time::Duration>) -> JobFailure {
        match self {
            Self::User => JobFailure::new(JobErrorKind::Cancelled, CANCELED_BY_USER),
            Self::IdleTimeout => {
                let secs = idle_timeout.map(|t| t.as_secs()).unwrap_or_default();
                JobFailure::new(
                    JobErrorKind::Timeout,
                    format!("stopped after {secs}s without a status request"),
                )
            }
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Job orchestration engine shared by the HTTP handlers and the watcher.
///
/// Created once at startup and passed around as `Arc<Orchestrator>`.
pub struct Orchestrator {
    pub(crate) pool: TaskPool,
    pub(crate) sessions: SessionCache,
    pub(crate) resolver: ConfigResolver,
    pub(crate) engine: Arc<dyn RenderingEngine>,
    pub(crate) distributor: Arc<dyn Distributor>,
    pub(crate) config: OrchestratorConfig,
    /// Root token; every job token is a child of it.
    pub(crate) shutdown: CancellationToken,
    /// Delivery and cleanup tasks awaited at shutdown.
    pub(crate) tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        resolver: ConfigResolver,
        sessions: SessionCache,
        engine: Arc<dyn RenderingEngine>,
        distributor: Arc<dyn Distributor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool: TaskPool::new(),
            sessions,
            resolver,
            engine,
            distributor,
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ------------------------------------------------------------------
    // start
    // ------------------------------------------------------------------

    /// Resolve the script, submit it to the engine and start tracking it.
    ///
    /// Session and script failures are returned to the caller. Once the
    /// job exists, engine failures are recorded on it and its id is still
    /// returned so the caller can read the error through `status`.
    pub async fn start(&self, request: StartRequest) -> Result<JobId, OrchestratorError> {
        if self.is_shutting_down() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let key = SessionKey::new(request.server_uri, request.user, request.app_id);
        let lease = self.sessions.acquire(key).await?;

        let mut spec = match self.resolver.resolve(&request.script, &lease.context()) {
            Ok(spec) => spec,
            Err(e) => {
                self.sessions.release(&lease).await;
                return Err(e.into());
            }
        };

        let mut uploaded = Vec::new();
        let upload_result = self.upload_templates(&mut spec, &mut uploaded).await;

        let record = self.pool.create(|id| {
            JobRecord::new(id, lease, spec, uploaded, self.shutdown.child_token())
        });
        let id = record.id();
        tracing::info!(
            job_id = %id,
            session = %record.session().key(),
            reports = record.spec().reports().count(),
            "Job created",
        );

        if let Err(e) = upload_result {
            record.fail(JobFailure::from_error(JobErrorKind::Engine, e));
            return Ok(id);
        }

        match self
            .engine
            .submit(id, record.spec())
            .await
            .and_then(SubmitResponse::into_result)
        {
            Ok(operation_id) => {
                tracing::info!(job_id = %id, operation_id = ?operation_id, "Job submitted to rendering engine");
                record.set_operation_id(operation_id);
            }
            Err(e) => {
                record.fail(JobFailure::from_error(JobErrorKind::Engine, e));
            }
        }

        Ok(id)
    }

    // ------------------------------------------------------------------
    // status
    // ------------------------------------------------------------------

    /// Snapshot one job (counting as client contact) or every job.
    pub fn status(&self, target: JobTarget) -> Result<Vec<JobSnapshot>, OrchestratorError> {
        match target {
            JobTarget::All => Ok(self.pool.snapshot().iter().map(|r| r.snapshot()).collect()),
            JobTarget::One(id) => {
                let record = self.find(id)?;
                record.touch();
                Ok(vec![record.snapshot()])
            }
        }
    }

    // ------------------------------------------------------------------
    // stop
    // ------------------------------------------------------------------

    /// Stop one job or every job; returns the resulting snapshots.
    pub async fn stop(&self, target: JobTarget) -> Result<Vec<JobSnapshot>, OrchestratorError> {
        let records = match target {
            JobTarget::All => self.pool.snapshot(),
            JobTarget::One(id) => vec![self.find(id)?],
        };

        for record in &records {
            self.stop_job(record, StopReason::User).await;
        }
        Ok(records.iter().map(|r| r.snapshot()).collect())
    }

    /// Cancel a job, ask the engine to abort it and mark it `Stopped`.
    ///
    /// Returns `false` when the job was already terminal or stopping.
    pub(crate) async fn stop_job(&self, record: &Arc<JobRecord>, reason: StopReason) -> bool {
        let phase = record.phase();
        if phase.is_terminal() || phase == JobPhase::StopRequested {
            return false;
        }
        if !record.transition(JobPhase::StopRequested) {
            return false;
        }

        let id = record.id();
        tracing::info!(job_id = %id, from = ?phase, reason = %reason, "Stopping job");
        record.cancel_token().cancel();

        match self.engine.stop(id).await {
            Ok(true) => tracing::debug!(job_id = %id, "Rendering engine stopped the job"),
            Ok(false) => tracing::warn!(job_id = %id, "Rendering engine did not confirm the stop"),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to stop job on rendering engine"),
        }

        record.finish_stop(reason.cause(self.config.idle_timeout));
        self.sessions.release(record.session()).await;
        true
    }

    // ------------------------------------------------------------------
    // result
    // ------------------------------------------------------------------

    /// Formatted distribution summary, `None` while there is none.
    pub fn result(&self, id: JobId) -> Result<Option<String>, OrchestratorError> {
        let record = self.find(id)?;
        record.touch();
        Ok(record.result_summary().map(|raw| format_summary(&raw)))
    }

    // ------------------------------------------------------------------
    // shutdown
    // ------------------------------------------------------------------

    /// Cancel every job token, run pending cleanups now and wait for
    /// background tasks up to the configured timeout.
    pub async fn shutdown(&self) {
        tracing::info!(jobs = self.pool.len(), tasks = self.tasks.len(), "Shutting down orchestrator");
        self.shutdown.cancel();
        self.tasks.close();

        if tokio::time::timeout(self.config.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tasks.len(),
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Timed out waiting for background tasks",
            );
        }
    }

    fn find(&self, id: JobId) -> Result<Arc<JobRecord>, OrchestratorError> {
        self.pool
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }
}
