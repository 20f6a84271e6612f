//! Background watcher driving every job through its lifecycle.
//!
//! One long-lived task ticks every `watcher_interval`. Each pass polls the
//! rendering engine for all tracked jobs concurrently, advances their
//! phases, enforces the idle timeout, hands finished jobs to a delivery
//! task and schedules cleanup of terminal ones.
//!
//! A failed pass (every poll failing, or a panic) is retried with bounded
//! exponential backoff. Exceeding `max_restarts` consecutive failures stops
//! the watcher with [`WatcherError::RetriesExhausted`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use reportbridge_core::error::{JobErrorKind, JobFailure};
use reportbridge_core::job::JobPhase;
use reportbridge_core::results::{classify, EngineOutcome};
use reportbridge_core::types::Timestamp;
use reportbridge_engine::EngineError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Restart, RestartBudget};
use crate::error::WatcherError;
use crate::handlers::{Orchestrator, StopReason};
use crate::record::JobRecord;

/// Drives the job lifecycle on a fixed interval.
pub struct Watcher {
    orchestrator: Arc<Orchestrator>,
}

impl Watcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run passes until `cancel` fires or the restart budget is spent.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let config = &self.orchestrator.config;
        let restart = &config.restart;
        let mut ticker = tokio::time::interval(config.watcher_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut budget = RestartBudget::new(restart);

        tracing::info!(
            interval_ms = config.watcher_interval.as_millis() as u64,
            max_restarts = restart.max_restarts,
            "Job watcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job watcher shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let outcome = AssertUnwindSafe(self.tick())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(WatcherError::Panicked(panic_message(&*panic))));

            let Err(e) = outcome else {
                budget.reset();
                continue;
            };

            let Restart::After { attempt, delay } = budget.record_failure() else {
                tracing::error!(
                    error = %e,
                    restarts = restart.max_restarts,
                    "Job watcher exceeded its restart budget, stopping",
                );
                return Err(WatcherError::RetriesExhausted {
                    restarts: restart.max_restarts,
                    last: Box::new(e),
                });
            };

            tracing::error!(
                error = %e,
                attempt,
                max_restarts = restart.max_restarts,
                delay_ms = delay.as_millis() as u64,
                "Job watcher pass failed, restarting",
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job watcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
            ticker.reset();
        }
    }

    /// One pass over the pool at the current time.
    pub async fn tick(&self) -> Result<(), WatcherError> {
        self.tick_at(Utc::now()).await
    }

    /// One pass over the pool, judging idle timeouts against `now`.
    pub async fn tick_at(&self, now: Timestamp) -> Result<(), WatcherError> {
        let records = self.orchestrator.pool.snapshot();
        let polls = join_all(records.into_iter().map(|record| self.visit(record, now))).await;

        let mut polled = 0usize;
        let mut failed = Vec::new();
        for poll in polls {
            match poll {
                Visit::Polled => polled += 1,
                Visit::PollFailed(e) => failed.push(e),
                Visit::Skipped => {}
            }
        }

        // One unreachable job is that job's problem; all of them failing
        // means the engine is gone.
        if polled == 0 {
            if let Some(source) = failed.pop() {
                return Err(WatcherError::EngineUnavailable {
                    failed: failed.len() + 1,
                    source,
                });
            }
        }
        Ok(())
    }

    async fn visit(&self, record: Arc<JobRecord>, now: Timestamp) -> Visit {
        let orchestrator = &self.orchestrator;
        let id = record.id();
        let phase = record.phase();

        if phase == JobPhase::Cleanup {
            return Visit::Skipped;
        }
        if phase.is_terminal() {
            orchestrator.schedule_cleanup(&record);
            return Visit::Skipped;
        }
        if phase == JobPhase::StopRequested {
            return Visit::Skipped;
        }

        if let Some(timeout) = orchestrator.config.idle_timeout {
            let watched = matches!(phase, JobPhase::EngineRunning | JobPhase::Distributing);
            if watched && record.idle_for(now).is_some_and(|idle| idle > timeout) {
                tracing::info!(
                    job_id = %id,
                    timeout_secs = timeout.as_secs(),
                    "Client stopped polling, stopping job",
                );
                orchestrator.stop_job(&record, StopReason::IdleTimeout).await;
                orchestrator.schedule_cleanup(&record);
                return Visit::Skipped;
            }
        }

        if phase.is_delivering() {
            return Visit::Skipped;
        }
        let Some(claim) = record.try_claim() else {
            return Visit::Skipped;
        };

        let results = match orchestrator.engine.poll_results(id).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to poll rendering engine");
                return Visit::PollFailed(e);
            }
        };
        if record.stop_requested() {
            return Visit::Polled;
        }

        match classify(&results) {
            EngineOutcome::Pending => {}
            EngineOutcome::InProgress => {
                record.transition(JobPhase::EngineRunning);
            }
            EngineOutcome::Failed(message) => {
                record.fail(JobFailure::new(JobErrorKind::Engine, message));
                orchestrator.sessions.release(record.session()).await;
            }
            EngineOutcome::Completed => {
                if record.transition(JobPhase::ResultsDownloading) {
                    tracing::info!(job_id = %id, tasks = results.len(), "Rendering finished, downloading results");
                    record.set_results(results);
                    orchestrator.spawn_delivery(claim);
                    return Visit::Polled;
                }
            }
        }

        drop(claim);
        if record.phase().is_terminal() {
            orchestrator.schedule_cleanup(&record);
        }
        Visit::Polled
    }
}

/// What visiting one job amounted to.
enum Visit {
    Skipped,
    Polled,
    PollFailed(EngineError),
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
