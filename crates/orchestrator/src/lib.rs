//! Job orchestration engine.
//!
//! [`Orchestrator`] owns the task pool, the session cache and the clients
//! for the rendering engine and the distribution service. Its four handlers
//! (`start`, `status`, `stop`, `result`) serve callers; the [`Watcher`]
//! drives each job from submission to delivery and retirement.
//!
//! ```text
//! start ─▶ JobSubmitted ─▶ EngineRunning ─▶ ResultsDownloading ─▶ Distributing ─▶ Distributed
//!                 │               │                  │                  │
//!                 └───────────────┴──── stop ────────┴──────────────────┴─▶ StopRequested ─▶ Stopped
//! ```
//!
//! Terminal jobs are retired after `cleanup_delay`: removed from the pool,
//! their session released and their engine-side files deleted.

pub mod backoff;
mod cleanup;
pub mod config;
mod distribute;
pub mod error;
pub mod handlers;
pub mod record;
pub mod registry;
pub mod templates;
pub mod watcher;

pub use backoff::RestartConfig;
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, WatcherError};
pub use handlers::{JobTarget, Orchestrator, StartRequest, StopReason, CANCELED_BY_USER};
pub use record::{JobRecord, JobSnapshot};
pub use registry::TaskPool;
pub use watcher::Watcher;
