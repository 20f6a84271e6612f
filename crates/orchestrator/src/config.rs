use std::path::PathBuf;
use std::time::Duration;

use reportbridge_core::config::{env_optional, env_or, ConfigError};

use crate::backoff::RestartConfig;

/// Orchestrator tuning loaded from environment variables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between watcher passes (default: 1s).
    pub watcher_interval: Duration,
    /// Stop jobs whose client stopped polling for this long. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Delay between a job turning terminal and its retirement (default: 30s).
    pub cleanup_delay: Duration,
    /// Bounded restart policy of the watcher loop.
    pub restart: RestartConfig,
    /// Local directory template inputs are uploaded from.
    pub template_dir: Option<PathBuf>,
    /// Upper bound on waiting for background tasks at shutdown (default: 30s).
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            watcher_interval: Duration::from_millis(1000),
            idle_timeout: None,
            cleanup_delay: Duration::from_secs(30),
            restart: RestartConfig::default(),
            template_dir: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `WATCHER_INTERVAL_MS`    | `1000`           |
    /// | `JOB_IDLE_TIMEOUT_SECS`  | `0` (disabled)   |
    /// | `JOB_CLEANUP_DELAY_SECS` | `30`             |
    /// | `WATCHER_MAX_RESTARTS`   | `5`              |
    /// | `TEMPLATE_DIR`           | unset            |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let idle_timeout_secs: u64 = env_or("JOB_IDLE_TIMEOUT_SECS", 0)?;

        Ok(Self {
            watcher_interval: Duration::from_millis(env_or("WATCHER_INTERVAL_MS", 1000)?),
            idle_timeout: (idle_timeout_secs > 0).then(|| Duration::from_secs(idle_timeout_secs)),
            cleanup_delay: Duration::from_secs(env_or("JOB_CLEANUP_DELAY_SECS", 30)?),
            restart: RestartConfig {
                max_restarts: env_or("WATCHER_MAX_RESTARTS", defaults.restart.max_restarts)?,
                ..defaults.restart
            },
            template_dir: env_optional("TEMPLATE_DIR").map(PathBuf::from),
            shutdown_timeout: Duration::from_secs(env_or("SHUTDOWN_TIMEOUT_SECS", 30)?),
        })
    }
}
