//! Restart budget of the watcher loop.
//!
//! Consecutive failed passes are counted against `max_restarts`; each
//! restart waits longer than the previous one, up to `max_delay`. A
//! successful pass refills the budget.

use std::time::Duration;

/// Tunable parameters of the watcher's restart policy.
#[derive(Debug, Clone)]
pub struct RestartConfig {
    /// Consecutive failed passes tolerated before the watcher gives up.
    pub max_restarts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor applied to the delay after every failed pass.
    pub multiplier: f64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// What the watcher should do after a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restart {
    /// Sleep for `delay`, then run the `attempt`-th restarted pass.
    After { attempt: u32, delay: Duration },
    /// More than `max_restarts` passes failed in a row.
    Exhausted,
}

/// Running count of consecutive failures against a [`RestartConfig`].
#[derive(Debug)]
pub struct RestartBudget<'a> {
    config: &'a RestartConfig,
    failures: u32,
    delay: Duration,
}

impl<'a> RestartBudget<'a> {
    pub fn new(config: &'a RestartConfig) -> Self {
        Self {
            config,
            failures: 0,
            delay: config.initial_delay,
        }
    }

    /// A pass succeeded: forget earlier failures.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.delay = self.config.initial_delay;
    }

    /// Count a failed pass and decide whether to restart.
    pub fn record_failure(&mut self) -> Restart {
        self.failures += 1;
        if self.failures > self.config.max_restarts {
            return Restart::Exhausted;
        }

        let delay = self.delay;
        let grown = delay.as_secs_f64() * self.config.multiplier;
        self.delay = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        Restart::After {
            attempt: self.failures,
            delay,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
