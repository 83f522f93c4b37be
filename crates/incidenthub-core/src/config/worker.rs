//! Background worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Background job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the scheduler is started by the daemon.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of jobs executing at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Back-off in milliseconds when every worker slot is busy.
    #[serde(default = "default_busy_backoff")]
    pub busy_backoff_ms: u64,
    /// Back-off in milliseconds when a poll claimed nothing.
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,
    /// Per-job execution limit in seconds (0 = unlimited).
    #[serde(default)]
    pub job_timeout_seconds: u64,
    /// Wait for in-flight jobs before the scheduler returns.
    #[serde(default = "default_true")]
    pub drain_on_shutdown: bool,
    /// Upper bound in seconds on the shutdown drain.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl WorkerConfig {
    /// Back-off used while all worker slots are occupied.
    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    /// Back-off used after an empty poll.
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Per-job timeout, if one is configured.
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_seconds > 0).then(|| Duration::from_secs(self.job_timeout_seconds))
    }

    /// Maximum time spent draining in-flight jobs on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_concurrency(),
            busy_backoff_ms: default_busy_backoff(),
            idle_backoff_ms: default_idle_backoff(),
            job_timeout_seconds: 0,
            drain_on_shutdown: default_true(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    10
}

fn default_busy_backoff() -> u64 {
    100
}

fn default_idle_backoff() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    30
}
