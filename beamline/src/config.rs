//! Configuration types for the orchestration engine.
//!
//! Groups the tuning knobs by the component that consumes them. All values
//! have defaults matched to the cadence of the simulators' log output: logs
//! grow on the order of seconds, so nothing here polls faster than that.

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default interval between update-queue drains.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(2);

/// Default maximum number of payloads consumed per drain.
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 1000;

/// Default minimum spacing between progress updates for one task.
pub const DEFAULT_PROGRESS_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of one-second attempts to wait for a task's log file to
/// appear before declaring the worker dead.
pub const DEFAULT_FILE_WAIT_ATTEMPTS: u32 = 20;

/// Default sleep between log polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default window of log silence after which a task is considered stalled.
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cap on concurrently running local workers.
pub const DEFAULT_LOCAL_WORKER_LIMIT: usize = 8;

// =============================================================================
// Component Configuration
// =============================================================================

/// Configuration for log tailing and per-task monitoring.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Sleep between log polls.
    pub poll_interval: Duration,

    /// How many poll intervals to wait for the log file to be created.
    pub file_wait_attempts: u32,

    /// Log silence window after which the task is marked failed.
    pub silence_timeout: Duration,

    /// Minimum spacing between forwarded progress events. Progress lines
    /// arriving faster than this are dropped to bound update volume.
    pub progress_min_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            file_wait_attempts: DEFAULT_FILE_WAIT_ATTEMPTS,
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            progress_min_interval: DEFAULT_PROGRESS_MIN_INTERVAL,
        }
    }
}

impl MonitorConfig {
    /// Number of empty polls that add up to the silence timeout.
    pub fn max_silent_polls(&self) -> u32 {
        let polls = self.silence_timeout.as_secs_f64() / self.poll_interval.as_secs_f64();
        polls.ceil().max(1.0) as u32
    }
}

/// Configuration for the update-queue drain consumer.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Interval between drains.
    pub drain_interval: Duration,

    /// Maximum payloads applied per drain.
    pub drain_batch_size: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
        }
    }
}

/// Top-level configuration for the orchestrator.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub monitor: MonitorConfig,

    pub consumer: ConsumerConfig,

    /// Cap on concurrently running local workers across all jobs.
    pub local_worker_limit: usize,

    /// Directory under which local jobs get their per-task workspaces.
    pub work_root: PathBuf,

    /// Address batch-cluster scripts call back to with task updates.
    pub callback_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            consumer: ConsumerConfig::default(),
            local_worker_limit: DEFAULT_LOCAL_WORKER_LIMIT,
            work_root: std::env::temp_dir().join("beamline"),
            callback_url: "http://localhost:5000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.consumer.drain_interval, Duration::from_secs(2));
        assert_eq!(config.consumer.drain_batch_size, 1000);
        assert_eq!(config.monitor.file_wait_attempts, 20);
        assert_eq!(config.local_worker_limit, DEFAULT_LOCAL_WORKER_LIMIT);
    }

    #[test]
    fn test_max_silent_polls() {
        let config = MonitorConfig::default();
        assert_eq!(config.max_silent_polls(), 300);

        let fast = MonitorConfig {
            poll_interval: Duration::from_millis(200),
            silence_timeout: Duration::from_secs(1),
            ..MonitorConfig::default()
        };
        assert_eq!(fast.max_silent_polls(), 5);
    }
}
