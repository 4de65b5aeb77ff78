//! Settings for the job manager and the local executor.
//!
//! Both structs deserialize with per-field defaults so an outer config file
//! only needs to name what it overrides.

use crate::errors::{JobError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 10;
pub const DEFAULT_QUEUE_OVERFLOW_THRESHOLD: usize = 10_000;
pub const DEFAULT_WORKING_DIRS: &str = "wds";
pub const DEFAULT_KILL_DELAY_MS: u64 = 5_000;
/// Capacity of the manager's inbound message queue.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 64;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Upper bound on jobs executing at once.
    pub max_concurrent_jobs: usize,
    /// Queue depth above which the queue health check reports unhealthy.
    pub queue_overflow_threshold: usize,
    pub message_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            queue_overflow_threshold: DEFAULT_QUEUE_OVERFLOW_THRESHOLD,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
        }
    }
}

impl ManagerConfig {
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_queue_overflow_threshold(mut self, threshold: usize) -> Self {
        self.queue_overflow_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(JobError::Config(
                "maxConcurrentJobs must be at least 1".to_string(),
            ));
        }
        if self.message_capacity == 0 {
            return Err(JobError::Config(
                "messageCapacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Root under which each job gets a working directory named by its id.
    pub working_dirs: PathBuf,
    /// Grace period between the terminate signal and a forced kill.
    pub delay_before_forcibly_killing_jobs: u64,
    /// Delete a job's working directory once its outputs have been resolved.
    pub remove_after_execution: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            working_dirs: PathBuf::from(DEFAULT_WORKING_DIRS),
            delay_before_forcibly_killing_jobs: DEFAULT_KILL_DELAY_MS,
            remove_after_execution: false,
        }
    }
}

impl ExecutorConfig {
    pub fn new(working_dirs: impl Into<PathBuf>) -> Self {
        Self {
            working_dirs: working_dirs.into(),
            ..Self::default()
        }
    }

    pub fn with_kill_delay(mut self, delay: Duration) -> Self {
        self.delay_before_forcibly_killing_jobs = delay.as_millis() as u64;
        self
    }

    pub fn with_remove_after_execution(mut self, remove: bool) -> Self {
        self.remove_after_execution = remove;
        self
    }

    pub fn kill_delay(&self) -> Duration {
        Duration::from_millis(self.delay_before_forcibly_killing_jobs)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.working_dirs.is_dir() {
            return Err(JobError::Config(format!(
                "{}: working directory root does not exist",
                self.working_dirs.display()
            )));
        }
        Ok(())
    }
}
