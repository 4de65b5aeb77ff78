use crate::types::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a job.
///
/// A job moves through a prefix of `Submitted -> Running -> {Aborted | FatalError | Finished}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Submitted,
    Running,
    Aborted,
    FatalError,
    Finished,
}

impl JobStatus {
    /// Map a process exit code onto a terminal status.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => JobStatus::Finished,
            130 => JobStatus::Aborted, // SIGINT
            143 => JobStatus::Aborted, // SIGTERM
            _ => JobStatus::FatalError,
        }
    }

    pub fn abortable_statuses() -> [JobStatus; 2] {
        [JobStatus::Submitted, JobStatus::Running]
    }

    pub fn is_abortable(self) -> bool {
        Self::abortable_statuses().contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_abortable()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Aborted => "aborted",
            JobStatus::FatalError => "fatal-error",
            JobStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// A status change published on the manager-wide event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// One entry of a job's status history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimestamp {
    pub status: JobStatus,
    pub time: DateTime<Utc>,
    pub message: Option<String>,
}

impl JobTimestamp {
    pub fn now(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            time: Utc::now(),
            message: Some(message.into()),
        }
    }
}
