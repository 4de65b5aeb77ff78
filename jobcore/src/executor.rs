//! Turning a persisted job into a running process.

mod dependencies;
mod local;
mod outputs;

pub use local::LocalJobExecutor;

use crate::cancelable::CancelableFuture;
use crate::errors::Result;
use crate::listeners::JobEventListeners;
use crate::outputs::JobExecutionResult;
use crate::request::PersistedJob;

pub trait JobExecutor: Send + Sync {
    /// Launch `job`, streaming its stdout/stderr to `listeners`.
    ///
    /// An `Err` means the job never started (working directory, dependency,
    /// template or launch failure). Once launched, the outcome arrives through the
    /// returned future, whose cancellation stops the job.
    fn execute(
        &self,
        job: &PersistedJob,
        listeners: JobEventListeners,
    ) -> Result<CancelableFuture<JobExecutionResult>>;
}
