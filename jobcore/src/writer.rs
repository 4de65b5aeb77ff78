//! The durable side of a job: where requests, statuses, stdout/stderr and outputs go.

mod memory;

pub use memory::InMemoryJobWriter;

use crate::errors::Result;
use crate::events::JobStatus;
use crate::outputs::JobOutput;
use crate::request::{PersistedJob, ValidJobRequest};
use crate::types::{JobId, OutputStream};

/// Storage collaborator used by the job manager.
///
/// The manager may call a writer concurrently for different jobs; implementations
/// are responsible for their own per-job consistency. `append_stdout` and
/// `append_stderr` are handed a live stream which completes when the process's
/// output does; dropping it unsubscribes the writer.
pub trait JobWriter: Send + Sync {
    /// Durably record a request, assigning its id.
    fn persist(&self, request: ValidJobRequest) -> Result<PersistedJob>;

    fn add_new_job_status(&self, job_id: &JobId, status: JobStatus, message: &str);

    fn append_stdout(&self, job_id: &JobId, stdout: OutputStream);

    fn append_stderr(&self, job_id: &JobId, stderr: OutputStream);

    fn persist_output(&self, job_id: &JobId, output: &JobOutput);
}
