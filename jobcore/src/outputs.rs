//! What a finished process left behind, and how it is reconciled with the writer.

use crate::events::JobStatus;
use crate::types::{JobId, JobOutputId};
use crate::writer::JobWriter;
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// An expected output that was found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutput {
    pub id: JobOutputId,
    pub data: Bytes,
    pub mime_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl JobOutput {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// An expected output that was not found where the job spec said it would be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingOutput {
    pub id: JobOutputId,
    pub required: bool,
    pub expected_location: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutputResult {
    Present(JobOutput),
    Missing(MissingOutput),
}

impl JobOutputResult {
    pub fn id(&self) -> &JobOutputId {
        match self {
            JobOutputResult::Present(output) => &output.id,
            JobOutputResult::Missing(missing) => &missing.id,
        }
    }
}

/// What the executor reports once a job's process has exited.
///
/// `outputs` holds one entry per expected output, in declaration order, when the
/// job finished; it is empty otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobExecutionResult {
    pub final_status: JobStatus,
    pub outputs: Vec<JobOutputResult>,
}

impl JobExecutionResult {
    pub fn new(final_status: JobStatus, outputs: Vec<JobOutputResult>) -> Self {
        Self {
            final_status,
            outputs,
        }
    }

    pub fn from_status(final_status: JobStatus) -> Self {
        Self::new(final_status, Vec::new())
    }
}

/// Persists present outputs and reports required outputs that went missing.
pub struct JobOutputPersister<'a> {
    job_id: &'a JobId,
    writer: &'a dyn JobWriter,
}

impl<'a> JobOutputPersister<'a> {
    pub fn new(job_id: &'a JobId, writer: &'a dyn JobWriter) -> Self {
        Self { job_id, writer }
    }

    /// Handle one output result, returning an error message if it makes the job fail.
    pub fn persist(&self, result: &JobOutputResult) -> Option<String> {
        match result {
            JobOutputResult::Present(output) => {
                debug!(job_id = %self.job_id, output_id = %output.id, size = output.size(), "persisting output");
                self.writer.persist_output(self.job_id, output);
                None
            }
            JobOutputResult::Missing(missing) if missing.required => {
                warn!(job_id = %self.job_id, output_id = %missing.id, "required output missing");
                Some(format!(
                    "{} (expected at: {}) was missing",
                    missing.id, missing.expected_location
                ))
            }
            JobOutputResult::Missing(missing) => {
                debug!(job_id = %self.job_id, output_id = %missing.id, "optional output missing");
                None
            }
        }
    }

    /// Handle every output; `Some` carries the joined messages of all failures.
    pub fn persist_all(&self, results: &[JobOutputResult]) -> Option<String> {
        let errors: Vec<String> = results
            .iter()
            .filter_map(|result| self.persist(result))
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.join(", "))
        }
    }
}
