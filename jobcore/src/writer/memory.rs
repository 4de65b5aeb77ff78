use super::JobWriter;
use crate::errors::Result;
use crate::events::{JobStatus, JobTimestamp};
use crate::outputs::JobOutput;
use crate::request::{PersistedJob, ValidJobRequest};
use crate::types::{JobId, OutputStream};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// A [`JobWriter`] that keeps everything in memory.
///
/// Captured stdout/stderr can be read back once the stream has completed.
#[derive(Clone, Default)]
pub struct InMemoryJobWriter {
    jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
}

#[derive(Default)]
struct JobRecord {
    job: Option<PersistedJob>,
    timestamps: Vec<JobTimestamp>,
    stdout: Option<Capture>,
    stderr: Option<Capture>,
    outputs: Vec<JobOutput>,
}

#[derive(Clone)]
struct Capture {
    data: Arc<Mutex<BytesMut>>,
    done: watch::Receiver<bool>,
}

impl Capture {
    fn spawn(mut stream: OutputStream) -> Self {
        let data = Arc::new(Mutex::new(BytesMut::new()));
        let (done_tx, done) = watch::channel(false);
        let sink = data.clone();
        tokio::spawn(async move {
            while let Some(blob) = stream.recv().await {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&blob);
            }
            let _ = done_tx.send(true);
        });
        Self { data, done }
    }

    async fn collect(mut self) -> Bytes {
        let _ = self.done.wait_for(|done| *done).await;
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&data)
    }
}

enum Stream {
    Stdout,
    Stderr,
}

impl InMemoryJobWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<R>(&self, job_id: &JobId, f: impl FnOnce(&mut JobRecord) -> R) -> R {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        f(jobs.entry(job_id.clone()).or_default())
    }

    fn read<R>(&self, job_id: &JobId, f: impl FnOnce(&JobRecord) -> R) -> Option<R> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(job_id).map(f)
    }

    pub fn persisted(&self, job_id: &JobId) -> Option<PersistedJob> {
        self.read(job_id, |record| record.job.clone()).flatten()
    }

    /// Status history in the order it was recorded.
    pub fn timestamps(&self, job_id: &JobId) -> Vec<JobTimestamp> {
        self.read(job_id, |record| record.timestamps.clone())
            .unwrap_or_default()
    }

    pub fn statuses(&self, job_id: &JobId) -> Vec<JobStatus> {
        self.timestamps(job_id)
            .into_iter()
            .map(|timestamp| timestamp.status)
            .collect()
    }

    pub fn latest_status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.statuses(job_id).last().copied()
    }

    pub fn outputs(&self, job_id: &JobId) -> Vec<JobOutput> {
        self.read(job_id, |record| record.outputs.clone())
            .unwrap_or_default()
    }

    /// Everything the job wrote to stdout. Waits for the stream to complete.
    pub async fn stdout(&self, job_id: &JobId) -> Option<Bytes> {
        self.captured(job_id, Stream::Stdout).await
    }

    /// Everything the job wrote to stderr. Waits for the stream to complete.
    pub async fn stderr(&self, job_id: &JobId) -> Option<Bytes> {
        self.captured(job_id, Stream::Stderr).await
    }

    async fn captured(&self, job_id: &JobId, stream: Stream) -> Option<Bytes> {
        let capture = self
            .read(job_id, |record| match stream {
                Stream::Stdout => record.stdout.clone(),
                Stream::Stderr => record.stderr.clone(),
            })
            .flatten()?;
        Some(capture.collect().await)
    }
}

impl JobWriter for InMemoryJobWriter {
    fn persist(&self, request: ValidJobRequest) -> Result<PersistedJob> {
        let job = PersistedJob::new(JobId::generate(), request);
        debug!(job_id = %job.id, "persisted job request");
        self.with_record(&job.id, |record| record.job = Some(job.clone()));
        Ok(job)
    }

    fn add_new_job_status(&self, job_id: &JobId, status: JobStatus, message: &str) {
        self.with_record(job_id, |record| {
            record.timestamps.push(JobTimestamp::now(status, message))
        });
    }

    fn append_stdout(&self, job_id: &JobId, stdout: OutputStream) {
        let capture = Capture::spawn(stdout);
        self.with_record(job_id, |record| record.stdout = Some(capture));
    }

    fn append_stderr(&self, job_id: &JobId, stderr: OutputStream) {
        let capture = Capture::spawn(stderr);
        self.with_record(job_id, |record| record.stderr = Some(capture));
    }

    fn persist_output(&self, job_id: &JobId, output: &JobOutput) {
        self.with_record(job_id, |record| record.outputs.push(output.clone()));
    }
}
