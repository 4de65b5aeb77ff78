use super::messages::{ManagerMessage, Submitted};
use super::FinalizedJob;
use crate::actors::broadcaster::BroadcasterHandle;
use crate::cancelable::{CancelHandle, CancelableFuture, Canceled};
use crate::config::ManagerConfig;
use crate::errors::{self, JobError};
use crate::events::{JobEvent, JobStatus};
use crate::executor::JobExecutor;
use crate::listeners::JobEventListeners;
use crate::outputs::{JobExecutionResult, JobOutputPersister};
use crate::request::{PersistedJob, ValidJobRequest};
use crate::types::{JobId, OutputSender, OutputStream};
use crate::writer::JobWriter;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Completion = (JobId, Result<JobExecutionResult, Canceled>);
type Started = (JobId, errors::Result<CancelableFuture<JobExecutionResult>>);

struct QueuedJob {
    job: PersistedJob,
    listeners: JobEventListeners,
    completion: oneshot::Sender<FinalizedJob>,
}

/// Dequeued, with the executor still preparing it on the blocking pool.
struct StartingJob {
    queued: QueuedJob,
    stdout: BroadcasterHandle,
    stderr: BroadcasterHandle,
    aborted: bool,
}

struct ExecutingJob {
    queued: QueuedJob,
    started_at: DateTime<Utc>,
    stdout: BroadcasterHandle,
    stderr: BroadcasterHandle,
    cancel: CancelHandle,
    aborted: bool,
}

pub struct JobManager {
    inbox: mpsc::Receiver<ManagerMessage>,
    config: ManagerConfig,
    writer: Arc<dyn JobWriter>,
    executor: Arc<dyn JobExecutor>,
    queue: VecDeque<QueuedJob>,
    starting: HashMap<JobId, StartingJob>,
    executing: HashMap<JobId, ExecutingJob>,
    event_subscribers: Vec<mpsc::UnboundedSender<JobEvent>>,
    started_tx: mpsc::UnboundedSender<Started>,
    started_rx: mpsc::UnboundedReceiver<Started>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl JobManager {
    pub fn spawn(
        inbox: mpsc::Receiver<ManagerMessage>,
        config: ManagerConfig,
        writer: Arc<dyn JobWriter>,
        executor: Arc<dyn JobExecutor>,
    ) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let actor = Self {
            inbox,
            config,
            writer,
            executor,
            queue: VecDeque::new(),
            starting: HashMap::new(),
            executing: HashMap::new(),
            event_subscribers: Vec::new(),
            started_tx,
            started_rx,
            completions_tx,
            completions_rx,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        let mut accepting = true;
        loop {
            if !accepting && self.queue.is_empty() && self.active() == 0 {
                break;
            }
            tokio::select! {
                msg = self.inbox.recv(), if accepting => match msg {
                    Some(msg) => self.handle(msg),
                    None => {
                        debug!(
                            queued = self.queue.len(),
                            executing = self.active(),
                            "all manager handles dropped, draining remaining jobs"
                        );
                        accepting = false;
                    }
                },
                Some((job_id, started)) = self.started_rx.recv() => {
                    self.on_started(job_id, started);
                    self.advance_queue();
                }
                Some((job_id, outcome)) = self.completions_rx.recv() => {
                    self.on_execution_finished(job_id, outcome);
                    self.advance_queue();
                }
            }
        }
        debug!("job manager stopped");
    }

    fn handle(&mut self, msg: ManagerMessage) {
        use self::ManagerMessage::*;
        match msg {
            Submit {
                request,
                listeners,
                response,
            } => {
                let _ = response.send(self.submit(request, listeners));
            }
            Abort { job_id, response } => {
                let _ = response.send(self.try_abort(&job_id));
            }
            GetStatus { job_id, response } => {
                let _ = response.send(self.status(&job_id));
            }
            StreamStdout { job_id, response } => {
                let stream = self.executing.get(&job_id).map(|job| job.stdout.stream());
                let _ = response.send(stream);
            }
            StreamStderr { job_id, response } => {
                let stream = self.executing.get(&job_id).map(|job| job.stderr.stream());
                let _ = response.send(stream);
            }
            SubscribeEvents { subscriber } => {
                self.event_subscribers.push(subscriber);
            }
            QueueHealth { response } => {
                let _ = response.send(crate::health::QueueHealth::check(
                    self.queue.len(),
                    self.config.queue_overflow_threshold,
                ));
            }
        }
    }

    fn submit(
        &mut self,
        request: ValidJobRequest,
        listeners: JobEventListeners,
    ) -> errors::Result<Submitted> {
        request.validate()?;
        let job = self.writer.persist(request)?;
        let job_id = job.id.clone();
        let (completion, receiver) = oneshot::channel();
        self.queue.push_back(QueuedJob {
            job,
            listeners,
            completion,
        });
        info!(job_id = %job_id, queued = self.queue.len(), "job queued");
        self.update_job_status(&job_id, JobStatus::Submitted, "Queued by job manager");
        self.advance_queue();
        Ok((job_id, receiver))
    }

    fn active(&self) -> usize {
        self.starting.len() + self.executing.len()
    }

    fn try_abort(&mut self, job_id: &JobId) -> bool {
        if let Some(starting) = self.starting.get_mut(job_id) {
            if starting.aborted {
                return false;
            }
            debug!(job_id = %job_id, "received cancellation signal for starting job");
            // the launch is stopped as soon as the executor hands it back
            starting.aborted = true;
            self.update_job_status(job_id, JobStatus::Aborted, "Aborted");
            return true;
        }

        if let Some(executing) = self.executing.get_mut(job_id) {
            debug!(job_id = %job_id, "received cancellation signal for executing job");
            // the slot stays occupied until the process is gone
            let cancelled = !executing.aborted && executing.cancel.cancel();
            if cancelled {
                executing.aborted = true;
                self.update_job_status(job_id, JobStatus::Aborted, "Aborted");
            }
            return cancelled;
        }

        match self.queue.iter().position(|queued| &queued.job.id == job_id) {
            Some(position) => {
                let removed = self.queue.remove(position);
                if let Some(queued) = removed {
                    debug!(job_id = %job_id, "removed job from queue");
                    self.update_job_status(job_id, JobStatus::Aborted, "Aborted");
                    finalize(queued, None, JobStatus::Aborted, "Aborted".to_string());
                    return true;
                }
                false
            }
            None => false,
        }
    }

    fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        if let Some(starting) = self.starting.get(job_id) {
            return Some(if starting.aborted {
                JobStatus::Aborted
            } else {
                JobStatus::Submitted
            });
        }
        if let Some(executing) = self.executing.get(job_id) {
            return Some(if executing.aborted {
                JobStatus::Aborted
            } else {
                JobStatus::Running
            });
        }
        self.queue
            .iter()
            .any(|queued| &queued.job.id == job_id)
            .then_some(JobStatus::Submitted)
    }

    fn advance_queue(&mut self) {
        while self.active() < self.config.max_concurrent_jobs {
            match self.queue.pop_front() {
                Some(queued) => self.start(queued),
                None => break,
            }
        }
    }

    fn start(&mut self, queued: QueuedJob) {
        let job_id = queued.job.id.clone();
        debug!(job_id = %job_id, "dequeued job");

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let stdout = BroadcasterHandle::spawn(
            stdout_rx,
            self.subscribers(&job_id, queued.listeners.stdout.clone(), |writer, id, s| {
                writer.append_stdout(id, s)
            }),
        );
        let stderr = BroadcasterHandle::spawn(
            stderr_rx,
            self.subscribers(&job_id, queued.listeners.stderr.clone(), |writer, id, s| {
                writer.append_stderr(id, s)
            }),
        );

        // preparing the working directory is blocking filesystem work
        let executor = Arc::clone(&self.executor);
        let job = queued.job.clone();
        let listeners = JobEventListeners::new(stdout_tx, stderr_tx);
        let started = self.started_tx.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || executor.execute(&job, listeners))
                .await
                .unwrap_or_else(|e| {
                    Err(JobError::Io(io::Error::other(format!(
                        "executor panicked: {}",
                        e
                    ))))
                });
            let _ = started.send((id, outcome));
        });

        self.starting.insert(
            job_id,
            StartingJob {
                queued,
                stdout,
                stderr,
                aborted: false,
            },
        );
    }

    fn on_started(
        &mut self,
        job_id: JobId,
        outcome: errors::Result<CancelableFuture<JobExecutionResult>>,
    ) {
        let Some(starting) = self.starting.remove(&job_id) else {
            warn!(job_id = %job_id, "launch of a job that is not starting");
            return;
        };

        let future = match outcome {
            Ok(future) => future,
            Err(e) if starting.aborted => {
                info!(job_id = %job_id, error = %e, "aborted job never started");
                finalize(starting.queued, None, JobStatus::Aborted, "Aborted".to_string());
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "error starting job execution");
                let message = format!("Error executing job: {}", e);
                self.update_job_status(&job_id, JobStatus::FatalError, &message);
                finalize(starting.queued, None, JobStatus::FatalError, message);
                return;
            }
        };

        let cancel = future.cancel_handle();
        let completions = self.completions_tx.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let outcome = future.await;
            let _ = completions.send((id, outcome));
        });

        let aborted = starting.aborted;
        if aborted {
            debug!(job_id = %job_id, "stopping job aborted while starting");
            cancel.cancel();
        }
        self.executing.insert(
            job_id.clone(),
            ExecutingJob {
                queued: starting.queued,
                started_at: Utc::now(),
                stdout: starting.stdout,
                stderr: starting.stderr,
                cancel,
                aborted,
            },
        );
        if !aborted {
            self.update_job_status(&job_id, JobStatus::Running, "Submitted to executor");
        }
    }

    /// The durable writer subscribes first, then the submitter's listener if any.
    fn subscribers(
        &self,
        job_id: &JobId,
        listener: Option<OutputSender>,
        append: impl FnOnce(&dyn JobWriter, &JobId, OutputStream),
    ) -> Vec<OutputSender> {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        append(self.writer.as_ref(), job_id, writer_rx);
        std::iter::once(writer_tx).chain(listener).collect()
    }

    fn on_execution_finished(
        &mut self,
        job_id: JobId,
        outcome: Result<JobExecutionResult, Canceled>,
    ) {
        let Some(executing) = self.executing.remove(&job_id) else {
            warn!(job_id = %job_id, "completion for a job that is not executing");
            return;
        };

        if executing.aborted {
            // ABORTED was recorded when the abort was accepted
            info!(job_id = %job_id, "aborted job has stopped");
            finalize(
                executing.queued,
                Some(executing.started_at),
                JobStatus::Aborted,
                "Aborted".to_string(),
            );
            return;
        }

        let (final_status, final_message) = match outcome {
            Ok(result) => self.reconcile(&job_id, &result),
            Err(Canceled) => (
                JobStatus::FatalError,
                "Execution was cancelled without being aborted".to_string(),
            ),
        };

        info!(job_id = %job_id, status = %final_status, "job finished");
        self.update_job_status(&job_id, final_status, &final_message);
        finalize(
            executing.queued,
            Some(executing.started_at),
            final_status,
            final_message,
        );
    }

    /// Persist the outputs and derive the final status. A missing required output
    /// overrides a successful exit.
    fn reconcile(&self, job_id: &JobId, result: &JobExecutionResult) -> (JobStatus, String) {
        let persister = JobOutputPersister::new(job_id, self.writer.as_ref());
        let output_errors = persister.persist_all(&result.outputs);

        match (result.final_status, output_errors) {
            (JobStatus::Finished, Some(errors)) => {
                warn!(job_id = %job_id, %errors, "required outputs missing");
                (
                    JobStatus::FatalError,
                    format!(
                        "Job executed successfully, but there was an error handling the outputs: {}",
                        errors
                    ),
                )
            }
            (JobStatus::Finished, None) => (JobStatus::Finished, "Execution finished".to_string()),
            (status, _) => (status, "Execution did not finish successfully".to_string()),
        }
    }

    fn update_job_status(&mut self, job_id: &JobId, status: JobStatus, message: &str) {
        self.writer.add_new_job_status(job_id, status, message);
        let event = JobEvent {
            job_id: job_id.clone(),
            status,
        };
        self.event_subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

fn finalize(
    queued: QueuedJob,
    started_at: Option<DateTime<Utc>>,
    final_status: JobStatus,
    final_message: String,
) {
    let finalized = FinalizedJob {
        job: queued.job,
        started_at,
        finished_at: Utc::now(),
        final_status,
        final_message,
    };
    // the submitter may have stopped waiting
    let _ = queued.completion.send(finalized);
}
