mod actor;
mod messages;

use self::{
    actor::JobManager,
    messages::ManagerMessage::{
        self, Abort, GetStatus, QueueHealth as GetQueueHealth, StreamStderr, StreamStdout,
        SubscribeEvents, Submit,
    },
};
use crate::config::ManagerConfig;
use crate::errors::{self, JobError};
use crate::events::{JobEvent, JobStatus};
use crate::executor::JobExecutor;
use crate::health::QueueHealth;
use crate::listeners::JobEventListeners;
use crate::request::{PersistedJob, ValidJobRequest};
use crate::types::{JobId, OutputStream};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// A job that has reached a terminal status.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizedJob {
    pub job: PersistedJob,
    /// `None` when the job never left the queue.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub final_status: JobStatus,
    pub final_message: String,
}

/// Resolves once the submitted job is finalized.
///
/// Holding a completion does not keep the manager accepting requests.
#[derive(Debug)]
pub struct JobCompletion {
    job_id: JobId,
    receiver: oneshot::Receiver<FinalizedJob>,
    manager: mpsc::WeakSender<ManagerMessage>,
}

impl JobCompletion {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Abort the job this completion waits for, as `JobManagerHandle::try_abort` does.
    ///
    /// The completion still resolves, with `Aborted` when this returns `true`.
    pub async fn cancel(&self) -> errors::Result<bool> {
        let sender = self.manager.upgrade().ok_or(JobError::ManagerStopped)?;
        JobManagerHandle { sender }
            .try_abort(self.job_id.clone())
            .await
    }
}

impl Future for JobCompletion {
    type Output = errors::Result<FinalizedJob>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|finalized| finalized.map_err(|_| JobError::ManagerStopped))
    }
}

/// A `JobManager` which queues submitted jobs, runs them under a concurrency ceiling and
/// reports on them.
///
/// This struct is actually an actor handle, the real work is done in the actor spawned by `JobManagerHandle::spawn`,
/// but from the user perspective all that matters is that this struct provides methods for managing jobs.
/// The actor-handle abstraction allows this struct to be cloned freely in a multi-thread async context,
/// without requiring an `Arc<Mutex>` or any other means of synchronization.
///
/// Dropping every handle stops the manager from taking new requests; jobs already
/// queued or executing still run to completion.
#[derive(Clone)]
pub struct JobManagerHandle {
    sender: mpsc::Sender<ManagerMessage>,
}

impl JobManagerHandle {
    /// Spawn a new manager.
    ///
    /// `config.message_capacity` limits the build-up of inbound messages.
    pub fn spawn(
        config: ManagerConfig,
        writer: Arc<dyn crate::writer::JobWriter>,
        executor: Arc<dyn JobExecutor>,
    ) -> errors::Result<Self> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.message_capacity);
        JobManager::spawn(receiver, config, writer, executor);
        Ok(Self { sender })
    }

    async fn request<T>(
        &self,
        msg: ManagerMessage,
        response: oneshot::Receiver<T>,
    ) -> errors::Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| JobError::ManagerStopped)?;
        response.await.map_err(|_| JobError::ManagerStopped)
    }

    /// Persist and enqueue a job.
    ///
    /// Returns as soon as the job is queued. Invalid requests are rejected before
    /// anything is persisted.
    pub async fn submit(
        &self,
        request: ValidJobRequest,
        listeners: JobEventListeners,
    ) -> errors::Result<(JobId, JobCompletion)> {
        let (tx, rx) = oneshot::channel();
        let msg = Submit {
            request,
            listeners,
            response: tx,
        };
        let (job_id, receiver) = self.request(msg, rx).await??;
        let completion = JobCompletion {
            job_id: job_id.clone(),
            receiver,
            manager: self.sender.downgrade(),
        };
        Ok((job_id, completion))
    }

    /// Abort a queued or executing job.
    ///
    /// Returns `false` if the job is unknown or has already been finalized.
    pub async fn try_abort(&self, job_id: JobId) -> errors::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Abort {
                job_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// `Submitted` while queued or starting, `Running` while executing and `Aborted` while an
    /// aborted job winds down. `None` once finalized or if unknown.
    pub async fn status(&self, job_id: JobId) -> errors::Result<Option<JobStatus>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            GetStatus {
                job_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    pub async fn is_abortable(&self, job_id: JobId) -> errors::Result<bool> {
        Ok(self
            .status(job_id)
            .await?
            .map_or(false, |status| status.is_abortable()))
    }

    /// Live stdout of an executing job, from this point on.
    pub async fn stdout_updates(&self, job_id: JobId) -> errors::Result<Option<OutputStream>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StreamStdout {
                job_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Live stderr of an executing job, from this point on.
    pub async fn stderr_updates(&self, job_id: JobId) -> errors::Result<Option<OutputStream>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StreamStderr {
                job_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Every status change of every job from now on.
    pub async fn job_events(&self) -> errors::Result<mpsc::UnboundedReceiver<JobEvent>> {
        let (subscriber, events) = mpsc::unbounded_channel();
        self.sender
            .send(SubscribeEvents { subscriber })
            .await
            .map_err(|_| JobError::ManagerStopped)?;
        Ok(events)
    }

    pub async fn queue_health(&self) -> errors::Result<QueueHealth> {
        let (tx, rx) = oneshot::channel();
        self.request(GetQueueHealth { response: tx }, rx).await
    }
}
