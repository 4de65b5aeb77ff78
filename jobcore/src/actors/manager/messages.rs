use super::FinalizedJob;
use crate::errors;
use crate::events::{JobEvent, JobStatus};
use crate::health::QueueHealth;
use crate::listeners::JobEventListeners;
use crate::request::ValidJobRequest;
use crate::types::{JobId, OutputStream};
use tokio::sync::{mpsc, oneshot};

pub type Submitted = (JobId, oneshot::Receiver<FinalizedJob>);

#[derive(Debug)]
pub enum ManagerMessage {
    Submit {
        request: ValidJobRequest,
        listeners: JobEventListeners,
        response: oneshot::Sender<errors::Result<Submitted>>,
    },
    Abort {
        job_id: JobId,
        response: oneshot::Sender<bool>,
    },
    GetStatus {
        job_id: JobId,
        response: oneshot::Sender<Option<JobStatus>>,
    },
    StreamStdout {
        job_id: JobId,
        response: oneshot::Sender<Option<OutputStream>>,
    },
    StreamStderr {
        job_id: JobId,
        response: oneshot::Sender<Option<OutputStream>>,
    },
    SubscribeEvents {
        subscriber: mpsc::UnboundedSender<JobEvent>,
    },
    QueueHealth {
        response: oneshot::Sender<QueueHealth>,
    },
}
