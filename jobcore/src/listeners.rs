use crate::types::OutputSender;

/// Live subscribers for a job's stdout and stderr.
///
/// A listener receives every chunk in the order the process produced it, and its
/// channel closes when the stream completes. A listener whose receiver has been
/// dropped is silently unsubscribed.
#[derive(Clone, Debug, Default)]
pub struct JobEventListeners {
    pub stdout: Option<OutputSender>,
    pub stderr: Option<OutputSender>,
}

impl JobEventListeners {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(stdout: OutputSender, stderr: OutputSender) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
        }
    }

    pub fn stdout(stdout: OutputSender) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: None,
        }
    }

    pub fn stderr(stderr: OutputSender) -> Self {
        Self {
            stdout: None,
            stderr: Some(stderr),
        }
    }
}
