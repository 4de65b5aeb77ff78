use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub type OutputBlob = bytes::Bytes;

/// Sending half of a stdout/stderr byte stream. Dropping every sender completes the stream.
pub type OutputSender = mpsc::UnboundedSender<OutputBlob>;
/// Receiving half of a stdout/stderr byte stream. Yields `None` once the stream is complete.
pub type OutputStream = mpsc::UnboundedReceiver<OutputBlob>;

/// Opaque job identifier, assigned when a request is persisted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn generate() -> Self {
        // simple form keeps ids usable as directory names
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an output produced by a job, resolved from the job spec's templated id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOutputId(String);

impl JobOutputId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobOutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
