use crate::errors::{JobError, Result};
use crate::specs::JobSpec;
use crate::types::JobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file supplied as a job input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub filename: String,
    pub data: Vec<u8>,
}

impl FileInput {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

/// A resolved value for one of a spec's expected inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum JobInput {
    String(String),
    StringArray(Vec<String>),
    File(FileInput),
    FileArray(Vec<FileInput>),
    /// Anything else (numbers, booleans, selections), kept as plain JSON.
    Json(serde_json::Value),
}

/// A request that has passed validation against its spec but has no id yet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidJobRequest {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, JobInput>,
    pub spec: JobSpec,
}

impl ValidJobRequest {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            inputs: BTreeMap::new(),
            spec,
        }
    }

    pub fn with_input(mut self, id: impl Into<String>, input: JobInput) -> Self {
        self.inputs.insert(id.into(), input);
        self
    }

    /// Structural checks that must hold before a request is accepted.
    pub fn validate(&self) -> Result<()> {
        if self.spec.execution.application.trim().is_empty() {
            return Err(JobError::InvalidRequest(
                "execution.application must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A request after the writer has assigned it an id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub id: JobId,
    #[serde(flatten)]
    pub request: ValidJobRequest,
}

impl PersistedJob {
    pub fn new(id: JobId, request: ValidJobRequest) -> Self {
        Self { id, request }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.request.spec
    }

    pub fn inputs(&self) -> &BTreeMap<String, JobInput> {
        &self.request.inputs
    }
}
