//! Immutable job specifications: what to run, what it needs, and what it produces.

pub use crate::template::RawTemplateString;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub execution: ExecutionConfiguration,
    #[serde(default)]
    pub expected_outputs: Vec<JobExpectedOutput>,
}

impl JobSpec {
    pub fn new(execution: ExecutionConfiguration) -> Self {
        Self {
            execution,
            ..Self::default()
        }
    }

    pub fn with_expected_output(mut self, output: JobExpectedOutput) -> Self {
        self.expected_outputs.push(output);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfiguration {
    pub application: String,
    #[serde(default)]
    pub arguments: Vec<RawTemplateString>,
    #[serde(default)]
    pub dependencies: Vec<JobDependencyConfiguration>,
}

impl ExecutionConfiguration {
    pub fn new<I, S>(application: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            application: application.into(),
            arguments: arguments
                .into_iter()
                .map(|arg| RawTemplateString::new(arg))
                .collect(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: JobDependencyConfiguration) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// A file or directory made available in the job's working directory before launch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDependencyConfiguration {
    pub source: RawTemplateString,
    /// Resolved relative to the job's working directory.
    pub target: RawTemplateString,
    #[serde(default)]
    pub soft_link: bool,
}

impl JobDependencyConfiguration {
    pub fn copy(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: RawTemplateString::new(source),
            target: RawTemplateString::new(target),
            soft_link: false,
        }
    }

    pub fn soft_link(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            soft_link: true,
            ..Self::copy(source, target)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExpectedOutput {
    pub id: RawTemplateString,
    /// Resolved relative to the job's working directory.
    pub path: RawTemplateString,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub required: bool,
}

impl JobExpectedOutput {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: RawTemplateString::new(id),
            path: RawTemplateString::new(path),
            mime_type: None,
            name: None,
            description: None,
            metadata: BTreeMap::new(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
