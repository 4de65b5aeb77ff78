use crate::template::TemplateError;
use std::{io, path::PathBuf, result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job request: {0}")]
    InvalidRequest(String),
    #[error("could not persist job request: {0}")]
    Persistence(String),
    #[error("{}: cannot create working directory: {source}", path.display())]
    WorkingDirectory { path: PathBuf, source: io::Error },
    #[error("{}: cannot copy dependency: {source}", path.display())]
    Dependency { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{program}: cannot launch: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("job manager has stopped")]
    ManagerStopped,
}

pub type Result<T> = result::Result<T, JobError>;
