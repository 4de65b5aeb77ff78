//! Core of a job server: a queueing job manager that runs declaratively specified
//! jobs as local subprocesses under a concurrency ceiling, streams their
//! stdout/stderr to live listeners and a durable writer, and reconciles the files
//! they leave behind into typed outputs.

mod actors;
pub mod cancelable;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod health;
pub mod listeners;
pub mod mime;
pub mod outputs;
pub mod request;
pub mod specs;
pub mod template;
pub mod types;
pub mod writer;

// re-export the job manager handle as if it is the job manager itself.
pub use actors::manager::JobManagerHandle as JobManager;
pub use actors::manager::{FinalizedJob, JobCompletion};
pub use config::{ExecutorConfig, ManagerConfig};
pub use errors::{JobError, Result};
pub use events::{JobEvent, JobStatus, JobTimestamp};
pub use executor::{JobExecutor, LocalJobExecutor};
pub use health::QueueHealth;
pub use listeners::JobEventListeners;
pub use request::{JobInput, PersistedJob, ValidJobRequest};
pub use specs::JobSpec;
pub use types::JobId;
pub use writer::{InMemoryJobWriter, JobWriter};
