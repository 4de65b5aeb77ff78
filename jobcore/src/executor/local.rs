use super::{dependencies, outputs, JobExecutor};
use crate::actors::worker::{CommandLine, WorkerHandle};
use crate::cancelable::{cancelable, CancelableFuture, Completer};
use crate::config::ExecutorConfig;
use crate::errors::{JobError, Result};
use crate::events::JobStatus;
use crate::listeners::JobEventListeners;
use crate::mime::{MagicSniffer, MimeSniffer};
use crate::outputs::JobExecutionResult;
use crate::request::PersistedJob;
use crate::template::{JobEnvironment, RawTemplateString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Executes a job as a local subprocess inside its own working directory.
pub struct LocalJobExecutor {
    working_dirs: PathBuf,
    kill_delay: Duration,
    remove_after_execution: bool,
    sniffer: Arc<dyn MimeSniffer>,
}

impl LocalJobExecutor {
    /// Fails if the working directory root does not exist.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            working_dirs: fs::canonicalize(&config.working_dirs)?,
            kill_delay: config.kill_delay(),
            remove_after_execution: config.remove_after_execution,
            sniffer: Arc::new(MagicSniffer),
        })
    }

    pub fn with_sniffer(mut self, sniffer: impl MimeSniffer + 'static) -> Self {
        self.sniffer = Arc::new(sniffer);
        self
    }

    pub fn working_dirs(&self) -> &Path {
        &self.working_dirs
    }

    fn prepare(&self, job: &PersistedJob, working_dir: &Path) -> Result<CommandLine> {
        let execution = &job.spec().execution;
        let env = JobEnvironment::new(job, working_dir);

        for dependency in &execution.dependencies {
            dependencies::materialize(&env, working_dir, dependency)?;
        }

        debug!(job_id = %job.id, "resolving args");
        let program = RawTemplateString::new(execution.application.as_str()).evaluate(&env)?;
        let args = execution
            .arguments
            .iter()
            .map(|arg| arg.evaluate(&env))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CommandLine {
            program,
            args,
            dir: working_dir.to_path_buf(),
        })
    }

    fn launch(
        &self,
        job: &PersistedJob,
        working_dir: &Path,
        listeners: JobEventListeners,
    ) -> Result<(WorkerHandle, oneshot::Receiver<io::Result<i32>>)> {
        let command = self.prepare(job, working_dir)?;

        debug!(job_id = %job.id, %command, "launch subprocess");
        let launched = WorkerHandle::spawn(job.id.clone(), &command, listeners, self.kill_delay)
            .map_err(|source| JobError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        info!(job_id = %job.id, %command, "launched");
        Ok(launched)
    }
}

impl JobExecutor for LocalJobExecutor {
    fn execute(
        &self,
        job: &PersistedJob,
        listeners: JobEventListeners,
    ) -> Result<CancelableFuture<JobExecutionResult>> {
        let working_dir = self.working_dirs.join(job.id.as_str());
        fs::create_dir(&working_dir).map_err(|source| JobError::WorkingDirectory {
            path: working_dir.clone(),
            source,
        })?;
        debug!(job_id = %job.id, working_dir = %working_dir.display(), "created working directory");

        let (worker, exited) = match self.launch(job, &working_dir, listeners) {
            Ok(launched) => launched,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "cannot start");
                if self.remove_after_execution {
                    if let Err(e) = fs::remove_dir_all(&working_dir) {
                        warn!(working_dir = %working_dir.display(), error = %e, "tried to remove a working directory but couldn't");
                    }
                }
                return Err(e);
            }
        };

        let (completer, future) = cancelable(move || worker.stop());
        tokio::spawn(on_process_exit(
            job.clone(),
            working_dir,
            exited,
            completer,
            self.sniffer.clone(),
            self.remove_after_execution,
        ));
        Ok(future)
    }
}

async fn on_process_exit(
    job: PersistedJob,
    working_dir: PathBuf,
    exited: oneshot::Receiver<io::Result<i32>>,
    completer: Completer<JobExecutionResult>,
    sniffer: Arc<dyn MimeSniffer>,
    remove_after_execution: bool,
) {
    let exit_status = match exited.await {
        Ok(Ok(code)) => JobStatus::from_exit_code(code),
        Ok(Err(e)) => {
            error!(job_id = %job.id, error = %e, "lost track of process");
            JobStatus::FatalError
        }
        Err(_) => {
            error!(job_id = %job.id, "process supervisor exited without reporting");
            JobStatus::FatalError
        }
    };

    let result = if exit_status == JobStatus::Finished && !completer.is_canceled() {
        let job_id = job.id.clone();
        let dir = working_dir.clone();
        match tokio::task::spawn_blocking(move || {
            outputs::resolve_outputs(&job, &dir, sniffer.as_ref())
        })
        .await
        {
            Ok(outputs) => JobExecutionResult::new(exit_status, outputs),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "output resolution failed");
                JobExecutionResult::from_status(JobStatus::FatalError)
            }
        }
    } else {
        JobExecutionResult::from_status(exit_status)
    };

    completer.complete(result);

    if remove_after_execution {
        if let Err(e) = tokio::fs::remove_dir_all(&working_dir).await {
            warn!(working_dir = %working_dir.display(), error = %e, "tried to remove a working directory but couldn't");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancelable::Canceled;
    use crate::outputs::JobOutputResult;
    use crate::request::{JobInput, ValidJobRequest};
    use crate::specs::{ExecutionConfiguration, JobDependencyConfiguration, JobExpectedOutput, JobSpec};
    use crate::types::{JobId, OutputStream};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const KILL_DELAY: Duration = Duration::from_millis(200);
    const PATIENCE: Duration = Duration::from_secs(10);

    fn executor(root: &TempDir) -> LocalJobExecutor {
        LocalJobExecutor::new(ExecutorConfig::new(root.path()).with_kill_delay(KILL_DELAY)).unwrap()
    }

    fn job(spec: JobSpec) -> PersistedJob {
        PersistedJob::new(JobId::generate(), ValidJobRequest::new("tester", "test", spec))
    }

    fn command(app: &str, args: &[&str]) -> JobSpec {
        JobSpec::new(ExecutionConfiguration::new(app, args.iter().copied()))
    }

    fn sh(script: &str) -> JobSpec {
        command("sh", &["-c", script])
    }

    fn capture() -> (JobEventListeners, OutputStream, OutputStream) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        (JobEventListeners::new(out_tx, err_tx), out_rx, err_rx)
    }

    async fn collect(mut rx: OutputStream) -> String {
        let mut bytes = vec![];
        while let Some(blob) = rx.recv().await {
            bytes.extend(blob);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    async fn run(executor: &LocalJobExecutor, job: &PersistedJob) -> (JobExecutionResult, String, String) {
        let (listeners, out, err) = capture();
        let future = executor.execute(job, listeners).unwrap();
        let result = timeout(PATIENCE, future).await.unwrap().unwrap();
        (result, collect(out).await, collect(err).await)
    }

    #[tokio::test]
    async fn echo_streams_stdout_and_finishes() {
        let root = TempDir::new().unwrap();
        let (result, stdout, _) = run(&executor(&root), &job(command("echo", &["hello"]))).await;
        assert_eq!(result.final_status, JobStatus::Finished);
        assert_eq!(stdout, "hello\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal_and_skips_outputs() {
        let root = TempDir::new().unwrap();
        let exec = executor(&root);

        let (result, _, stderr) = run(&exec, &job(command("cat", &["does-not-exist"]))).await;
        assert_eq!(result.final_status, JobStatus::FatalError);
        assert!(!stderr.is_empty());

        let spec = sh("printf abc > out.txt; exit 3")
            .with_expected_output(JobExpectedOutput::new("out", "out.txt").required());
        let (result, _, _) = run(&exec, &job(spec)).await;
        assert_eq!(result.final_status, JobStatus::FatalError);
        assert!(result.outputs.is_empty());
    }

    #[tokio::test]
    async fn stdin_is_closed() {
        let root = TempDir::new().unwrap();
        let (result, stdout, _) = run(&executor(&root), &job(command("cat", &[]))).await;
        assert_eq!(result.final_status, JobStatus::Finished);
        assert_eq!(stdout, "");
    }

    #[tokio::test]
    async fn arguments_are_templated() {
        let root = TempDir::new().unwrap();
        let job = job(command("echo", &["${inputs.msg}", "${request.owner}"]));
        let mut job = job;
        job.request = job
            .request
            .clone()
            .with_input("msg", JobInput::String("templated".into()));
        let (result, stdout, _) = run(&executor(&root), &job).await;
        assert_eq!(result.final_status, JobStatus::Finished);
        assert_eq!(stdout, "templated tester\n");
    }

    #[tokio::test]
    async fn outputs_are_resolved_in_declaration_order() {
        let root = TempDir::new().unwrap();
        let spec = sh("printf abc > out.txt; printf '{}' > data.json")
            .with_expected_output(
                JobExpectedOutput::new("out", "out.txt").with_mime_type("text/x-custom"),
            )
            .with_expected_output(JobExpectedOutput::new("${request.name}-data", "data.json"))
            .with_expected_output(JobExpectedOutput::new("optional", "optional.txt"))
            .with_expected_output(JobExpectedOutput::new("needed", "needed.txt").required());

        let (result, _, _) = run(&executor(&root), &job(spec)).await;
        assert_eq!(result.final_status, JobStatus::Finished);
        assert_eq!(result.outputs.len(), 4);

        match &result.outputs[0] {
            JobOutputResult::Present(output) => {
                assert_eq!(output.id.as_str(), "out");
                assert_eq!(output.size(), 3);
                assert_eq!(output.mime_type, "text/x-custom");
            }
            other => panic!("expected out.txt to be present, got {:?}", other),
        }
        match &result.outputs[1] {
            JobOutputResult::Present(output) => {
                assert_eq!(output.id.as_str(), "test-data");
                assert_eq!(output.mime_type, "application/json");
            }
            other => panic!("expected data.json to be present, got {:?}", other),
        }
        assert!(matches!(
            &result.outputs[2],
            JobOutputResult::Missing(missing) if !missing.required && missing.expected_location == "optional.txt"
        ));
        assert!(matches!(
            &result.outputs[3],
            JobOutputResult::Missing(missing) if missing.required && missing.id.as_str() == "needed"
        ));
    }

    #[tokio::test]
    async fn dependencies_are_copied_or_linked() {
        let root = TempDir::new().unwrap();
        let deps = TempDir::new().unwrap();
        let source = deps.path().join("dep.txt");
        fs::write(&source, "dependency").unwrap();
        let source = source.display().to_string();

        let mut spec = command("cat", &["copied.txt", "linked.txt"]);
        spec.execution = spec
            .execution
            .with_dependency(JobDependencyConfiguration::copy(source.as_str(), "copied.txt"))
            .with_dependency(JobDependencyConfiguration::soft_link(source.as_str(), "linked.txt"));
        let job = job(spec);

        let exec = executor(&root);
        let (result, stdout, _) = run(&exec, &job).await;
        assert_eq!(result.final_status, JobStatus::Finished);
        assert_eq!(stdout, "dependencydependency");

        let wd = exec.working_dirs().join(job.id.as_str());
        assert!(fs::symlink_metadata(wd.join("linked.txt")).unwrap().file_type().is_symlink());
        assert!(fs::symlink_metadata(wd.join("copied.txt")).unwrap().is_file());
    }

    #[tokio::test]
    async fn missing_copy_dependency_fails_before_launch() {
        let root = TempDir::new().unwrap();
        let mut spec = command("true", &[]);
        spec.execution = spec
            .execution
            .with_dependency(JobDependencyConfiguration::copy("/no/such/dependency", "dep"));
        let result = executor(&root).execute(&job(spec), JobEventListeners::none());
        assert!(matches!(result, Err(JobError::Dependency { .. })));
    }

    #[tokio::test]
    async fn cancel_terminates_the_process() {
        let root = TempDir::new().unwrap();
        let future = executor(&root)
            .execute(&job(command("sleep", &["100"])), JobEventListeners::none())
            .unwrap();
        assert!(future.cancel());
        assert!(!future.cancel());
        let outcome = timeout(Duration::from_secs(2), future).await.unwrap();
        assert_eq!(outcome, Err(Canceled));
    }

    #[tokio::test]
    async fn processes_ignoring_sigterm_are_killed() {
        let root = TempDir::new().unwrap();
        let future = executor(&root)
            .execute(&job(sh("trap '' TERM; sleep 100")), JobEventListeners::none())
            .unwrap();
        // give the shell a moment to install its trap
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(future.cancel());
        let outcome = timeout(KILL_DELAY + Duration::from_secs(2), future).await.unwrap();
        assert_eq!(outcome, Err(Canceled));
    }

    #[tokio::test]
    async fn launch_failures_are_errors_not_results() {
        let root = TempDir::new().unwrap();
        let exec = executor(&root);
        let result = exec.execute(
            &job(command("definitely-not-a-real-program", &[])),
            JobEventListeners::none(),
        );
        assert!(matches!(result, Err(JobError::Spawn { .. })));

        let job = job(command("true", &[]));
        fs::create_dir(exec.working_dirs().join(job.id.as_str())).unwrap();
        let result = exec.execute(&job, JobEventListeners::none());
        assert!(matches!(result, Err(JobError::WorkingDirectory { .. })));
    }

    #[tokio::test]
    async fn working_dir_is_removed_after_execution_when_configured() {
        let root = TempDir::new().unwrap();
        let exec = LocalJobExecutor::new(
            ExecutorConfig::new(root.path()).with_remove_after_execution(true),
        )
        .unwrap();
        let spec = sh("printf abc > out.txt")
            .with_expected_output(JobExpectedOutput::new("out", "out.txt").required());
        let job = job(spec);
        let (result, _, _) = run(&exec, &job).await;
        assert!(matches!(result.outputs[0], JobOutputResult::Present(_)));

        let wd = exec.working_dirs().join(job.id.as_str());
        timeout(PATIENCE, async {
            while wd.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failed_launches_leave_no_working_dir_when_configured() {
        let root = TempDir::new().unwrap();
        let exec = LocalJobExecutor::new(
            ExecutorConfig::new(root.path()).with_remove_after_execution(true),
        )
        .unwrap();

        let unlaunchable = job(command("definitely-not-a-real-program", &[]));
        let result = exec.execute(&unlaunchable, JobEventListeners::none());
        assert!(matches!(result, Err(JobError::Spawn { .. })));
        assert!(!exec.working_dirs().join(unlaunchable.id.as_str()).exists());

        let mut spec = command("true", &[]);
        spec.execution = spec
            .execution
            .with_dependency(JobDependencyConfiguration::copy("/no/such/dependency", "dep"));
        let unprepared = job(spec);
        let result = exec.execute(&unprepared, JobEventListeners::none());
        assert!(matches!(result, Err(JobError::Dependency { .. })));
        assert!(!exec.working_dirs().join(unprepared.id.as_str()).exists());
    }

    #[tokio::test]
    async fn failed_launches_keep_their_working_dir_by_default() {
        let root = TempDir::new().unwrap();
        let exec = executor(&root);
        let unlaunchable = job(command("definitely-not-a-real-program", &[]));
        assert!(exec.execute(&unlaunchable, JobEventListeners::none()).is_err());
        assert!(exec.working_dirs().join(unlaunchable.id.as_str()).is_dir());
    }

    #[tokio::test]
    async fn background_processes_do_not_hold_the_result() {
        let root = TempDir::new().unwrap();
        let (result, stdout, _) = timeout(
            Duration::from_secs(3),
            run(&executor(&root), &job(sh("sleep 20 & echo hi"))),
        )
        .await
        .expect("background process held the job open");
        assert_eq!(result.final_status, JobStatus::Finished);
        assert_eq!(stdout, "hi\n");
    }

    #[tokio::test]
    async fn cancel_reaches_background_processes() {
        let root = TempDir::new().unwrap();
        let (listeners, mut out, _err) = capture();
        let future = executor(&root)
            .execute(&job(sh("sleep 20 & echo started")), listeners)
            .unwrap();
        assert_eq!(out.recv().await.unwrap(), "started\n");

        // the shell may already be gone, cancelling still stops the job
        assert!(future.cancel());
        let outcome = timeout(Duration::from_secs(3), future).await.unwrap();
        assert_eq!(outcome, Err(Canceled));
        assert_eq!(timeout(Duration::from_secs(3), out.recv()).await.unwrap(), None);
    }

    /// Labels everything the same way.
    struct FixedSniffer;

    impl MimeSniffer for FixedSniffer {
        fn sniff(&self, _head: &[u8], _filename: &str) -> String {
            "application/x-fixed".to_string()
        }
    }

    #[tokio::test]
    async fn custom_sniffers_label_undeclared_mime_types() {
        let root = TempDir::new().unwrap();
        let exec = executor(&root).with_sniffer(FixedSniffer);
        let spec = sh("printf abc > out.txt; printf abc > declared.txt")
            .with_expected_output(JobExpectedOutput::new("out", "out.txt"))
            .with_expected_output(
                JobExpectedOutput::new("declared", "declared.txt").with_mime_type("text/plain"),
            );
        let (result, _, _) = run(&exec, &job(spec)).await;

        let mime_types: Vec<_> = result
            .outputs
            .iter()
            .map(|output| match output {
                JobOutputResult::Present(output) => output.mime_type.as_str(),
                JobOutputResult::Missing(_) => panic!("{} is missing", output.id()),
            })
            .collect();
        assert_eq!(mime_types, ["application/x-fixed", "text/plain"]);
    }

    #[test]
    fn missing_root_is_rejected() {
        let result = LocalJobExecutor::new(ExecutorConfig::new("/no/such/root"));
        assert!(matches!(result, Err(JobError::Config(_))));
    }
}
