mod actor;
mod messages;

use crate::listeners::JobEventListeners;
use crate::types::JobId;
use actor::Actor;
use messages::WorkerMessage;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use std::{io, process::Stdio};
use tokio::{
    process,
    sync::{mpsc, oneshot},
};

/// A fully resolved command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Supervises one child process.
///
/// The child runs in its own process group so that stopping it reaches everything it
/// spawned. Its exit code (or `128 + signal`) is reported once the process has been
/// reaped and its stdout/stderr have been forwarded to the listeners. Background
/// processes that keep the output open after the child exits get a short grace
/// window and are then killed with the group; stopping still reaches them meanwhile.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn spawn(
        job_id: JobId,
        command: &CommandLine,
        listeners: JobEventListeners,
        kill_delay: Duration,
    ) -> io::Result<(Self, oneshot::Receiver<io::Result<i32>>)> {
        let child = process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.dir)
            // children that read stdin see EOF instead of blocking forever
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;
        let (sender, inbox) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        Actor::spawn(job_id, inbox, child, listeners, kill_delay, exit_tx);
        Ok((Self { sender }, exit_rx))
    }

    /// Ask the child to terminate: SIGTERM now, SIGKILL once the kill delay has passed.
    pub fn stop(&self) {
        let _ = self.sender.send(WorkerMessage::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputStream;
    use tokio::time::timeout;

    fn sh(script: &str) -> CommandLine {
        CommandLine {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            dir: std::env::temp_dir(),
        }
    }

    async fn collect(mut rx: OutputStream) -> String {
        let mut bytes = vec![];
        while let Some(blob) = rx.recv().await {
            bytes.extend(blob);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn background_processes_do_not_delay_the_exit_report() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_worker, exited) = WorkerHandle::spawn(
            JobId::new("bg"),
            &sh("sleep 20 & echo hi"),
            JobEventListeners::stdout(tx),
            Duration::from_secs(5),
        )
        .unwrap();

        let code = timeout(Duration::from_secs(3), exited).await.unwrap().unwrap().unwrap();
        assert_eq!(code, 0);
        // the stream closes once the leftover sleep has been killed
        assert_eq!(timeout(Duration::from_secs(3), collect(rx)).await.unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn stop_reaches_the_group_after_the_child_has_exited() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (worker, exited) = WorkerHandle::spawn(
            JobId::new("bg-stop"),
            &sh("sleep 20 & echo started"),
            JobEventListeners::stdout(tx),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "started\n");
        worker.stop();
        let code = timeout(Duration::from_secs(3), exited).await.unwrap().unwrap().unwrap();
        assert!(code == 0 || code == 143);
        assert_eq!(timeout(Duration::from_secs(3), rx.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stop_terminates_a_running_process() {
        let (worker, exited) = WorkerHandle::spawn(
            JobId::new("sleeper"),
            &sh("exec sleep 20"),
            JobEventListeners::none(),
            Duration::from_secs(5),
        )
        .unwrap();
        worker.stop();
        let code = timeout(Duration::from_secs(3), exited).await.unwrap().unwrap().unwrap();
        assert_eq!(code, 143);
    }
}
