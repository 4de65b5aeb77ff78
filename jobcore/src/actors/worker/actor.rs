use super::messages::WorkerMessage;
use crate::listeners::JobEventListeners;
use crate::types::{JobId, OutputSender};

use bytes::BytesMut;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Sleep},
};
use tracing::{debug, warn};

/// How long output may stay open after the process itself has exited. Background
/// processes still holding stdout/stderr past this are killed with the group.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Actor {
    job_id: JobId,
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    inbox_open: bool,
    child: Child,
    /// Recorded at spawn; the group outlives the reaped child while background processes remain.
    pgid: Option<Pid>,
    pumps: Vec<JoinHandle<()>>,
    kill_delay: Duration,
    kill_deadline: Option<Pin<Box<Sleep>>>,
}

impl Actor {
    pub fn spawn(
        job_id: JobId,
        inbox: mpsc::UnboundedReceiver<WorkerMessage>,
        mut child: Child,
        listeners: JobEventListeners,
        kill_delay: Duration,
        exit_tx: oneshot::Sender<io::Result<i32>>,
    ) {
        // grab stdout and stderr before anything else can touch the child
        let pumps: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|out| pump(out, listeners.stdout)),
            child.stderr.take().map(|err| pump(err, listeners.stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let actor = Self {
            job_id,
            inbox,
            inbox_open: true,
            pgid: child.id().map(|pid| Pid::from_raw(pid as i32)),
            child,
            pumps,
            kill_delay,
            kill_deadline: None,
        };
        tokio::spawn(async move {
            let exit = actor.run().await;
            let _ = exit_tx.send(exit);
        });
    }

    async fn run(mut self) -> io::Result<i32> {
        let exit = self.supervise().await.map(exit_code);
        if let Ok(code) = &exit {
            debug!(job_id = %self.job_id, code, "process exited");
        }
        // the result is only reported once output is forwarded or the drain window has passed
        self.drain().await;
        exit
    }

    /// Run until the direct child has been reaped.
    async fn supervise(&mut self) -> io::Result<ExitStatus> {
        loop {
            select! {
                maybe_msg = self.inbox.recv(), if self.inbox_open => {
                    match maybe_msg {
                        Some(WorkerMessage::Stop) => self.terminate(),
                        None => {
                            // handle dropped without a result, make sure the child does not outlive us
                            self.inbox_open = false;
                            if self.kill_deadline.is_none() {
                                self.force_kill();
                            }
                        }
                    }
                }
                _ = expire(&mut self.kill_deadline) => {
                    warn!(job_id = %self.job_id, delay = ?self.kill_delay, "process did not stop in time, killing it forcibly (SIGKILL)");
                    self.kill_deadline = None;
                    self.force_kill();
                }
                status = self.child.wait() => return status,
            }
        }
    }

    /// Wait for the pumps to hit EOF, at most `OUTPUT_DRAIN_TIMEOUT`. Stop requests
    /// keep reaching the process group meanwhile.
    async fn drain(&mut self) {
        let mut pumps = std::mem::take(&mut self.pumps);
        let drained = {
            let all_done = async {
                for pump in pumps.iter_mut() {
                    let _ = pump.await;
                }
            };
            tokio::pin!(all_done);
            let deadline = time::sleep(OUTPUT_DRAIN_TIMEOUT);
            tokio::pin!(deadline);
            loop {
                select! {
                    _ = &mut all_done => break true,
                    maybe_msg = self.inbox.recv(), if self.inbox_open => {
                        match maybe_msg {
                            Some(WorkerMessage::Stop) => {
                                debug!(job_id = %self.job_id, "stopping leftover processes (SIGTERM)");
                                self.signal(Signal::SIGTERM);
                            }
                            None => self.inbox_open = false,
                        }
                    }
                    _ = &mut deadline => break false,
                }
            }
        };
        if !drained {
            warn!(job_id = %self.job_id, "background processes still hold the output open, killing the process group (SIGKILL)");
            self.signal(Signal::SIGKILL);
            for pump in &pumps {
                pump.abort();
            }
        }
    }

    fn terminate(&mut self) {
        if self.kill_deadline.is_some() {
            return;
        }
        debug!(job_id = %self.job_id, "stopping process (SIGTERM)");
        if !self.signal(Signal::SIGTERM) {
            self.force_kill();
            return;
        }
        self.kill_deadline = Some(Box::pin(time::sleep(self.kill_delay)));
    }

    fn force_kill(&mut self) {
        if !self.signal(Signal::SIGKILL) {
            // no process group to signal, fall back to the child itself
            let _ = self.child.start_kill();
        }
    }

    /// Signal the child's process group. Returns false if it could not be signalled.
    fn signal(&self, signal: Signal) -> bool {
        let pgid = match self.pgid {
            Some(pgid) => pgid,
            None => return false,
        };
        match killpg(pgid, signal) {
            Ok(()) => true,
            Err(e) => {
                debug!(job_id = %self.job_id, signal = ?signal, error = %e, "could not signal process group");
                false
            }
        }
    }
}

async fn expire(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Exit code, or `128 + signal` for a process terminated by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

fn pump<R>(mut reader: R, listener: Option<OutputSender>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match reader.read_buf(&mut buf).await {
                Ok(n) if n > 0 => {
                    // move the bytes out of buf and into a message
                    let blob = buf.split().freeze();
                    if let Some(tx) = &listener {
                        // keep draining even if nobody is listening so the child never blocks
                        let _ = tx.send(blob);
                    }
                    buf.reserve(4096);
                }
                _ => break,
            }
        }
    })
}
