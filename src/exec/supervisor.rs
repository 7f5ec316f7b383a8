// src/exec/supervisor.rs

//! Spawns job processes and watches them until they exit.
//!
//! Each process runs through the platform shell in its own process group.
//! Stdout and stderr are read line by line and forwarded as
//! [`ProcessEvent::Output`] while the process runs. Readers stay attached
//! through the termination grace period. Once the process has exited each
//! reader keeps going until its pipe reaches EOF or stays silent for
//! `drain_timeout` (grandchildren may hold the pipes open), and only then is
//! [`ProcessEvent::Exited`] sent. Lines already read are never dropped: a
//! reader waiting on a full event channel is always awaited.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::errors::{JobdagError, Result};
use crate::exec::registry::{ProcessHandle, ProcessRegistry, Reservation};
use crate::exec::signal::{send_signal, TerminationSignal};
use crate::exec::{ProcessEvent, ProcessExit};
use crate::types::{JobId, OutputStream};

/// How long a pipe may stay silent after the process exited before its
/// reader gives up on it.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// First signal of the termination protocol and how long to wait before
/// escalating to SIGKILL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub signal: TerminationSignal,
    pub grace: Duration,
}

impl TerminationPolicy {
    pub fn terminate(grace: Duration) -> Self {
        Self {
            signal: TerminationSignal::Terminate,
            grace,
        }
    }

    pub fn interrupt(grace: Duration) -> Self {
        Self {
            signal: TerminationSignal::Interrupt,
            grace,
        }
    }
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self::terminate(Duration::from_secs(2))
    }
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    registry: Arc<ProcessRegistry>,
    events: mpsc::Sender<ProcessEvent>,
    drain_timeout: Duration,
}

impl Supervisor {
    pub fn new(registry: Arc<ProcessRegistry>, events: mpsc::Sender<ProcessEvent>) -> Self {
        Self {
            registry,
            events,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Reserve the job's slot and spawn `command_line` in one step.
    pub fn start(
        &self,
        job_id: &str,
        command_line: &str,
        working_directory: &Path,
        policy: TerminationPolicy,
    ) -> Result<u64> {
        let reservation = self.registry.reserve(job_id)?;
        self.launch(reservation, command_line, working_directory, policy)
    }

    /// Spawn `command_line` for an already reserved slot.
    ///
    /// Fails before spawning if `working_directory` does not exist. On any
    /// failure the reservation is dropped and the slot freed.
    pub fn launch(
        &self,
        reservation: Reservation,
        command_line: &str,
        working_directory: &Path,
        policy: TerminationPolicy,
    ) -> Result<u64> {
        if !working_directory.is_dir() {
            return Err(JobdagError::Validation(format!(
                "working directory does not exist: {}",
                working_directory.display()
            )));
        }

        let job_id = reservation.job_id().to_string();
        let run_id = reservation.run_id();

        let mut cmd = shell_command(command_line);
        cmd.current_dir(working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| JobdagError::ProcessStart(format!("{command_line}: {e}")))?;
        let pid = child.id();

        info!(
            job = %job_id,
            run_id,
            pid = ?pid,
            cmd = %command_line,
            cwd = %working_directory.display(),
            "started job process"
        );

        let (exited_tx, exited_rx) = watch::channel(false);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(
                stdout,
                ReaderCtx {
                    stream: OutputStream::Stdout,
                    job_id: job_id.clone(),
                    run_id,
                    events: self.events.clone(),
                    exited: exited_rx.clone(),
                    idle_timeout: self.drain_timeout,
                },
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                stderr,
                ReaderCtx {
                    stream: OutputStream::Stderr,
                    job_id: job_id.clone(),
                    run_id,
                    events: self.events.clone(),
                    exited: exited_rx,
                    idle_timeout: self.drain_timeout,
                },
            ));
        }

        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let handle = ProcessHandle::new(run_id, pid, command_line, stop_tx);
        let reaped = handle.exit_flag();
        self.registry.attach(reservation, handle);

        tokio::spawn(supervise(Supervised {
            job_id,
            run_id,
            child,
            pid,
            stop_rx,
            policy,
            readers,
            exited_tx,
            reaped,
            events: self.events.clone(),
        }));

        Ok(run_id)
    }

    /// Request termination of the job's process. `false` when nothing is
    /// running for it.
    pub fn stop(&self, job_id: &str) -> bool {
        let sent = self.registry.request_stop(job_id);
        debug!(job = %job_id, sent, "stop requested");
        sent
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.registry.is_running(job_id)
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    }
}

struct ReaderCtx {
    stream: OutputStream,
    job_id: JobId,
    run_id: u64,
    events: mpsc::Sender<ProcessEvent>,
    /// Flips to `true` once the process has been reaped.
    exited: watch::Receiver<bool>,
    idle_timeout: Duration,
}

fn spawn_reader<R>(pipe: R, ctx: ReaderCtx) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let ReaderCtx {
        stream,
        job_id,
        run_id,
        events,
        mut exited,
        idle_timeout,
    } = ctx;

    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        let mut after_exit = *exited.borrow();
        loop {
            // A cancelled read keeps its partial line in `buf`.
            let read = if after_exit {
                match tokio::time::timeout(idle_timeout, reader.read_until(b'\n', &mut buf))
                    .await
                {
                    Ok(res) => res,
                    Err(_) => {
                        debug!(job = %job_id, %stream, "pipe still open after exit; detaching reader");
                        break;
                    }
                }
            } else {
                tokio::select! {
                    res = reader.read_until(b'\n', &mut buf) => res,
                    _ = exited.changed() => {
                        after_exit = true;
                        continue;
                    }
                }
            };

            match read {
                Ok(0) => break,
                Ok(_) => {
                    let event = ProcessEvent::Output {
                        job_id: job_id.clone(),
                        run_id,
                        stream,
                        content: decode_line(&buf),
                    };
                    buf.clear();
                    if events.send(event).await.is_err() {
                        debug!(job = %job_id, %stream, "event channel closed; reader stopping");
                        break;
                    }
                }
                Err(e) => {
                    warn!(job = %job_id, %stream, error = %e, "error reading process output");
                    break;
                }
            }
        }
        debug!(job = %job_id, run_id, %stream, "output reader ended");
    })
}

/// Strip the line terminator and decode lossily.
fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

struct Supervised {
    job_id: JobId,
    run_id: u64,
    child: Child,
    pid: Option<u32>,
    stop_rx: mpsc::UnboundedReceiver<()>,
    policy: TerminationPolicy,
    readers: Vec<JoinHandle<()>>,
    exited_tx: watch::Sender<bool>,
    reaped: Arc<AtomicBool>,
    events: mpsc::Sender<ProcessEvent>,
}

async fn supervise(mut s: Supervised) {
    let mut stop_requested = false;
    let mut stop_channel_open = true;
    let mut kill_deadline: Option<Instant> = None;

    let status = loop {
        tokio::select! {
            res = s.child.wait() => break res,

            req = s.stop_rx.recv(), if stop_channel_open => match req {
                Some(()) if !stop_requested => {
                    stop_requested = true;
                    let first = s.policy.signal;
                    info!(
                        job = %s.job_id,
                        signal = %s.policy.signal,
                        grace_ms = s.policy.grace.as_millis() as u64,
                        "stopping job process"
                    );
                    signal(&mut s, first);
                    kill_deadline = Some(Instant::now() + s.policy.grace);
                }
                Some(()) => {
                    info!(job = %s.job_id, "repeated stop request; killing process group");
                    signal(&mut s, TerminationSignal::Kill);
                    kill_deadline = None;
                }
                None => stop_channel_open = false,
            },

            _ = wait_for(kill_deadline), if kill_deadline.is_some() => {
                warn!(job = %s.job_id, "grace period elapsed; killing process group");
                signal(&mut s, TerminationSignal::Kill);
                kill_deadline = None;
            }
        }
    };

    s.reaped.store(true, Ordering::Release);

    let exit = match status {
        Ok(status) => ProcessExit {
            code: status.code(),
            signal: exit_signal(&status),
            stop_requested,
        },
        Err(e) => {
            error!(job = %s.job_id, error = %e, "failed waiting for job process");
            ProcessExit {
                code: None,
                signal: None,
                stop_requested,
            }
        }
    };

    info!(
        job = %s.job_id,
        run_id = s.run_id,
        exit_code = ?exit.code,
        signal = ?exit.signal,
        stop_requested,
        "job process exited"
    );

    let _ = s.exited_tx.send(true);
    for reader in s.readers.drain(..) {
        if let Err(e) = reader.await {
            warn!(job = %s.job_id, error = %e, "output reader failed");
        }
    }

    let event = ProcessEvent::Exited {
        job_id: s.job_id.clone(),
        run_id: s.run_id,
        exit,
    };
    if s.events.send(event).await.is_err() {
        warn!(job = %s.job_id, "event channel closed before exit could be reported");
    }
}

fn signal(s: &mut Supervised, sig: TerminationSignal) {
    if let Err(e) = send_signal(&mut s.child, s.pid, sig) {
        warn!(job = %s.job_id, signal = %sig, error = %e, "failed to signal job process");
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
