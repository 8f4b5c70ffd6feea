//! Child process handles.
//!
//! A [`ProcessHandle`] wraps exactly one spawned child process: its input
//! stream, its output/error streams, and its termination state. Arguments
//! are always passed as a discrete list and never concatenated into a
//! string for shell interpretation; that is a security invariant of the
//! whole system, not an implementation detail.
//!
//! Output delivery is subscription-based: reader tasks pump each pipe into
//! a broadcast channel, and a listener attaches by subscribing and
//! detaches by dropping its receiver. Bytes emitted while no listener is
//! attached are dropped — interactive terminal output is fire-and-forget,
//! and the collector protocol in [`crate::collector`] depends on exactly
//! these semantics.

use std::process::Stdio;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Capacity of the per-stream broadcast channels, in chunks.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
/// Read buffer size for the pipe reader tasks.
const READ_BUF_SIZE: usize = 8192;
/// How often the exit monitor polls `try_wait`.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pause after a kill request before re-checking liveness.
const KILL_SETTLE: Duration = Duration::from_millis(100);

/// SIGTERM-to-SIGKILL escalation window for graceful termination.
pub const TERM_GRACE: Duration = Duration::from_secs(5);

/// Handle to one spawned child process.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    pid: u32,
    started_at: SystemTime,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout_tx: broadcast::Sender<Vec<u8>>,
    stderr_tx: broadcast::Sender<Vec<u8>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
    /// Spawns `program` with `args`, all three streams piped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnFailed`] if the program cannot be located or
    /// executed. Spawning is never retried.
    pub async fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| spawn_error(program, &e))?;

        let pid = child.id().ok_or_else(|| Error::SpawnFailed {
            program: program.to_string(),
            reason: "process exited before a pid could be read".to_string(),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (stderr_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stream) = stdout {
            spawn_pipe_reader(stream, stdout_tx.clone(), "stdout", pid);
        }
        if let Some(stream) = stderr {
            spawn_pipe_reader(stream, stderr_tx.clone(), "stderr", pid);
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let child = Arc::new(Mutex::new(Some(child)));
        spawn_exit_monitor(Arc::clone(&child), exit_tx, pid);

        debug!(program, pid, "spawned process");
        Ok(Self {
            program: program.to_string(),
            pid,
            started_at: SystemTime::now(),
            child,
            stdin: Mutex::new(stdin),
            stdout_tx,
            stderr_tx,
            exit_rx,
        })
    }

    /// Process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Program name this handle was spawned with.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wall-clock spawn time.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Appends a newline to `text` and writes it to the process's input
    /// stream, flushing afterwards.
    ///
    /// # Errors
    ///
    /// Fails if the stream was closed (by [`close_stdin`](Self::close_stdin)
    /// or process death) or the write itself errors.
    pub async fn write_line(&self, text: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin is closed",
            ));
        };
        stdin.write_all(text.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Closes the process's input stream, signalling EOF to the child.
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Attaches a stdout listener. Dropping the receiver detaches it.
    pub fn subscribe_stdout(&self) -> broadcast::Receiver<Vec<u8>> {
        self.stdout_tx.subscribe()
    }

    /// Attaches a stderr listener. Dropping the receiver detaches it.
    pub fn subscribe_stderr(&self) -> broadcast::Receiver<Vec<u8>> {
        self.stderr_tx.subscribe()
    }

    /// Watch channel that publishes the exit code once the process ends.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    /// Exit code, if the process has been observed to exit.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    /// Non-blocking liveness check.
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Terminates the process.
    ///
    /// With `graceful` set, a termination request (SIGTERM on Unix) is sent
    /// first and the process gets [`TERM_GRACE`] to exit voluntarily; either
    /// way, a process still running at the end is force-killed
    /// unconditionally.
    pub async fn terminate(&self, graceful: bool) {
        if !self.is_running() {
            return;
        }

        if graceful {
            if let Err(e) = send_term_signal(self.pid) {
                debug!(pid = self.pid, error = %e, "termination signal failed, falling back to kill");
                self.start_kill().await;
            }
            let deadline = Instant::now() + TERM_GRACE;
            while Instant::now() < deadline {
                if !self.is_running() {
                    return;
                }
                sleep(KILL_SETTLE).await;
            }
        }

        self.force_kill().await;
    }

    async fn start_kill(&self) {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Err(e) = child.start_kill() {
                trace!(pid = self.pid, error = %e, "start_kill failed");
            }
        }
    }

    async fn force_kill(&self) {
        self.start_kill().await;
        sleep(KILL_SETTLE).await;
        if self.is_running() {
            if let Err(e) = kill_by_pid(self.pid) {
                warn!(pid = self.pid, error = %e, "force kill failed");
            }
        }
    }
}

/// Builds a spawn error, resolving the program on PATH for a more useful
/// message when the OS reports "not found".
pub(crate) fn spawn_error(program: &str, err: &std::io::Error) -> Error {
    let reason = if err.kind() == std::io::ErrorKind::NotFound {
        match which::which(program) {
            Ok(path) => format!("{err} (resolves to {})", path.display()),
            Err(which_err) => format!("{err} ({which_err})"),
        }
    } else {
        err.to_string()
    };
    Error::SpawnFailed {
        program: program.to_string(),
        reason,
    }
}

fn spawn_pipe_reader<R>(mut stream: R, tx: broadcast::Sender<Vec<u8>>, name: &'static str, pid: u32)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    // A send error means no listener is attached; the chunk
                    // is dropped, matching terminal output semantics.
                    let _ = tx.send(buf[..n].to_vec());
                }
                Err(e) => {
                    trace!(pid, stream = name, error = %e, "pipe read ended");
                    break;
                }
            }
        }
        trace!(pid, stream = name, "reader task finished");
    });
}

fn spawn_exit_monitor(child: Arc<Mutex<Option<Child>>>, exit_tx: watch::Sender<Option<i32>>, pid: u32) {
    tokio::spawn(async move {
        loop {
            {
                let mut guard = child.lock().await;
                match guard.as_mut() {
                    Some(proc) => match proc.try_wait() {
                        Ok(Some(status)) => {
                            // Killed-by-signal has no code; report -1.
                            let code = status.code().unwrap_or(-1);
                            *guard = None;
                            debug!(pid, code, "process exited");
                            let _ = exit_tx.send(Some(code));
                            break;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(pid, error = %e, "failed to poll process status");
                            *guard = None;
                            let _ = exit_tx.send(Some(-1));
                            break;
                        }
                    },
                    None => {
                        let _ = exit_tx.send(Some(-1));
                        break;
                    }
                }
            }
            sleep(EXIT_POLL_INTERVAL).await;
        }
    });
}

#[cfg(unix)]
fn send_term_signal(pid: u32) -> std::io::Result<()> {
    let output = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[cfg(windows)]
fn send_term_signal(pid: u32) -> std::io::Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[cfg(not(any(unix, windows)))]
fn send_term_signal(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::other(
        "graceful termination is not supported on this platform",
    ))
}

#[cfg(unix)]
fn kill_by_pid(pid: u32) -> std::io::Result<()> {
    let output = std::process::Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[cfg(windows)]
fn kill_by_pid(pid: u32) -> std::io::Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_by_pid(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::other(
        "force kill is not supported on this platform",
    ))
}
