//! Deadline-bounded output collection.
//!
//! An [`OutputCollector`] answers "what did this process produce since I
//! started watching, bounded by a deadline" exactly once. It is not a
//! persistent buffer: it attaches one stdout listener and one stderr
//! listener, accumulates until a termination condition fires, then
//! detaches by being consumed. Output emitted between collector
//! invocations is lost by design.
//!
//! Termination conditions, in priority order: a configured end marker
//! appears in the accumulated stdout; the process is observed to close
//! (after a short drain for final flushed bytes); the deadline elapses.
//! A deadline firing is not an error — interactive programs are
//! frequently silent, and an empty collection is a valid outcome.

use tokio::sync::{broadcast, watch};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::trace;

use crate::process::ProcessHandle;

/// Floor applied to caller-supplied collection timeouts. A deliberate,
/// documented constant: degenerate timeouts still get one realistic
/// chance to observe output.
pub const MIN_COLLECT_WAIT: Duration = Duration::from_millis(100);

/// How long to keep draining after the process is observed to close, so
/// bytes flushed around exit are still captured.
pub const EXIT_DRAIN: Duration = Duration::from_millis(50);

/// Everything one collection call captured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    /// Accumulated stdout, lossily decoded.
    pub stdout: String,
    /// Accumulated stderr, lossily decoded.
    pub stderr: String,
    /// Whether the end marker ended the collection early.
    pub marker_found: bool,
    /// Exit code, when the process was observed to close during (or
    /// before) the collection window. `None` means it was still running
    /// when the window ended — a plain deadline expiry, not a failure.
    pub exit_code: Option<i32>,
}

impl Collected {
    /// True when neither stream produced any bytes.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Single-use accumulator over one process's output streams.
#[derive(Debug)]
pub struct OutputCollector {
    stdout_rx: broadcast::Receiver<Vec<u8>>,
    stderr_rx: broadcast::Receiver<Vec<u8>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl OutputCollector {
    /// Attaches fresh listeners to `handle`. Collection only sees bytes
    /// produced from this point on.
    pub fn attach(handle: &ProcessHandle) -> Self {
        Self {
            stdout_rx: handle.subscribe_stdout(),
            stderr_rx: handle.subscribe_stderr(),
            exit_rx: handle.exit_watch(),
        }
    }

    /// Collects until the marker appears, the process closes, or the
    /// deadline elapses — whichever comes first. Consumes the collector,
    /// detaching both listeners.
    pub async fn collect(mut self, wait: Duration, end_marker: Option<&str>) -> Collected {
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();
        let mut marker_found = false;
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut exit_watch_open = true;
        let mut exit_code = *self.exit_rx.borrow_and_update();

        let started = Instant::now();
        let mut deadline = started + wait.max(MIN_COLLECT_WAIT);
        if exit_code.is_some() {
            // Already closed: only drain what the readers still flush.
            deadline = deadline.min(started + EXIT_DRAIN);
        }

        loop {
            if Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                biased;
                changed = self.exit_rx.changed(), if exit_code.is_none() && exit_watch_open => {
                    match changed {
                        Ok(()) => {
                            exit_code = *self.exit_rx.borrow_and_update();
                            if exit_code.is_some() {
                                deadline = deadline.min(Instant::now() + EXIT_DRAIN);
                            }
                        }
                        Err(_) => exit_watch_open = false,
                    }
                }
                chunk = self.stdout_rx.recv(), if stdout_open => match chunk {
                    Ok(bytes) => {
                        stdout.extend_from_slice(&bytes);
                        if let Some(marker) = end_marker {
                            if String::from_utf8_lossy(&stdout).contains(marker) {
                                marker_found = true;
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "stdout listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        stdout_open = false;
                        deadline = deadline.min(Instant::now() + EXIT_DRAIN);
                    }
                },
                chunk = self.stderr_rx.recv(), if stderr_open => match chunk {
                    Ok(bytes) => stderr.extend_from_slice(&bytes),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "stderr listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        stderr_open = false;
                    }
                },
                _ = sleep_until(deadline) => break,
            }
        }

        Collected {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            marker_found,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessHandle;

    async fn spawn_sh(script: &str) -> ProcessHandle {
        ProcessHandle::spawn("sh", &["-c".to_string(), script.to_string()])
            .await
            .expect("spawn sh")
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_process_yields_empty_success_at_deadline() {
        let handle = ProcessHandle::spawn("cat", &[]).await.expect("spawn cat");
        let started = std::time::Instant::now();
        let collected = OutputCollector::attach(&handle)
            .collect(Duration::from_millis(300), None)
            .await;
        let elapsed = started.elapsed();

        assert!(collected.is_empty());
        assert!(!collected.marker_found);
        assert_eq!(collected.exit_code, None);
        assert!(elapsed >= Duration::from_millis(250), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "overshot deadline: {elapsed:?}");

        handle.terminate(false).await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn marker_ends_collection_well_before_deadline() {
        let handle = spawn_sh("sleep 0.2; echo DONE; sleep 10").await;
        let started = std::time::Instant::now();
        let collected = OutputCollector::attach(&handle)
            .collect(Duration::from_secs(10), Some("DONE"))
            .await;
        let elapsed = started.elapsed();

        assert!(collected.marker_found);
        assert!(collected.stdout.contains("DONE"));
        assert!(elapsed < Duration::from_secs(3), "marker ignored: {elapsed:?}");

        handle.terminate(false).await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn marker_split_across_chunks_still_matches() {
        // Two writes with a pause force the marker across chunk boundaries.
        let handle = spawn_sh("printf 'DO'; sleep 0.15; printf 'NE\\n'; sleep 10").await;
        let collected = OutputCollector::attach(&handle)
            .collect(Duration::from_secs(5), Some("DONE"))
            .await;
        assert!(collected.marker_found);
        handle.terminate(false).await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closed_process_returns_promptly_with_exit_status() {
        let handle = spawn_sh("echo bye; exit 3").await;
        // Let it finish before attaching.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!handle.is_running());

        let started = std::time::Instant::now();
        let collected = OutputCollector::attach(&handle)
            .collect(Duration::from_secs(10), None)
            .await;
        let elapsed = started.elapsed();

        assert_eq!(collected.exit_code, Some(3));
        assert!(elapsed < Duration::from_secs(1), "did not return promptly: {elapsed:?}");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stderr_is_collected_separately() {
        let handle = spawn_sh("echo out; echo err >&2; sleep 10").await;
        let collected = OutputCollector::attach(&handle)
            .collect(Duration::from_millis(500), None)
            .await;
        assert!(collected.stdout.contains("out"));
        assert!(collected.stderr.contains("err"));
        assert!(!collected.stdout.contains("err"));
        handle.terminate(false).await;
    }
}
