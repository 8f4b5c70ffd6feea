//! Sessions: one child process plus identity, lifecycle, and timestamps.
//!
//! A [`Session`] combines an exclusively-owned [`ProcessHandle`] with an
//! opaque id and a small state machine (`Starting → Active → Closing →
//! Closed`). All operations against one session are linearized through an
//! internal operation lock; operations against different sessions never
//! contend.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::collector::{Collected, OutputCollector};
use crate::error::{Error, Result};
use crate::process::ProcessHandle;
use crate::spec::SessionSpec;
use crate::validate::ValidationGate;

/// Window after spawn during which the process must stay alive for the
/// session to be confirmed `Active`.
pub const STARTUP_GRACE: Duration = Duration::from_millis(200);

/// Fixed pause between the send and receive halves of
/// [`Session::send_and_receive`], giving the process a moment to begin
/// producing output before the listener attaches. Deliberately constant;
/// it does not scale with the caller's receive timeout.
pub const SEND_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Pause between shutdown command lines during close.
pub const SHUTDOWN_STEP_DELAY: Duration = Duration::from_millis(100);

/// How long close waits for a voluntary exit before force-killing.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Spawned, liveness not yet confirmed.
    Starting,
    /// Confirmed running; send/receive are accepted.
    Active,
    /// Close in progress.
    Closing,
    /// Terminated; about to be (or already) dropped from the registry.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time snapshot of one session, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub program: String,
    pub pid: u32,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// One interactive child process and its lifecycle.
pub struct Session {
    id: String,
    spec: SessionSpec,
    handle: ProcessHandle,
    gate: Arc<dyn ValidationGate>,
    state: SyncMutex<SessionState>,
    created_at: DateTime<Utc>,
    last_activity: SyncMutex<DateTime<Utc>>,
    op_lock: Mutex<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("program", &self.spec.program)
            .field("pid", &self.handle.pid())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Spawns the process for `spec` (startup args plus `extra_args`),
    /// confirms it survives [`STARTUP_GRACE`], and returns the session in
    /// the `Active` state.
    ///
    /// # Errors
    ///
    /// [`Error::SpawnFailed`] if the process cannot start or exits during
    /// the grace window; the message carries any early stderr.
    pub(crate) async fn start(
        id: String,
        spec: SessionSpec,
        extra_args: &[String],
        gate: Arc<dyn ValidationGate>,
    ) -> Result<Self> {
        spec.validate()?;

        let mut args = spec.start_args.clone();
        args.extend_from_slice(extra_args);

        let handle = ProcessHandle::spawn(&spec.program, &args).await?;
        let now = Utc::now();
        let session = Self {
            id,
            spec,
            handle,
            gate,
            state: SyncMutex::new(SessionState::Starting),
            created_at: now,
            last_activity: SyncMutex::new(now),
            op_lock: Mutex::new(()),
        };

        // Watch the grace window through a collector so an immediate death
        // surfaces with whatever the process managed to say on stderr.
        let early = OutputCollector::attach(&session.handle)
            .collect(STARTUP_GRACE, None)
            .await;
        if let Some(code) = early.exit_code {
            let mut reason = format!("process exited with code {code} during startup");
            let stderr = early.stderr.trim();
            if !stderr.is_empty() {
                reason.push_str(": ");
                reason.push_str(stderr);
            }
            return Err(Error::SpawnFailed {
                program: session.spec.program.clone(),
                reason,
            });
        }

        session.set_state(SessionState::Active);
        info!(
            session = %session.id,
            program = %session.spec.program,
            pid = session.handle.pid(),
            "session active"
        );
        Ok(session)
    }

    /// Opaque session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The spec this session was started from.
    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Snapshot for listings.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            program: self.spec.program.clone(),
            pid: self.handle.pid(),
            state: self.state(),
            created_at: self.created_at,
            last_activity: *self.last_activity.lock(),
        }
    }

    /// Validates `text` through the gate and writes it as one input line.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] outside the `Active` state;
    /// [`Error::SecurityRejected`] when the gate refuses (the process is
    /// not touched); [`Error::WriteFailed`] when the input stream is gone.
    pub async fn send(&self, text: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.ensure_active()?;
        self.send_locked(text).await
    }

    /// Collects output for up to `wait` (spec default when `None`),
    /// ending early if `end_marker` (spec prompt marker when `None`)
    /// appears. An empty result is success, not an error.
    pub async fn receive(&self, wait: Option<Duration>, end_marker: Option<&str>) -> Result<Collected> {
        let _op = self.op_lock.lock().await;
        self.ensure_active()?;
        Ok(self.receive_locked(wait, end_marker).await)
    }

    /// `send`, a fixed [`SEND_SETTLE_DELAY`], then collection, all under
    /// this session's operation lock. The listeners attach *before* the
    /// write, so the settle delay lets output accumulate instead of
    /// dropping it. Other callers' raw `send`/`receive` calls may still
    /// interleave between their own acquisitions; callers needing strict
    /// pairing must serialize externally.
    pub async fn send_and_receive(
        &self,
        text: &str,
        wait: Option<Duration>,
        end_marker: Option<&str>,
    ) -> Result<Collected> {
        let _op = self.op_lock.lock().await;
        self.ensure_active()?;

        let collector = OutputCollector::attach(&self.handle);
        self.send_locked(text).await?;
        sleep(SEND_SETTLE_DELAY).await;

        let wait = wait.unwrap_or(self.spec.default_timeout);
        let marker = end_marker.or(self.spec.prompt_marker.as_deref());
        let collected = collector.collect(wait, marker).await;
        self.touch();
        Ok(collected)
    }

    /// Closes the session: best-effort shutdown command lines, stdin EOF,
    /// a bounded wait for voluntary exit, then a force kill if needed.
    /// Always reaches `Closed`, regardless of shutdown-command failures.
    pub async fn close(&self, extra_shutdown: &[String]) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.state() == SessionState::Closed {
            return Ok(());
        }
        self.set_state(SessionState::Closing);
        debug!(session = %self.id, "closing session");

        for line in &self.spec.shutdown_args {
            self.send_shutdown_line(line, false).await;
        }
        for line in extra_shutdown {
            self.send_shutdown_line(line, true).await;
        }

        self.handle.close_stdin().await;

        if !self.wait_for_exit(CLOSE_GRACE).await {
            debug!(session = %self.id, "no voluntary exit within grace, force killing");
            self.handle.terminate(false).await;
        }

        self.set_state(SessionState::Closed);
        info!(session = %self.id, "session closed");
        Ok(())
    }

    async fn send_locked(&self, text: &str) -> Result<()> {
        self.gate.validate(text).map_err(Error::SecurityRejected)?;
        self.handle
            .write_line(text)
            .await
            .map_err(|e| Error::WriteFailed {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        self.touch();
        Ok(())
    }

    async fn receive_locked(&self, wait: Option<Duration>, end_marker: Option<&str>) -> Collected {
        let wait = wait.unwrap_or(self.spec.default_timeout);
        let marker = end_marker.or(self.spec.prompt_marker.as_deref());
        let collected = OutputCollector::attach(&self.handle)
            .collect(wait, marker)
            .await;
        self.touch();
        collected
    }

    /// Shutdown lines are best-effort: rejections and write failures are
    /// logged and the sweep continues, so close always reaches the kill
    /// step. Caller-supplied lines still pass the gate; configured ones
    /// are operator-trusted.
    async fn send_shutdown_line(&self, line: &str, screened: bool) {
        if screened {
            if let Err(reason) = self.gate.validate(line) {
                warn!(session = %self.id, %reason, "shutdown command rejected, skipping");
                return;
            }
        }
        if let Err(e) = self.handle.write_line(line).await {
            warn!(session = %self.id, error = %e, "failed to send shutdown command");
            return;
        }
        sleep(SHUTDOWN_STEP_DELAY).await;
    }

    async fn wait_for_exit(&self, grace: Duration) -> bool {
        let mut exit_rx = self.handle.exit_watch();
        let _ = timeout(grace, async {
            while exit_rx.borrow_and_update().is_none() {
                if exit_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        !self.handle.is_running()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() == SessionState::Active {
            Ok(())
        } else {
            Err(Error::NotActive(self.id.clone()))
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock() = next;
    }

    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{PatternGate, ScreeningLevel};

    #[test]
    fn summary_serializes_with_snake_case_state() {
        let summary = SessionSummary {
            id: "sess-1-0".to_string(),
            program: "cat".to_string(),
            pid: 42,
            state: SessionState::Active,
            created_at: Utc::now(),
            last_activity: Utc::now(),
        };
        let value = serde_json::to_value(&summary).expect("encode");
        assert_eq!(value["state"], serde_json::json!("active"));
        assert_eq!(value["pid"], serde_json::json!(42));
    }

    struct RejectAllGate;

    impl ValidationGate for RejectAllGate {
        fn validate(&self, _text: &str) -> std::result::Result<(), String> {
            Err("rejected by test gate".to_string())
        }
    }

    fn open_gate() -> Arc<dyn ValidationGate> {
        Arc::new(PatternGate::new(ScreeningLevel::Disabled))
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_fails_when_process_dies_immediately() {
        let spec = SessionSpec::new("sh").with_start_args(["-c", "echo doomed >&2; exit 7"]);
        let err = Session::start("sess-t-1".to_string(), spec, &[], open_gate())
            .await
            .expect_err("start should fail");
        match err {
            Error::SpawnFailed { reason, .. } => {
                assert!(reason.contains("code 7"), "unexpected reason: {reason}");
                assert!(reason.contains("doomed"), "stderr missing: {reason}");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn echo_round_trip_via_send_and_receive() {
        let spec = SessionSpec::new("cat");
        let session = Session::start("sess-t-2".to_string(), spec, &[], open_gate())
            .await
            .expect("start cat");

        let collected = session
            .send_and_receive("ping", Some(Duration::from_secs(2)), None)
            .await
            .expect("send/receive");
        assert!(collected.stdout.contains("ping"), "got: {collected:?}");

        session.close(&[]).await.expect("close");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejected_send_never_reaches_the_process() {
        let spec = SessionSpec::new("cat");
        let session = Session::start("sess-t-3".to_string(), spec, &[], Arc::new(RejectAllGate))
            .await
            .expect("start cat");

        let err = session.send("ping").await.expect_err("gate rejects");
        assert!(matches!(err, Error::SecurityRejected(_)));

        // cat echoes its input; a clean window proves nothing was written.
        let collected = session
            .receive(Some(Duration::from_millis(300)), None)
            .await
            .expect("receive");
        assert!(collected.is_empty(), "leaked input: {collected:?}");

        session.close(&[]).await.expect("close");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_reaches_closed_even_when_shutdown_lines_are_rejected() {
        let spec = SessionSpec::new("cat");
        let session = Session::start("sess-t-4".to_string(), spec, &[], Arc::new(RejectAllGate))
            .await
            .expect("start cat");

        session
            .close(&["these".to_string(), "are rejected".to_string()])
            .await
            .expect("close");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn operations_after_close_report_not_active() {
        let spec = SessionSpec::new("cat");
        let session = Session::start("sess-t-5".to_string(), spec, &[], open_gate())
            .await
            .expect("start cat");
        session.close(&[]).await.expect("close");

        assert!(matches!(session.send("x").await, Err(Error::NotActive(_))));
        assert!(matches!(
            session.receive(Some(Duration::from_millis(100)), None).await,
            Err(Error::NotActive(_))
        ));
    }
}
