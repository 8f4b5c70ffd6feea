//! Single-shot command execution.
//!
//! The one-shot mode runs a program once, collects everything it printed,
//! and returns. No session, no registry entry, no partial reads. Unlike a
//! session `receive`, a one-shot command that outlives its deadline is an
//! error — there is no later call that could pick up the result.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::spawn_error;

/// Result of one single-shot run.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ExecOutcome {
    /// True when the process reported exit code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs `program` with `args` (a discrete list — no shell is involved),
/// waiting at most `wait` for it to finish.
///
/// A non-zero exit is not an error; the outcome carries the code.
///
/// # Errors
///
/// [`Error::SpawnFailed`] if the program cannot start;
/// [`Error::ExecTimeout`] if it does not finish within `wait` (the child
/// is killed on the way out); [`Error::Io`] if output collection fails.
pub async fn run_once(program: &str, args: &[String], wait: Duration) -> Result<ExecOutcome> {
    let started = Instant::now();

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| spawn_error(program, &e))?;

    // On deadline expiry the in-flight future (and the child with it) is
    // dropped, and kill_on_drop reaps the process.
    let output = match timeout(wait, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| Error::Io {
            program: program.to_string(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            return Err(Error::ExecTimeout {
                program: program.to_string(),
                timeout: wait,
            });
        }
    };

    let duration = started.elapsed();
    debug!(program, code = ?output.status.code(), ?duration, "one-shot command finished");

    Ok(ExecOutcome {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn captures_output_and_exit_code() {
        let outcome = run_once("echo", &["hello".to_string()], Duration::from_secs(5))
            .await
            .expect("run echo");
        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(outcome.stderr.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nonzero_exit_is_not_an_error() {
        let outcome = run_once(
            "sh",
            &["-c".to_string(), "echo oops >&2; exit 2".to_string()],
            Duration::from_secs(5),
        )
        .await
        .expect("run sh");
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(2));
        assert!(outcome.stderr.contains("oops"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_command_times_out() {
        let err = run_once("sleep", &["10".to_string()], Duration::from_millis(200))
            .await
            .expect_err("should time out");
        assert!(matches!(err, Error::ExecTimeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_program_is_spawn_failed() {
        let err = run_once("no-such-binary-anywhere-7", &[], Duration::from_secs(1))
            .await
            .expect_err("should fail to spawn");
        assert!(matches!(err, Error::SpawnFailed { .. }));
    }
}
