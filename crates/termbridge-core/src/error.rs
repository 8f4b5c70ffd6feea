//! Error types for the session manager core.
//!
//! Every failure surfaces as a typed variant on the specific call that
//! triggered it; errors never take down the registry or affect other
//! sessions. Note that a `receive` deadline expiring is *not* represented
//! here at all: an empty collection window is a successful outcome.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by session and one-shot command operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The program could not be located or executed, or it died during the
    /// startup grace window. Fatal to that session; never retried.
    #[error("failed to spawn `{program}`: {reason}")]
    SpawnFailed { program: String, reason: String },

    /// The validation gate refused the outbound text. The session remains
    /// usable; nothing reached the process.
    #[error("command rejected: {0}")]
    SecurityRejected(String),

    /// No session with the given id is tracked by the registry.
    #[error("no session with id `{0}`")]
    NotFound(String),

    /// The session exists but is not in the `Active` state.
    #[error("session `{0}` is not active")]
    NotActive(String),

    /// The process's input stream is closed or the write failed. The
    /// session should be considered dead and closed.
    #[error("write to session `{id}` failed: {reason}")]
    WriteFailed { id: String, reason: String },

    /// A `SessionSpec` failed validation.
    #[error("invalid session spec: {0}")]
    InvalidSpec(String),

    /// A one-shot command did not finish within its deadline. Unlike a
    /// session `receive`, a one-shot with no result is an error.
    #[error("`{program}` did not finish within {timeout:?}")]
    ExecTimeout { program: String, timeout: Duration },

    /// An I/O failure outside the spawn/write paths.
    #[error("i/o failure running `{program}`: {reason}")]
    Io { program: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_distinguishes_caller_errors_from_broken_sessions() {
        let not_found = Error::NotFound("sess-1-0".to_string());
        assert!(not_found.to_string().contains("no session"));

        let rejected = Error::SecurityRejected("shell command chaining".to_string());
        assert!(rejected.to_string().starts_with("command rejected"));

        let broken = Error::WriteFailed {
            id: "sess-1-0".to_string(),
            reason: "stdin is closed".to_string(),
        };
        assert!(broken.to_string().contains("write to session"));
    }
}
