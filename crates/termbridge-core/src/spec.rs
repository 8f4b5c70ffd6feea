//! Session specifications.
//!
//! A [`SessionSpec`] describes how to start, talk to, and shut down one
//! kind of interactive program. Specs are produced by the configuration
//! layer and consumed immutably by the registry; the core never reads
//! configuration files itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Receive timeout applied when a spec does not configure one.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable description of one interactive program.
///
/// # Examples
///
/// ```
/// use termbridge_core::SessionSpec;
///
/// let spec = SessionSpec::new("python3")
///     .with_start_args(["-i", "-q"])
///     .with_shutdown_args(["exit()"])
///     .with_prompt_marker(">>> ");
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Program name or path. Must be non-empty.
    pub program: String,
    /// Arguments passed at spawn time, before any caller-supplied extras.
    #[serde(default)]
    pub start_args: Vec<String>,
    /// Lines sent to the process, best-effort, when the session closes.
    #[serde(default)]
    pub shutdown_args: Vec<String>,
    /// Default receive timeout when a caller supplies none.
    #[serde(default = "default_receive_timeout")]
    pub default_timeout: Duration,
    /// Marker whose appearance in output ends a receive early, used when a
    /// caller supplies no marker of their own.
    #[serde(default)]
    pub prompt_marker: Option<String>,
}

fn default_receive_timeout() -> Duration {
    DEFAULT_RECEIVE_TIMEOUT
}

impl SessionSpec {
    /// Creates a spec for `program` with default timeout and no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            start_args: Vec::new(),
            shutdown_args: Vec::new(),
            default_timeout: DEFAULT_RECEIVE_TIMEOUT,
            prompt_marker: None,
        }
    }

    /// Replaces the startup arguments.
    #[must_use]
    pub fn with_start_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the shutdown command lines.
    #[must_use]
    pub fn with_shutdown_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shutdown_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default receive timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the prompt marker hint.
    #[must_use]
    pub fn with_prompt_marker(mut self, marker: impl Into<String>) -> Self {
        self.prompt_marker = Some(marker.into());
        self
    }

    /// Checks the spec invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the program name is empty or the
    /// default timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::InvalidSpec("program must not be empty".to_string()));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::InvalidSpec(
                "default timeout must be positive".to_string(),
            ));
        }
        if let Some(marker) = &self.prompt_marker {
            if marker.is_empty() {
                return Err(Error::InvalidSpec(
                    "prompt marker must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
