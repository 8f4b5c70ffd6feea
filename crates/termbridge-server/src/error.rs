//! Error types for the server layer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from tool registration and execution plumbing.
///
/// Session-level failures (unknown id, rejected command, broken process)
/// are *not* represented here — they travel back to the client as
/// `isError` tool results so the model can read and react to them.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool input did not match the declared schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A tool with the same name is already registered.
    #[error("tool `{0}` is already registered")]
    Duplicate(String),
}

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed and cannot carry more messages.
    #[error("transport is closed")]
    Closed,

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Underlying I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid command `{name}`: {reason}")]
    InvalidCommand { name: String, reason: String },

    #[error("invalid deny pattern `{pattern}`: {source}")]
    InvalidDenyPattern {
        pattern: String,
        source: regex::Error,
    },
}
