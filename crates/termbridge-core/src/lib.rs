//! Session-backed child process management.
//!
//! This crate owns the hard part of exposing command-line programs as
//! remote operations: spawning child processes without a shell in the
//! middle, multiplexing many concurrent interactive sessions, and reading
//! partial output from processes that never say "done" on their own.
//!
//! The pieces, bottom up:
//!
//! - [`ProcessHandle`] — one child process: stdin writer, broadcast-based
//!   stdout/stderr subscription, exit watch, termination.
//! - [`OutputCollector`] — single-use, deadline-bounded accumulator with
//!   optional end-marker early return.
//! - [`Session`] — a process plus id, lifecycle state, and timestamps;
//!   operations on one session are linearized.
//! - [`SessionRegistry`] — the id → session map; creation, lookup-based
//!   routing, enumeration, bulk teardown.
//! - [`ValidationGate`] / [`PatternGate`] — outbound text screening,
//!   consulted before anything reaches a process.
//! - [`exec::run_once`] — the single-shot execution mode.
//!
//! Timeouts on receive are not errors: an interactive program that stays
//! silent for the whole window produces a successful, empty [`Collected`].

pub mod collector;
pub mod error;
pub mod exec;
pub mod process;
pub mod registry;
pub mod session;
pub mod spec;
pub mod validate;

pub use collector::{Collected, OutputCollector, EXIT_DRAIN, MIN_COLLECT_WAIT};
pub use error::{Error, Result};
pub use exec::{run_once, ExecOutcome};
pub use process::ProcessHandle;
pub use registry::SessionRegistry;
pub use session::{
    Session, SessionState, SessionSummary, CLOSE_GRACE, SEND_SETTLE_DELAY, STARTUP_GRACE,
};
pub use spec::{SessionSpec, DEFAULT_RECEIVE_TIMEOUT};
pub use validate::{PatternGate, ScreeningLevel, ValidationGate};
