//! MCP server exposing configured commands and interactive sessions.
//!
//! One JSON configuration file turns into a tool surface: five session
//! tools per interactive command, one run tool per one-shot command, and
//! a global `list_sessions`. The session manager itself lives in
//! `termbridge-core`; this crate is the remote-call skin — JSON-RPC over
//! stdio, tool schemas, config loading, and the CLI entry point.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tool;
pub mod tools;
pub mod transport;

pub use config::{CommandConfig, CommandMode, SecurityConfig, ServerConfig};
pub use error::{ConfigError, ToolError, TransportError};
pub use server::{build_server, McpServer};
pub use tool::{Tool, ToolRegistry, ToolResult};
pub use transport::{ChannelTransport, StdioTransport, Transport};
