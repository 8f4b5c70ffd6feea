//! The five per-command session tools, plus `list_sessions`.
//!
//! Each tool is a thin, schema-carrying adapter over the registry.
//! Session-level failures (unknown id, inactive session, rejected
//! command, broken process) come back as `isError` results whose text
//! keeps the taxonomy readable for the client; only malformed input is a
//! protocol-level error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use termbridge_core::{SessionRegistry, SessionSpec};

use crate::error::ToolError;
use crate::tool::{parse_params, Tool, ToolResult};

use super::{end_marker_param, render_collected, timeout_from_secs};

fn args_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description
    })
}

fn session_id_schema() -> Value {
    json!({
        "type": "string",
        "description": "Session id returned by the start_session tool"
    })
}

fn timeout_schema() -> Value {
    json!({
        "type": "number",
        "description": "How long to collect output, in seconds. Defaults to the configured timeout."
    })
}

fn end_marker_schema() -> Value {
    json!({
        "type": "string",
        "description": "Return early as soon as this substring appears in the output"
    })
}

#[derive(Debug, Deserialize)]
struct StartSessionParams {
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SendParams {
    session_id: String,
    command: String,
}

#[derive(Debug, Deserialize)]
struct ReceiveParams {
    session_id: String,
    timeout: Option<f64>,
    end_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendReceiveParams {
    session_id: String,
    command: String,
    timeout: Option<f64>,
    end_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloseSessionParams {
    session_id: String,
    #[serde(default)]
    args: Vec<String>,
}

/// `<name>_start_session` — spawn a new interactive session.
pub struct StartSessionTool {
    tool_name: String,
    description: String,
    spec: SessionSpec,
    registry: Arc<SessionRegistry>,
}

impl StartSessionTool {
    pub fn new(command: &str, spec: SessionSpec, registry: Arc<SessionRegistry>) -> Self {
        Self {
            tool_name: format!("{command}_start_session"),
            description: format!(
                "Start an interactive `{}` session. Returns the session id used by the other `{command}` tools.",
                spec.program
            ),
            spec,
            registry,
        }
    }
}

#[async_trait]
impl Tool for StartSessionTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "args": args_schema("Extra startup arguments appended to the configured ones")
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let params: StartSessionParams = parse_params(input)?;
        match self.registry.create_session(&self.spec, &params.args).await {
            Ok(id) => Ok(ToolResult::success_json(json!({ "session_id": id }))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// `<name>_send` — write one input line, without collecting output.
pub struct SendTool {
    tool_name: String,
    description: String,
    registry: Arc<SessionRegistry>,
}

impl SendTool {
    pub fn new(command: &str, registry: Arc<SessionRegistry>) -> Self {
        Self {
            tool_name: format!("{command}_send"),
            description: format!(
                "Send a line of input to a running `{command}` session without waiting for output"
            ),
            registry,
        }
    }
}

#[async_trait]
impl Tool for SendTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "command": { "type": "string", "description": "Text to send as one input line" }
            },
            "required": ["session_id", "command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let params: SendParams = parse_params(input)?;
        match self.registry.send(&params.session_id, &params.command).await {
            Ok(()) => Ok(ToolResult::success_text("sent")),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// `<name>_receive` — collect pending output, bounded by a timeout.
pub struct ReceiveTool {
    tool_name: String,
    description: String,
    registry: Arc<SessionRegistry>,
}

impl ReceiveTool {
    pub fn new(command: &str, registry: Arc<SessionRegistry>) -> Self {
        Self {
            tool_name: format!("{command}_receive"),
            description: format!(
                "Collect output from a `{command}` session. Empty output means the session \
                 produced nothing within the timeout; that is not an error."
            ),
            registry,
        }
    }
}

#[async_trait]
impl Tool for ReceiveTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "timeout": timeout_schema(),
                "end_marker": end_marker_schema()
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let params: ReceiveParams = parse_params(input)?;
        let wait = timeout_from_secs(params.timeout)?;
        let marker = end_marker_param(params.end_marker.as_ref())?;
        match self.registry.receive(&params.session_id, wait, marker).await {
            Ok(collected) => Ok(ToolResult::success_text(render_collected(&collected))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// `<name>_send_receive` — send a line, settle, then collect output.
pub struct SendReceiveTool {
    tool_name: String,
    description: String,
    registry: Arc<SessionRegistry>,
}

impl SendReceiveTool {
    pub fn new(command: &str, registry: Arc<SessionRegistry>) -> Self {
        Self {
            tool_name: format!("{command}_send_receive"),
            description: format!(
                "Send a line of input to a `{command}` session and collect the output it produces"
            ),
            registry,
        }
    }
}

#[async_trait]
impl Tool for SendReceiveTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "command": { "type": "string", "description": "Text to send as one input line" },
                "timeout": timeout_schema(),
                "end_marker": end_marker_schema()
            },
            "required": ["session_id", "command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let params: SendReceiveParams = parse_params(input)?;
        let wait = timeout_from_secs(params.timeout)?;
        let marker = end_marker_param(params.end_marker.as_ref())?;
        match self
            .registry
            .send_and_receive(&params.session_id, &params.command, wait, marker)
            .await
        {
            Ok(collected) => Ok(ToolResult::success_text(render_collected(&collected))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// `<name>_close_session` — shut a session down and forget it.
pub struct CloseSessionTool {
    tool_name: String,
    description: String,
    registry: Arc<SessionRegistry>,
}

impl CloseSessionTool {
    pub fn new(command: &str, registry: Arc<SessionRegistry>) -> Self {
        Self {
            tool_name: format!("{command}_close_session"),
            description: format!(
                "Close a `{command}` session: run its shutdown commands, then terminate the process"
            ),
            registry,
        }
    }
}

#[async_trait]
impl Tool for CloseSessionTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "args": args_schema("Extra shutdown command lines sent before termination")
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let params: CloseSessionParams = parse_params(input)?;
        match self
            .registry
            .close_session(&params.session_id, &params.args)
            .await
        {
            Ok(()) => Ok(ToolResult::success_text(format!(
                "session {} closed",
                params.session_id
            ))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// `list_sessions` — snapshot of every tracked session.
pub struct ListSessionsTool {
    registry: Arc<SessionRegistry>,
}

impl ListSessionsTool {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ListSessionsTool {
    fn name(&self) -> &str {
        "list_sessions"
    }

    fn description(&self) -> Option<&str> {
        Some("List every tracked interactive session with its state and timestamps")
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: Value) -> Result<ToolResult, ToolError> {
        let summaries = self.registry.summaries().await;
        let value = serde_json::to_value(&summaries)
            .map_err(|e| ToolError::InvalidInput(format!("failed to encode summaries: {e}")))?;
        Ok(ToolResult::success_json(json!({ "sessions": value })))
    }
}
