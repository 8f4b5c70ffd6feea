//! One-shot command tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use termbridge_core::{run_once, ExecOutcome, ValidationGate};

use crate::error::ToolError;
use crate::tool::{parse_params, Tool, ToolResult};

use super::timeout_from_secs;

#[derive(Debug, Deserialize)]
struct RunParams {
    #[serde(default)]
    args: Vec<String>,
    timeout: Option<f64>,
}

/// `<name>_run` — run the configured program once and return its output.
///
/// Caller-supplied extra arguments pass through the validation gate; the
/// configured base arguments are operator-trusted.
pub struct RunTool {
    tool_name: String,
    description: String,
    program: String,
    base_args: Vec<String>,
    default_timeout: Duration,
    gate: Arc<dyn ValidationGate>,
}

impl RunTool {
    pub fn new(
        command: &str,
        program: impl Into<String>,
        base_args: Vec<String>,
        default_timeout: Duration,
        gate: Arc<dyn ValidationGate>,
    ) -> Self {
        let program = program.into();
        Self {
            tool_name: format!("{command}_run"),
            description: format!("Run `{program}` once and return its captured output"),
            program,
            base_args,
            default_timeout,
            gate,
        }
    }
}

#[async_trait]
impl Tool for RunTool {
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
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Extra arguments appended to the configured ones"
                },
                "timeout": {
                    "type": "number",
                    "description": "Seconds to wait for the command to finish. Defaults to the configured timeout."
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let params: RunParams = parse_params(input)?;
        let wait = timeout_from_secs(params.timeout)?.unwrap_or(self.default_timeout);

        for arg in &params.args {
            if let Err(reason) = self.gate.validate(arg) {
                return Ok(ToolResult::error(format!("command rejected: {reason}")));
            }
        }

        let mut args = self.base_args.clone();
        args.extend(params.args.iter().cloned());

        match run_once(&self.program, &args, wait).await {
            Ok(outcome) => Ok(ToolResult::success_text(render_outcome(&outcome))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

fn render_outcome(outcome: &ExecOutcome) -> String {
    let mut text = outcome.stdout.clone();
    if !outcome.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(&outcome.stderr);
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    match outcome.exit_code {
        Some(code) => text.push_str(&format!("[exit code {code}]")),
        None => text.push_str("[killed by signal]"),
    }
    text
}
