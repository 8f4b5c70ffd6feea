//! Tools: the callable units exposed over MCP.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ToolError;
use crate::protocol::{ToolContent, ToolDefinition};

/// A tool callable through `tools/call`.
///
/// Implementations parse their own input against the schema they declare
/// and report domain failures as `isError` results rather than transport
/// errors, so clients can read what went wrong.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (lowercase, digits, underscores).
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON schema describing the expected input object.
    fn input_schema(&self) -> Value;

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError>;
}

/// Outcome of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn success_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: None,
        }
    }

    pub fn success_json(value: Value) -> Self {
        Self {
            content: vec![ToolContent::text(value.to_string())],
            is_error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error == Some(true)
    }
}

/// Parses a tool input object into a typed parameter struct.
pub(crate) fn parse_params<T: DeserializeOwned>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

/// Thread-safe name → tool map.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").finish_non_exhaustive()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// [`ToolError::Duplicate`] if the name is taken.
    pub async fn register<T: Tool + 'static>(&self, tool: T) -> Result<(), ToolError> {
        let mut tools = self.tools.write().await;
        let name = tool.name().to_string();
        if tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Definitions of every registered tool, ordered by name.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut definitions: Vec<ToolDefinition> = tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().map(str::to_string),
                input_schema: tool.input_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}
