//! The MCP server: request dispatch and the serve loop.

use std::sync::Arc;

use serde_json::json;
use termbridge_core::{SessionRegistry, ValidationGate};
use tracing::{debug, info, warn};

use crate::config::{CommandMode, ServerConfig};
use crate::error::{ToolError, TransportError};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability, PROTOCOL_VERSION,
};
use crate::tool::ToolRegistry;
use crate::tools::{
    CloseSessionTool, ListSessionsTool, ReceiveTool, RunTool, SendReceiveTool, SendTool,
    StartSessionTool,
};
use crate::transport::Transport;

/// A tools-only MCP server.
#[derive(Debug)]
pub struct McpServer {
    info: ServerInfo,
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            tools: ToolRegistry::new(),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Routes one request. Returns `None` for notifications, which expect
    /// no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "notification received");
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request),
            "tools/list" => self.handle_tools_list(&request).await,
            "tools/call" => self.handle_tools_call(&request).await,
            other => JsonRpcResponse::method_not_found(request.id.clone(), other),
        };
        Some(response)
    }

    /// The handshake. Params are accepted permissively: this server has
    /// nothing to negotiate, and rejecting a thin client over a missing
    /// capability blob helps nobody.
    fn handle_initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        if let Some(params) = &request.params {
            debug!(client = ?params.get("clientInfo"), "initialize");
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.info.clone(),
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
            Err(e) => JsonRpcResponse::internal_error(
                request.id.clone(),
                format!("failed to encode initialize result: {e}"),
            ),
        }
    }

    async fn handle_tools_list(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let result = ListToolsResult {
            tools: self.tools.definitions().await,
        };
        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
            Err(e) => JsonRpcResponse::internal_error(
                request.id.clone(),
                format!("failed to encode tools list: {e}"),
            ),
        }
    }

    async fn handle_tools_call(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let params: CallToolParams = match &request.params {
            Some(params) => match serde_json::from_value(params.clone()) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::invalid_params(
                        request.id.clone(),
                        format!("invalid tool call params: {e}"),
                    );
                }
            },
            None => {
                return JsonRpcResponse::invalid_params(
                    request.id.clone(),
                    "tool call params are required",
                );
            }
        };

        let Some(tool) = self.tools.get(&params.name).await else {
            return JsonRpcResponse::tool_not_found(request.id.clone(), &params.name);
        };

        let input = params.arguments.unwrap_or_else(|| json!({}));
        match tool.execute(input).await {
            Ok(result) => {
                let call_result = CallToolResult {
                    content: result.content,
                    is_error: result.is_error,
                };
                match serde_json::to_value(&call_result) {
                    Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
                    Err(e) => JsonRpcResponse::internal_error(
                        request.id.clone(),
                        format!("failed to encode tool result: {e}"),
                    ),
                }
            }
            Err(ToolError::InvalidInput(details)) => {
                JsonRpcResponse::invalid_params(request.id.clone(), details)
            }
            Err(e) => JsonRpcResponse::internal_error(request.id.clone(), e.to_string()),
        }
    }

    /// Runs the recv → handle → send loop until the transport closes.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), TransportError> {
        info!(server = %self.info.name, version = %self.info.version, "serving");

        while let Some(request) = transport.recv().await {
            let Some(response) = self.handle_request(request).await else {
                continue;
            };
            if let Err(e) = transport.send(response).await {
                warn!(error = %e, "failed to send response, stopping");
                break;
            }
        }

        info!("transport closed, server stopping");
        Ok(())
    }
}

/// Builds the server for a validated configuration: five session tools per
/// session-mode command, one run tool per one-shot command, and the
/// global session listing.
pub async fn build_server(
    config: &ServerConfig,
    registry: Arc<SessionRegistry>,
    gate: Arc<dyn ValidationGate>,
) -> Result<McpServer, ToolError> {
    let server = McpServer::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    for (name, command) in &config.commands {
        match command.mode {
            CommandMode::Session => {
                let spec = command.to_session_spec();
                server
                    .tools()
                    .register(StartSessionTool::new(name, spec, Arc::clone(&registry)))
                    .await?;
                server
                    .tools()
                    .register(SendTool::new(name, Arc::clone(&registry)))
                    .await?;
                server
                    .tools()
                    .register(ReceiveTool::new(name, Arc::clone(&registry)))
                    .await?;
                server
                    .tools()
                    .register(SendReceiveTool::new(name, Arc::clone(&registry)))
                    .await?;
                server
                    .tools()
                    .register(CloseSessionTool::new(name, Arc::clone(&registry)))
                    .await?;
            }
            CommandMode::Oneshot => {
                server
                    .tools()
                    .register(RunTool::new(
                        name,
                        command.program.clone(),
                        command.args.clone(),
                        command.timeout(),
                        Arc::clone(&gate),
                    ))
                    .await?;
            }
        }
    }

    server
        .tools()
        .register(ListSessionsTool::new(registry))
        .await?;

    Ok(server)
}
