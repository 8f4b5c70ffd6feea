//! End-to-end: JSON-RPC in, session side effects out.
//!
//! Drives a built server over the in-memory channel transport, the same
//! way an MCP client drives the stdio binary.

#![cfg(unix)]

use std::sync::Arc;

use serde_json::{json, Value};
use termbridge_core::{PatternGate, ScreeningLevel, SessionRegistry, ValidationGate};
use termbridge_server::config::ServerConfig;
use termbridge_server::protocol::{CallToolResult, JsonRpcRequest, JsonRpcResponse};
use termbridge_server::server::build_server;
use termbridge_server::transport::ChannelTransport;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

struct Client {
    request_tx: mpsc::Sender<JsonRpcRequest>,
    response_rx: mpsc::Receiver<JsonRpcResponse>,
    next_id: i64,
}

impl Client {
    async fn call(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
        self.next_id += 1;
        let request = JsonRpcRequest::new(Some(json!(self.next_id)), method, params);
        self.request_tx.send(request).await.expect("send request");
        timeout(Duration::from_secs(10), self.response_rx.recv())
            .await
            .expect("response within 10s")
            .expect("transport open")
    }

    /// Calls a tool and returns its text content plus the error flag.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> (String, bool) {
        let response = self
            .call(
                "tools/call",
                Some(json!({"name": name, "arguments": arguments})),
            )
            .await;
        assert!(
            response.is_success(),
            "tools/call failed: {:?}",
            response.error
        );
        let result: CallToolResult =
            serde_json::from_value(response.result.expect("result")).expect("decode");
        let text = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .unwrap_or_default()
            .to_string();
        (text, result.is_error == Some(true))
    }
}

async fn start_server(config_json: &str) -> (Client, Arc<SessionRegistry>) {
    let config: ServerConfig = serde_json::from_str(config_json).expect("parse config");
    config.validate().expect("valid config");

    let gate: Arc<dyn ValidationGate> = Arc::new(PatternGate::new(ScreeningLevel::Disabled));
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&gate)));
    let server = build_server(&config, Arc::clone(&registry), gate)
        .await
        .expect("build server");

    let (transport, request_tx, response_rx) = ChannelTransport::pair();
    tokio::spawn(async move {
        let _ = server.serve(transport).await;
    });

    (
        Client {
            request_tx,
            response_rx,
            next_id: 0,
        },
        registry,
    )
}

const CONFIG: &str = r#"{
    "commands": {
        "repl": { "program": "cat", "mode": "session" },
        "greet": { "program": "echo", "args": ["hello"] }
    }
}"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_session_round_trip_over_json_rpc() {
    let (mut client, registry) = start_server(CONFIG).await;

    let response = client.call("initialize", Some(json!({}))).await;
    assert!(response.is_success());

    let response = client.call("tools/list", None).await;
    let tools = response.result.expect("result")["tools"]
        .as_array()
        .expect("array")
        .len();
    assert_eq!(tools, 7);

    // Start a session and pull its id out of the result text.
    let (text, is_error) = client.call_tool("repl_start_session", json!({})).await;
    assert!(!is_error, "start failed: {text}");
    let started: Value = serde_json::from_str(&text).expect("start result is json");
    let session_id = started["session_id"].as_str().expect("session id").to_string();

    assert_eq!(registry.list_active().await, vec![session_id.clone()]);

    // cat echoes the line back.
    let (text, is_error) = client
        .call_tool(
            "repl_send_receive",
            json!({"session_id": session_id, "command": "ping", "timeout": 2.0}),
        )
        .await;
    assert!(!is_error, "send_receive failed: {text}");
    assert!(text.contains("ping"), "echo missing: {text}");

    let (text, is_error) = client
        .call_tool("repl_close_session", json!({"session_id": session_id}))
        .await;
    assert!(!is_error, "close failed: {text}");

    assert!(registry.list_active().await.is_empty());

    let (text, is_error) = client.call_tool("list_sessions", json!({})).await;
    assert!(!is_error);
    assert!(text.contains("\"sessions\":[]"), "got: {text}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_session_id_comes_back_as_is_error_text() {
    let (mut client, _registry) = start_server(CONFIG).await;

    let (text, is_error) = client
        .call_tool(
            "repl_send",
            json!({"session_id": "sess-404-0", "command": "hi"}),
        )
        .await;
    assert!(is_error);
    assert!(text.contains("no session"), "got: {text}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oneshot_tool_runs_through_the_same_surface() {
    let (mut client, _registry) = start_server(CONFIG).await;

    let (text, is_error) = client
        .call_tool("greet_run", json!({"args": ["world"]}))
        .await;
    assert!(!is_error, "run failed: {text}");
    assert!(text.contains("hello world"), "got: {text}");
    assert!(text.contains("[exit code 0]"), "got: {text}");
}
