//! Transports carry JSON-RPC messages between client and server.
//!
//! The production transport is stdio: requests arrive line-by-line on
//! stdin, responses leave line-by-line on stdout, and EOF on stdin shuts
//! the server down. All logging goes to stderr — stdout belongs to the
//! protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::TransportError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// A bidirectional JSON-RPC message channel.
#[async_trait]
pub trait Transport: Send {
    /// Receives the next request. `None` means the transport is closed.
    async fn recv(&mut self) -> Option<JsonRpcRequest>;

    /// Sends a response.
    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError>;

    /// Closes the transport.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Line-delimited JSON over stdin/stdout.
pub struct StdioTransport {
    stdin: BufReader<Stdin>,
    stdout: Stdout,
    closed: Arc<AtomicBool>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(stdin()),
            stdout: stdout(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn recv(&mut self) -> Option<JsonRpcRequest> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            let mut line = String::new();
            match self.stdin.read_line(&mut line).await {
                Ok(0) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcRequest>(&line) {
                        Ok(request) => return Some(request),
                        Err(e) => {
                            // Malformed lines are skipped, not fatal.
                            warn!(error = %e, line = line.trim(), "skipping malformed request");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "i/o error reading stdin");
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let json = serde_json::to_string(&response)?;
        self.stdout.write_all(json.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.stdout.flush().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory transport over channel pairs, for tests and embedding.
///
/// [`ChannelTransport::pair`] returns the server half plus the client-side
/// endpoints for driving it.
pub struct ChannelTransport {
    incoming: mpsc::Receiver<JsonRpcRequest>,
    outgoing: mpsc::Sender<JsonRpcResponse>,
    closed: bool,
}

impl ChannelTransport {
    /// Creates a connected (server, client-request-sender,
    /// client-response-receiver) triple.
    pub fn pair() -> (
        Self,
        mpsc::Sender<JsonRpcRequest>,
        mpsc::Receiver<JsonRpcResponse>,
    ) {
        let (request_tx, request_rx) = mpsc::channel(32);
        let (response_tx, response_rx) = mpsc::channel(32);
        (
            Self {
                incoming: request_rx,
                outgoing: response_tx,
                closed: false,
            },
            request_tx,
            response_rx,
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<JsonRpcRequest> {
        if self.closed {
            return None;
        }
        let request = self.incoming.recv().await;
        if request.is_none() {
            self.closed = true;
        }
        request
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outgoing
            .send(response)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stdio_close_is_idempotent() {
        let mut transport = StdioTransport::new();
        assert!(!transport.is_closed());
        transport.close().await.expect("close");
        transport.close().await.expect("second close");
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn stdio_send_after_close_fails() {
        let mut transport = StdioTransport::new();
        transport.close().await.expect("close");
        let result = transport
            .send(JsonRpcResponse::success(Some(json!(1)), json!({})))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn channel_transport_round_trips() {
        let (mut server, request_tx, mut response_rx) = ChannelTransport::pair();

        request_tx
            .send(JsonRpcRequest::new(Some(json!(1)), "ping", None))
            .await
            .expect("send request");

        let request = server.recv().await.expect("request arrives");
        assert_eq!(request.method, "ping");

        server
            .send(JsonRpcResponse::success(request.id, json!({"ok": true})))
            .await
            .expect("send response");

        let response = response_rx.recv().await.expect("response arrives");
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn channel_transport_closes_on_client_drop() {
        let (mut server, request_tx, _response_rx) = ChannelTransport::pair();
        drop(request_tx);
        assert!(server.recv().await.is_none());
        assert!(server.is_closed());
    }
}
