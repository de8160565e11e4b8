//! Loopback channel that carries tool calls from the child process back to
//! the host's [`ToolClient`].
//!
//! One bridge runs per execution. The child learns the address and a random
//! token from its environment; each request is one line of JSON
//! `{token, server, tool, arguments}` and is answered by one line
//! `{ok, result}` or `{ok: false, error, error_type}`.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

use super::{ProviderError, ToolClient, ToolResult};
use crate::error::ErrorKind;

/// Environment variable holding the bridge's `host:port`.
pub const BRIDGE_ADDR_ENV: &str = "SANDBOX_TOOL_BRIDGE";
/// Environment variable holding the per-execution token.
pub const BRIDGE_TOKEN_ENV: &str = "SANDBOX_TOOL_TOKEN";

const MAX_CONNECTION_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct BridgeRequest {
    token: String,
    server: String,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_type: Option<String>,
}

impl BridgeResponse {
    fn success(result: ToolResult) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            error_type: None,
        }
    }

    fn failure(error: impl Into<String>, error_type: &str) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            error_type: Some(error_type.to_string()),
        }
    }
}

/// Starts bridges.
pub struct ToolBridge;

impl ToolBridge {
    /// Bind an ephemeral loopback port and start serving `client`.
    pub async fn start(client: Arc<ToolClient>) -> std::io::Result<BridgeHandle> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let token: Arc<str> = Arc::from(uuid::Uuid::new_v4().simple().to_string());
        let task = tokio::spawn(accept_loop(listener, client, token.clone()));
        tracing::debug!(%addr, "tool bridge listening");
        Ok(BridgeHandle { addr, token, task })
    }
}

/// A running bridge. Dropping it stops the listener and every open
/// connection.
pub struct BridgeHandle {
    addr: SocketAddr,
    token: Arc<str>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Environment entries the child needs to reach this bridge.
    pub fn env(&self) -> [(&'static str, String); 2] {
        [
            (BRIDGE_ADDR_ENV, self.addr.to_string()),
            (BRIDGE_TOKEN_ENV, self.token.to_string()),
        ]
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, client: Arc<ToolClient>, token: Arc<str>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "tool bridge connection");
                    connections.spawn(serve_connection(stream, client.clone(), token.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tool bridge accept failed");
                    break;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(stream: TcpStream, client: Arc<ToolClient>, token: Arc<str>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_CONNECTION_BYTES));
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "tool bridge read failed");
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_request(&client, &token, line.trim()).await;
        let mut payload = serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::json!({
                "ok": false,
                "error": format!("cannot encode tool result: {}", e),
                "error_type": ErrorKind::ProviderError.as_str(),
            })
            .to_string()
        });
        payload.push('\n');
        if write_half.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn handle_request(client: &ToolClient, token: &str, line: &str) -> BridgeResponse {
    // Only JSON objects are requests; arrays would deserialize positionally.
    let request = match serde_json::from_str::<Value>(line) {
        Ok(value @ Value::Object(_)) => serde_json::from_value::<BridgeRequest>(value),
        Ok(_) => {
            return BridgeResponse::failure("malformed bridge request: expected a JSON object", "BridgeProtocolError")
        }
        Err(e) => Err(e),
    };
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            return BridgeResponse::failure(format!("malformed bridge request: {}", e), "BridgeProtocolError")
        }
    };

    if request.token != token {
        tracing::warn!(server = %request.server, tool = %request.tool, "tool bridge request with bad token");
        return BridgeResponse::failure("invalid bridge token", "BridgeAuthError");
    }

    if !client.serves(&request.server) {
        let err = ProviderError::ToolNotFound {
            provider: request.server,
            tool: request.tool,
        };
        return BridgeResponse::failure(err.to_string(), ErrorKind::ProviderError.as_str());
    }

    match client.call_tool(&request.tool, request.arguments).await {
        Ok(result) => BridgeResponse::success(result),
        Err(e) => BridgeResponse::failure(e.to_string(), ErrorKind::ProviderError.as_str()),
    }
}
