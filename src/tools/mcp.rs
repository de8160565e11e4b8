//! Model Context Protocol providers.
//!
//! Both transports speak the same JSON-RPC 2.0 dialect: `initialize`, the
//! `notifications/initialized` notification, then `tools/list` (with cursor
//! pagination) and `tools/call`. Sessions are opened lazily on first use.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::{ProviderConfig, ProviderError, Tool, ToolProvider, ToolResult};

/// MCP protocol revision sent during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    fn call(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    structured_content: Option<Value>,
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Pull `result` out of a response envelope, turning a JSON-RPC error into a
/// protocol error.
fn unwrap_response(provider: &str, message: Value) -> Result<Value, ProviderError> {
    if let Some(error) = message.get("error") {
        let error: JsonRpcError = serde_json::from_value(error.clone())
            .map_err(|e| ProviderError::protocol(provider, format!("malformed error object: {}", e)))?;
        return Err(ProviderError::protocol(
            provider,
            format!("{} ({})", error.message, error.code),
        ));
    }
    message
        .get("result")
        .cloned()
        .ok_or_else(|| ProviderError::protocol(provider, "response has neither result nor error"))
}

fn convert_tools(provider: &str, tools: Vec<McpTool>) -> Vec<Tool> {
    tools
        .into_iter()
        .map(|tool| Tool {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
            provider_name: Some(provider.to_string()),
        })
        .collect()
}

fn convert_call_result(result: CallToolResult) -> ToolResult {
    let error_message = if result.is_error {
        result
            .content
            .iter()
            .find_map(|item| item.get("text").and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| Some("tool reported an error".to_string()))
    } else {
        None
    };
    ToolResult {
        content: result.content,
        is_error: result.is_error,
        error_message,
        metadata: result.structured_content,
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(provider: &str, method: &str, value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|e| ProviderError::protocol(provider, format!("invalid {} result: {}", method, e)))
}

// ============================================================================
// stdio
// ============================================================================

enum RpcFailure {
    Transport(anyhow::Error),
    Protocol(ProviderError),
}

struct StdioSession {
    // Held so the server is killed when the session is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl StdioSession {
    async fn spawn(config: &ProviderConfig, command: &str) -> anyhow::Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn MCP server: {} {:?}", command, config.args))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    async fn send(&mut self, message: &JsonRpcRequest<'_>) -> anyhow::Result<()> {
        let line = serde_json::to_string(message)? + "\n";
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn request(
        &mut self,
        provider: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcFailure> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&JsonRpcRequest::call(id, method, params))
            .await
            .map_err(RpcFailure::Transport)?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| RpcFailure::Transport(e.into()))?;
            if read == 0 {
                return Err(RpcFailure::Transport(anyhow!("MCP server closed stdout")));
            }
            let Ok(message) = serde_json::from_str::<Value>(line.trim()) else {
                tracing::debug!(provider, line = line.trim(), "ignoring non-JSON output from MCP server");
                continue;
            };

            if let Some(server_method) = message.get("method").and_then(Value::as_str) {
                // Server-initiated request (e.g. ping) needs an answer; plain
                // notifications do not.
                if let Some(server_id) = message.get("id").cloned() {
                    tracing::debug!(provider, method = server_method, "answering server request");
                    let reply = json!({"jsonrpc": "2.0", "id": server_id, "result": {}});
                    let reply = reply.to_string() + "\n";
                    self.stdin
                        .write_all(reply.as_bytes())
                        .await
                        .map_err(|e| RpcFailure::Transport(e.into()))?;
                }
                continue;
            }

            if message.get("id").and_then(Value::as_u64) == Some(id) {
                return unwrap_response(provider, message).map_err(RpcFailure::Protocol);
            }
        }
    }
}

/// MCP server launched as a child process and spoken to over stdio.
pub struct McpStdioProvider {
    config: ProviderConfig,
    command: String,
    session: Mutex<Option<StdioSession>>,
}

impl McpStdioProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let command = config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::Config {
                provider: config.name.clone(),
                message: "stdio provider requires a command".to_string(),
            })?;
        Ok(Self {
            config,
            command,
            session: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<StdioSession, ProviderError> {
        let name = self.config.name.as_str();
        let mut session = StdioSession::spawn(&self.config, &self.command)
            .await
            .map_err(|e| ProviderError::transport(name, e))?;

        let init = tokio::time::timeout(
            self.config.timeout,
            session.request(name, "initialize", Some(initialize_params())),
        )
        .await
        .map_err(|_| ProviderError::transport(name, anyhow!("initialize timed out")))?;
        let init = match init {
            Ok(value) => value,
            Err(RpcFailure::Transport(e)) => return Err(ProviderError::transport(name, e)),
            Err(RpcFailure::Protocol(e)) => return Err(e),
        };
        session
            .send(&JsonRpcRequest::notification("notifications/initialized"))
            .await
            .map_err(|e| ProviderError::transport(name, e))?;

        let server = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(provider = name, server, "MCP stdio session initialized");
        Ok(session)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProviderError> {
        let name = self.config.name.as_str();
        let mut guard = self.session.lock().await;
        let mut session = match guard.take() {
            Some(session) => session,
            None => self.connect().await?,
        };

        let outcome = tokio::time::timeout(self.config.timeout, session.request(name, method, params)).await;
        match outcome {
            Ok(Ok(value)) => {
                *guard = Some(session);
                Ok(value)
            }
            Ok(Err(RpcFailure::Protocol(e))) => {
                *guard = Some(session);
                Err(e)
            }
            // The session is dropped (and the server killed) so the next call
            // starts fresh.
            Ok(Err(RpcFailure::Transport(e))) => Err(ProviderError::transport(name, e)),
            Err(_) => Err(ProviderError::transport(
                name,
                anyhow!("{} timed out after {:?}", method, self.config.timeout),
            )),
        }
    }
}

#[async_trait]
impl ToolProvider for McpStdioProvider {
    fn provider_name(&self) -> &str {
        &self.config.name
    }

    fn provider_config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn discover_tools(&self) -> Result<Vec<Tool>, ProviderError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult =
                parse_result(&self.config.name, "tools/list", self.request("tools/list", params).await?)?;
            tools.extend(convert_tools(&self.config.name, page.tools));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result: CallToolResult =
            parse_result(&self.config.name, "tools/call", self.request("tools/call", Some(params)).await?)?;
        Ok(convert_call_result(result))
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Default)]
struct HttpSession {
    initialized: bool,
    session_id: Option<String>,
}

/// MCP server reached by JSON-RPC POSTs ("streamable HTTP").
pub struct McpHttpProvider {
    config: ProviderConfig,
    endpoint: reqwest::Url,
    http: reqwest::Client,
    session: Mutex<HttpSession>,
    next_id: AtomicU64,
}

impl McpHttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let misconfigured = |message: String| ProviderError::Config {
            provider: config.name.clone(),
            message,
        };
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| misconfigured("HTTP provider requires an endpoint".to_string()))?;
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| misconfigured(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| misconfigured(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            endpoint,
            http,
            session: Mutex::new(HttpSession::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// POST one message. Returns the session header (if any) and, for calls,
    /// the response envelope whose id matches.
    async fn post(
        &self,
        message: &JsonRpcRequest<'_>,
        session_id: Option<&str>,
    ) -> Result<(Option<String>, Option<Value>), ProviderError> {
        let name = self.config.name.as_str();
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await.map_err(|e| ProviderError::transport(name, e))?;
        let status = response.status();
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await.map_err(|e| ProviderError::transport(name, e))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(ProviderError::protocol(name, format!("HTTP {}: {}", status, snippet)));
        }

        let Some(id) = message.id else {
            return Ok((session, None));
        };

        let envelope = if is_sse {
            parse_sse_messages(&body)
                .into_iter()
                .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
        } else {
            serde_json::from_str::<Value>(&body).ok()
        };
        let envelope = envelope
            .ok_or_else(|| ProviderError::protocol(name, format!("no response for request {}", id)))?;
        Ok((session, Some(envelope)))
    }

    async fn ensure_initialized(&self) -> Result<Option<String>, ProviderError> {
        let mut state = self.session.lock().await;
        if state.initialized {
            return Ok(state.session_id.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (session_id, envelope) = self
            .post(&JsonRpcRequest::call(id, "initialize", Some(initialize_params())), None)
            .await?;
        let envelope = envelope.unwrap_or(Value::Null);
        unwrap_response(&self.config.name, envelope)?;

        self.post(
            &JsonRpcRequest::notification("notifications/initialized"),
            session_id.as_deref(),
        )
        .await?;

        tracing::info!(provider = %self.config.name, endpoint = %self.endpoint, "MCP HTTP session initialized");
        state.initialized = true;
        state.session_id = session_id;
        Ok(state.session_id.clone())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProviderError> {
        let session_id = self.ensure_initialized().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (_, envelope) = self
            .post(&JsonRpcRequest::call(id, method, params), session_id.as_deref())
            .await?;
        unwrap_response(&self.config.name, envelope.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ToolProvider for McpHttpProvider {
    fn provider_name(&self) -> &str {
        &self.config.name
    }

    fn provider_config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn discover_tools(&self) -> Result<Vec<Tool>, ProviderError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult =
                parse_result(&self.config.name, "tools/list", self.request("tools/list", params).await?)?;
            tools.extend(convert_tools(&self.config.name, page.tools));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result: CallToolResult =
            parse_result(&self.config.name, "tools/call", self.request("tools/call", Some(params)).await?)?;
        Ok(convert_call_result(result))
    }
}

/// Collect the JSON payloads of a `text/event-stream` body. Multi-line
/// `data:` fields are joined with newlines per the SSE format.
fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    let mut flush = |data: &mut String| {
        if !data.is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(data) {
                messages.push(value);
            }
            data.clear();
        }
    };

    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.trim().is_empty() {
            flush(&mut data);
        }
    }
    flush(&mut data);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ProviderKind;

    #[test]
    fn test_unwrap_response() {
        let ok = unwrap_response("p", json!({"jsonrpc": "2.0", "id": 1, "result": {"x": 1}})).unwrap();
        assert_eq!(ok, json!({"x": 1}));

        let err = unwrap_response(
            "p",
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no such method (-32601)"));

        assert!(unwrap_response("p", json!({"id": 1})).is_err());
    }

    #[test]
    fn test_convert_call_result() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "rate limited"}],
            "isError": true
        }))
        .unwrap();
        let converted = convert_call_result(result);
        assert!(converted.is_error);
        assert_eq!(converted.error_message.as_deref(), Some("rate limited"));

        let result: CallToolResult = serde_json::from_value(json!({
            "content": [],
            "structuredContent": {"temp": 21}
        }))
        .unwrap();
        let converted = convert_call_result(result);
        assert!(!converted.is_error);
        assert_eq!(converted.metadata, Some(json!({"temp": 21})));
    }

    #[test]
    fn test_list_tools_page() {
        let page: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "search", "description": "Search", "inputSchema": {"type": "object"}}],
            "nextCursor": "abc"
        }))
        .unwrap();
        let tools = convert_tools("docs", page.tools);
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[0].provider_name.as_deref(), Some("docs"));
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_sse_messages() {
        let body = "event: message\ndata: {\"id\": 3, \"result\": {}}\n\n: keepalive\n\ndata: not json\n\ndata: {\"id\": 4, \"result\": 1}\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["id"], 4);

        let body = "data: {\"id\": 7,\ndata: \"result\": true}\n\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages, vec![json!({"id": 7, "result": true})]);
    }

    #[test]
    fn test_constructors_validate_config() {
        let missing = McpHttpProvider::new(ProviderConfig::new("h", ProviderKind::McpHttp));
        assert!(matches!(missing, Err(ProviderError::Config { .. })));
        let bad = McpHttpProvider::new(ProviderConfig::new("h", ProviderKind::McpHttp).with_endpoint("::"));
        assert!(matches!(bad, Err(ProviderError::Config { .. })));
        let ok = McpStdioProvider::new(
            ProviderConfig::new("s", ProviderKind::McpStdio).with_command("server", vec![]),
        );
        assert!(ok.is_ok());
    }
}
