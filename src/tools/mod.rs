//! External tool sources and the plumbing that exposes them to sandboxed code.
//!
//! A [`ToolProvider`] speaks one external protocol. The
//! [`generator`](self::generator) turns a provider's tools into importable
//! wrapper modules, the [`ToolClient`] mediates every call those wrappers make
//! (applying privacy tokenization), and the [`bridge`](self::bridge) carries
//! calls from the child process back to the client.

pub mod bridge;
pub mod client;
pub mod generator;
pub mod mcp;
pub mod static_provider;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::sandbox::config::duration_serde;

pub use bridge::{BridgeHandle, ToolBridge};
pub use client::ToolClient;
pub use generator::{GenerationError, GenerationReport, ProviderReport, ToolGenerator};
pub use mcp::{McpHttpProvider, McpStdioProvider};
pub use static_provider::StaticProvider;

/// Errors from discovering or calling tools.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("unknown provider kind '{0}'")]
    UnknownKind(String),

    #[error("provider kind '{0}' is not implemented")]
    Unsupported(String),

    #[error("provider '{provider}' is misconfigured: {message}")]
    Config { provider: String, message: String },

    #[error("transport error talking to provider '{provider}': {source}")]
    Transport {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("protocol error from provider '{provider}': {message}")]
    Protocol { provider: String, message: String },

    #[error("tool '{tool}' not found on provider '{provider}'")]
    ToolNotFound { provider: String, tool: String },
}

impl ProviderError {
    pub(crate) fn transport(provider: &str, source: impl Into<anyhow::Error>) -> Self {
        ProviderError::Transport {
            provider: provider.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn protocol(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Protocol {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// A callable tool as reported by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema", alias = "inputSchema")]
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            provider_name: None,
        }
    }
}

/// Outcome of a tool call. `content` follows the MCP content-item shape
/// (`{"type": "text", "text": ...}` and friends) but is not restricted to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    /// A successful result with a single text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![serde_json::json!({"type": "text", "text": text.into()})],
            ..Self::default()
        }
    }

    /// A successful result carrying a JSON value as its text.
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// A tool-level failure (the call reached the tool and it reported an
    /// error).
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: vec![serde_json::json!({"type": "text", "text": message.clone()})],
            is_error: true,
            error_message: Some(message),
            metadata: None,
        }
    }
}

/// Protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKind {
    /// MCP over a child process's stdio.
    McpStdio,
    /// MCP JSON-RPC over HTTP.
    McpHttp,
    /// In-memory tools registered by the embedding application.
    Static,
    OpenApi,
    Utcp,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::McpStdio => "mcp_stdio",
            ProviderKind::McpHttp => "mcp_http",
            ProviderKind::Static => "static",
            ProviderKind::OpenApi => "openapi",
            ProviderKind::Utcp => "utcp",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mcp" | "mcp_stdio" | "stdio" => Ok(ProviderKind::McpStdio),
            "mcp_http" | "http" => Ok(ProviderKind::McpHttp),
            "static" => Ok(ProviderKind::Static),
            "openapi" => Ok(ProviderKind::OpenApi),
            "utcp" => Ok(ProviderKind::Utcp),
            other => Err(ProviderError::UnknownKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = ProviderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_string()
    }
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(60)
}

/// How to reach a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Server name; becomes the `servers/<name>` package.
    pub name: String,
    pub kind: ProviderKind,
    /// URL for HTTP-based kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Program to launch for stdio-based kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout, e.g. `"60s"`.
    #[serde(default = "default_provider_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            timeout: default_provider_timeout(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.command = Some(command.into());
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port` of the configured endpoint, for seeding the network
    /// policy. `None` when there is no endpoint or it does not parse.
    pub fn network_endpoint(&self) -> Option<String> {
        let url = reqwest::Url::parse(self.endpoint.as_deref()?).ok()?;
        let host = url.host_str()?.trim_start_matches('[').trim_end_matches(']');
        match url.port_or_known_default() {
            Some(port) => Some(format!("{}:{}", host, port)),
            None => Some(host.to_string()),
        }
    }
}

/// A source of callable tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name under which this provider's tools are generated.
    fn provider_name(&self) -> &str;

    /// The configuration the provider was built from.
    fn provider_config(&self) -> &ProviderConfig;

    /// List the tools the provider currently offers.
    async fn discover_tools(&self) -> Result<Vec<Tool>, ProviderError>;

    /// Invoke one tool.
    ///
    /// A tool that runs and reports failure is `Ok` with
    /// [`ToolResult::is_error`] set; `Err` means the call itself could not be
    /// completed.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError>;
}

/// Build the provider a configuration selects.
///
/// Network-backed providers connect lazily on first use, so this never
/// blocks.
pub fn create_provider(config: ProviderConfig) -> Result<Arc<dyn ToolProvider>, ProviderError> {
    match config.kind {
        ProviderKind::McpStdio => Ok(Arc::new(McpStdioProvider::new(config)?)),
        ProviderKind::McpHttp => Ok(Arc::new(McpHttpProvider::new(config)?)),
        ProviderKind::Static => Ok(Arc::new(StaticProvider::from_config(config))),
        ProviderKind::OpenApi | ProviderKind::Utcp => {
            Err(ProviderError::Unsupported(config.kind.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("MCP".parse::<ProviderKind>().unwrap(), ProviderKind::McpStdio);
        assert_eq!("mcp_http".parse::<ProviderKind>().unwrap(), ProviderKind::McpHttp);
        assert!(matches!(
            "grpc".parse::<ProviderKind>(),
            Err(ProviderError::UnknownKind(kind)) if kind == "grpc"
        ));
    }

    #[test]
    fn test_factory_rejects_unimplemented_kinds() {
        let err = create_provider(ProviderConfig::new("api", ProviderKind::OpenApi))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Unsupported(ref kind) if kind == "openapi"));

        let err = create_provider(ProviderConfig::new("local", ProviderKind::McpStdio))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Config { .. }));
    }

    #[test]
    fn test_factory_builds_static() {
        let provider = create_provider(ProviderConfig::new("mem", ProviderKind::Static)).unwrap();
        assert_eq!(provider.provider_name(), "mem");
        assert_eq!(provider.provider_config().kind, ProviderKind::Static);
    }

    #[test]
    fn test_config_deserialize() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "name": "github",
            "kind": "mcp_http",
            "endpoint": "https://mcp.example.com/rpc",
            "timeout": "15s"
        }))
        .unwrap();
        assert_eq!(config.kind, ProviderKind::McpHttp);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.network_endpoint().as_deref(), Some("mcp.example.com:443"));

        let bad = serde_json::from_value::<ProviderConfig>(serde_json::json!({
            "name": "x",
            "kind": "carrier-pigeon"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_network_endpoint_variants() {
        let config = ProviderConfig::new("a", ProviderKind::McpHttp).with_endpoint("http://10.0.0.5:8080/mcp");
        assert_eq!(config.network_endpoint().as_deref(), Some("10.0.0.5:8080"));
        let config = ProviderConfig::new("a", ProviderKind::McpHttp).with_endpoint("not a url");
        assert_eq!(config.network_endpoint(), None);
        assert_eq!(ProviderConfig::new("a", ProviderKind::Static).network_endpoint(), None);
    }

    #[test]
    fn test_tool_result_helpers() {
        let ok = ToolResult::text("hi");
        assert!(!ok.is_error);
        assert_eq!(ok.content[0]["text"], "hi");
        let err = ToolResult::error("boom");
        assert!(err.is_error);
        assert_eq!(err.error_message.as_deref(), Some("boom"));
    }
}
