//! In-memory provider for tools implemented by the embedding application.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{ProviderConfig, ProviderError, ProviderKind, Tool, ToolProvider, ToolResult};

type Handler = Arc<dyn Fn(Value) -> ToolResult + Send + Sync>;

/// Tools backed by Rust closures.
pub struct StaticProvider {
    config: ProviderConfig,
    tools: BTreeMap<String, (Tool, Handler)>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(ProviderConfig::new(name, ProviderKind::Static))
    }

    pub fn from_config(config: ProviderConfig) -> Self {
        Self {
            config,
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool and the closure that implements it.
    pub fn with_tool<F>(mut self, tool: Tool, handler: F) -> Self
    where
        F: Fn(Value) -> ToolResult + Send + Sync + 'static,
    {
        self.tools.insert(tool.name.clone(), (tool, Arc::new(handler)));
        self
    }
}

#[async_trait]
impl ToolProvider for StaticProvider {
    fn provider_name(&self) -> &str {
        &self.config.name
    }

    fn provider_config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn discover_tools(&self) -> Result<Vec<Tool>, ProviderError> {
        Ok(self
            .tools
            .values()
            .map(|(tool, _)| Tool {
                provider_name: Some(self.config.name.clone()),
                ..tool.clone()
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        let (_, handler) = self.tools.get(name).ok_or_else(|| ProviderError::ToolNotFound {
            provider: self.config.name.clone(),
            tool: name.to_string(),
        })?;
        Ok(handler(arguments))
    }
}
