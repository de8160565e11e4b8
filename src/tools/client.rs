//! Mediates every tool call made from sandboxed code.

use std::sync::Arc;

use serde_json::Value;

use super::{ProviderError, ToolProvider, ToolResult};
use crate::privacy::PrivacyTokenizer;

/// Applies privacy tokenization around a provider.
///
/// Arguments are tokenized before they are logged, then untokenized again
/// for the real call, so chained tool calls see real values while anything
/// model-facing only ever sees tokens. Result content is untokenized before
/// it is handed back to the sandboxed program.
pub struct ToolClient {
    provider: Arc<dyn ToolProvider>,
    tokenizer: Arc<PrivacyTokenizer>,
}

impl ToolClient {
    pub fn new(provider: Arc<dyn ToolProvider>, tokenizer: Arc<PrivacyTokenizer>) -> Self {
        Self { provider, tokenizer }
    }

    pub fn provider(&self) -> &Arc<dyn ToolProvider> {
        &self.provider
    }

    pub fn tokenizer(&self) -> &Arc<PrivacyTokenizer> {
        &self.tokenizer
    }

    /// Whether `server` names the provider this client fronts.
    pub fn serves(&self, server: &str) -> bool {
        self.provider.provider_name() == server
    }

    /// Call `tool` on the active provider.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        let exposed = self.tokenizer.tokenize(&arguments);
        tracing::info!(
            provider = self.provider.provider_name(),
            tool,
            arguments = %exposed,
            "tool call"
        );

        let real_arguments = self.tokenizer.untokenize(&exposed);
        let ToolResult {
            content,
            is_error,
            error_message,
            metadata,
        } = self.provider.call_tool(tool, real_arguments).await?;

        if is_error {
            tracing::warn!(
                provider = self.provider.provider_name(),
                tool,
                error = error_message.as_deref().unwrap_or(""),
                "tool reported an error"
            );
        }

        Ok(ToolResult {
            content: content.iter().map(|item| self.tokenizer.untokenize(item)).collect(),
            is_error,
            error_message: error_message.map(|message| self.tokenizer.untokenize_str(&message)),
            metadata,
        })
    }
}
