//! Example of exposing host tools to sandboxed code.
//!
//! A static provider is turned into `servers.crm.*` wrapper modules, and the
//! sandboxed program calls them through the tool bridge. PII in the returned
//! result is tokenized.
//!
//! Run with: cargo run --example tool_generation
//!
//! Note: Requires python3 on PATH.

use std::sync::Arc;

use codemode_sandbox_rs::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let provider = StaticProvider::new("crm")
        .with_tool(
            Tool::new(
                "find_customer",
                "Look up a customer by name.",
                json!({
                    "type": "object",
                    "properties": {"name": {"type": "string", "description": "Full name"}},
                    "required": ["name"]
                }),
            ),
            |args| {
                ToolResult::json(&json!({
                    "name": args["name"],
                    "email": "jane.doe@example.com",
                    "phone": "555-123-4567"
                }))
            },
        )
        .with_tool(
            Tool::new(
                "send_email",
                "Send an email.",
                json!({
                    "type": "object",
                    "properties": {
                        "to": {"type": "string"},
                        "subject": {"type": "string"},
                        "body": {"type": "string"}
                    },
                    "required": ["to", "subject"]
                }),
            ),
            |args| ToolResult::json(&json!({"sent": true, "to": args["to"]})),
        );

    let workspace = tempfile::tempdir()?;
    let config = SandboxConfig::builder().workspace_root(workspace.path()).build();
    let orchestrator = Orchestrator::startup(config, Some(Arc::new(provider)))
        .await?
        .with_result_tokenization(true);

    println!("=== Generated tools ===");
    let report = orchestrator.generation_report();
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
    println!("{:#?}", orchestrator.list_available_tools().servers);

    let code = r#"
from servers.crm import find_customer, send_email

customer = await find_customer("Jane Doe")
receipt = await send_email(customer["email"], "Welcome", body="Hello!")
_result = {"customer": customer, "receipt": receipt}
"#;

    println!("\n=== Execution ===");
    let outcome = orchestrator.validate_then_execute(code).await?;
    if let Some(result) = outcome.execution() {
        println!("model-facing result: {:?}", result.result);
        if let Some(value) = &result.result {
            println!("real result: {}", orchestrator.tokenizer().untokenize(value));
        }
        println!("tokenizer stats: {:?}", orchestrator.tokenizer().get_stats());
    } else {
        println!("rejected:\n{}", outcome.validation().report());
    }

    Ok(())
}
