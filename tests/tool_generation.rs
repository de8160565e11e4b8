//! Tool discovery and wrapper generation against real providers.

use std::path::{Path, PathBuf};
use std::process::Command;

use codemode_sandbox_rs::tools::{
    create_provider, ProviderConfig, ProviderKind, StaticProvider, Tool, ToolGenerator, ToolProvider,
    ToolResult,
};
use serde_json::json;

/// A minimal MCP server speaking newline-delimited JSON-RPC on stdio.
const FAKE_MCP_SERVER: &str = r#"
import json
import sys

TOOLS = [
    {
        "name": "get_forecast",
        "description": "Forecast for a city.",
        "inputSchema": {
            "type": "object",
            "properties": {"city": {"type": "string"}, "days": {"type": "integer"}},
            "required": ["city"],
        },
    },
    {"name": "broken", "description": "", "inputSchema": {"type": "object", "properties": "oops"}},
]

for line in sys.stdin:
    message = json.loads(line)
    if "id" not in message:
        continue
    method = message["method"]
    if method == "initialize":
        result = {"protocolVersion": "2024-11-05", "capabilities": {}, "serverInfo": {"name": "fake"}}
    elif method == "tools/list":
        result = {"tools": TOOLS}
    elif method == "tools/call":
        args = message["params"]["arguments"]
        result = {"content": [{"type": "text", "text": json.dumps({"city": args["city"], "high": 21})}]}
    else:
        sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": message["id"], "error": {"code": -32601, "message": "no such method"}}) + "\n")
        sys.stdout.flush()
        continue
    sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": message["id"], "result": result}) + "\n")
    sys.stdout.flush()
"#;

fn python() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join("python3"))
        .find(|candidate| candidate.is_file())
}

fn py_compile(python: &Path, file: &Path) -> bool {
    Command::new(python)
        .args(["-m", "py_compile"])
        .arg(file)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn static_provider(count: usize) -> StaticProvider {
    (0..count).fold(StaticProvider::new("inventory"), |provider, i| {
        provider.with_tool(
            Tool::new(
                format!("tool-{}", i),
                format!("Tool number {}", i),
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer"},
                        "class": {"type": ["boolean", "null"]}
                    },
                    "required": ["query"]
                }),
            ),
            |_| ToolResult::text("ok"),
        )
    })
}

#[tokio::test]
async fn test_n_tools_produce_n_files_and_init() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ToolGenerator::new(dir.path().join("servers")).unwrap();

    let report = generator.generate(&static_provider(5)).await.unwrap();
    assert_eq!(report.tool_count, 5);
    assert!(report.errors.is_empty());
    assert!(report.verification.all_exist);

    let package = dir.path().join("servers/inventory");
    let wrappers: Vec<_> = std::fs::read_dir(&package)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".py") && name != "__init__.py")
        .collect();
    assert_eq!(wrappers.len(), 5);
    assert!(package.join("__init__.py").is_file());

    if let Some(python) = python() {
        for path in report.paths.iter().chain([&report.init_path]) {
            assert!(py_compile(&python, path), "{} does not compile", path.display());
        }
        assert!(py_compile(&python, &dir.path().join("servers/_bridge.py")));
    }
}

#[tokio::test]
async fn test_mcp_stdio_discovery_and_call() {
    let Some(python) = python() else {
        eprintln!("skipping: python3 not found");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("fake_mcp.py");
    std::fs::write(&script, FAKE_MCP_SERVER).unwrap();

    let config = ProviderConfig::new("weather", ProviderKind::McpStdio).with_command(
        python.display().to_string(),
        vec![script.display().to_string()],
    );
    let provider = create_provider(config).unwrap();

    let tools = provider.discover_tools().await.unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].provider_name.as_deref(), Some("weather"));

    let generator = ToolGenerator::new(dir.path().join("servers")).unwrap();
    let report = generator.generate(provider.as_ref()).await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.tool_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].tool, "broken");
    assert!(dir.path().join("servers/weather/get_forecast.py").is_file());

    let result = provider
        .call_tool("get_forecast", json!({"city": "Oslo"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    let text = result.content[0]["text"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<serde_json::Value>(text).unwrap()["city"], "Oslo");

    let err = provider.call_tool("missing", json!({})).await;
    assert!(err.is_err());
}

#[test]
fn test_unknown_and_unsupported_kinds() {
    assert!("graphql".parse::<ProviderKind>().is_err());
    let config = ProviderConfig::new("spec", ProviderKind::OpenApi);
    assert!(create_provider(config).is_err());
}
