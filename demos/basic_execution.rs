//! Basic example of validating and executing generated Python code.
//!
//! Run with: cargo run --example basic_execution
//!
//! Note: Requires python3 on PATH.

use std::time::Duration;

use codemode_sandbox_rs::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let workspace = tempfile::tempdir()?;
    let config = SandboxConfig::builder()
        .workspace_root(workspace.path())
        .timeout(Duration::from_secs(5))
        .max_memory(256 * 1024 * 1024) // 256MB
        .build();

    println!("Starting with config: {:?}", config);

    let orchestrator = match Orchestrator::startup(config, None).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            eprintln!("Make sure python3 is on PATH");
            return Err(e);
        }
    };

    // Simple arithmetic
    println!("\n=== Test 1: Result slot ===");
    report(orchestrator.validate_then_execute("_result = 1 + 1").await?);

    // Printed output and a structured result
    println!("\n=== Test 2: Loop with output ===");
    let code = r#"
squares = []
for i in range(5):
    print(f"Count: {i}")
    squares.append(i * i)
_result = {"squares": squares}
"#;
    report(orchestrator.validate_then_execute(code).await?);

    // Top-level await
    println!("\n=== Test 3: Async code ===");
    let code = "import asyncio\nawait asyncio.sleep(0.1)\n_result = 'slept'";
    report(orchestrator.validate_then_execute(code).await?);

    // Blocked before execution
    println!("\n=== Test 4: Blocked source ===");
    report(orchestrator.validate_then_execute("import subprocess\nsubprocess.run(['ls'])").await?);

    Ok(())
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Rejected { validation, .. } => {
            println!("rejected:\n{}", validation.report());
        }
        Outcome::Executed { validation, result, .. } => {
            for warning in &validation.warnings {
                println!("warning: {}", warning);
            }
            println!("success: {}", result.success);
            println!("result: {:?}", result.result);
            println!("stdout: {}", result.stdout);
            println!("duration: {}ms", result.metadata.duration_ms);
        }
    }
}
