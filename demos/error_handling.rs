//! Example demonstrating error handling patterns.
//!
//! This example shows how each failure mode surfaces:
//! - Syntax errors and blocked constructs (validation)
//! - Python exceptions
//! - Policy violations
//! - Timeouts
//! - Configuration errors
//!
//! Run with: cargo run --example error_handling
//!
//! Note: Requires python3 on PATH.

use std::time::Duration;

use codemode_sandbox_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Error Handling Example ===\n");

    let workspace = tempfile::tempdir()?;
    let config = SandboxConfig::builder()
        .workspace_root(workspace.path())
        .timeout(Duration::from_secs(5))
        .build();

    let executor = match CodeExecutor::new(config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to create executor: {}", e);
            return Err(e);
        }
    };
    let engine = SecurityEngine::default();

    // Example 1: syntax error never reaches the executor
    println!("--- Test 1: Syntax error ---");
    {
        let validation = engine.validate("def broken(:\n    pass");
        println!("blocked: {}", validation.blocked);
        println!("kind: {:?}", validation.block_kind());
        println!("{}", validation.report());
    }

    // Example 2: blocked call with line information
    println!("\n--- Test 2: Blocked construct ---");
    {
        let validation = engine.validate("x = 1\neval('x + 1')");
        for violation in &validation.blocking_violations {
            println!("{} at line {}: {:?}", violation.rule_name, violation.line, violation.snippet);
        }
    }

    // Example 3: Python exception
    println!("\n--- Test 3: Python ValueError ---");
    {
        let result = executor.execute("int('not a number')", None).await?;
        println!("error_type: {:?}", result.error_type);
        println!("error: {:?}", result.error);
        if let Some(tb) = &result.traceback {
            println!("traceback: {} lines", tb.lines().count());
        }
    }

    // Example 4: policy violation
    println!("\n--- Test 4: Filesystem policy ---");
    {
        let result = executor.execute("open('/etc/shadow').read()", None).await?;
        println!("policy violation: {}", result.is_policy_violation());
        println!("error: {:?}", result.error);
    }

    // Example 5: timeout
    println!("\n--- Test 5: Timeout ---");
    {
        let limits = ExecutionLimits::new().timeout(Duration::from_secs(1));
        let result = executor.execute("while True:\n    pass", Some(limits)).await?;
        println!("timed out: {}", result.is_timeout());
        println!("error: {:?}", result.error);
    }

    // Example 6: configuration error
    println!("\n--- Test 6: Missing interpreter ---");
    {
        let config = SandboxConfig::builder()
            .workspace_root(workspace.path())
            .python_path("/nonexistent/python3")
            .build();
        match CodeExecutor::new(config) {
            Err(e) if e.is_interpreter_missing() => println!("expected error: {}", e),
            Err(e) => println!("unexpected error: {}", e),
            Ok(_) => println!("unexpectedly found an interpreter"),
        }
    }

    Ok(())
}
