//! Example of concurrent executions sharing one executor.
//!
//! Each execution runs in its own child process, so tasks never share
//! interpreter state.
//!
//! Run with: cargo run --example concurrent_execution
//!
//! Note: Requires python3 on PATH.

use std::sync::Arc;
use std::time::{Duration, Instant};

use codemode_sandbox_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Concurrent Execution Example ===\n");

    let workspace = tempfile::tempdir()?;
    let config = SandboxConfig::builder()
        .workspace_root(workspace.path())
        .timeout(Duration::from_secs(10))
        .build();
    let executor = Arc::new(CodeExecutor::new(config)?);

    let tasks = vec![
        ("Task 1", "_result = sum([i**2 for i in range(100)])", "Sum of squares"),
        ("Task 2", "_result = len([x for x in range(1000) if x % 3 == 0])", "Count divisible by 3"),
        ("Task 3", "_result = ''.join([chr(65 + i % 26) for i in range(50)])", "Generate letters"),
        ("Task 4", "import time\ntime.sleep(0.5)\n_result = 'slow'", "Sleep"),
        ("Task 5", "raise KeyError('missing')", "Failing task"),
    ];

    let start = Instant::now();
    let handles: Vec<_> = tasks
        .into_iter()
        .map(|(name, code, description)| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let started = Instant::now();
                let result = executor.execute(code, None).await;
                (name, description, result, started.elapsed())
            })
        })
        .collect();

    for handle in handles {
        let (name, description, result, elapsed) = handle.await.expect("task panicked");
        match result {
            Ok(result) if result.success => {
                println!("{} ({}): {:?} in {:?}", name, description, result.result, elapsed)
            }
            Ok(result) => println!(
                "{} ({}): failed with {:?}: {:?}",
                name, description, result.error_type, result.error
            ),
            Err(e) => println!("{} ({}): sandbox error: {}", name, description, e),
        }
    }

    println!("\nAll tasks finished in {:?}", start.elapsed());
    Ok(())
}
