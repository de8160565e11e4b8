//! Security tests to verify sandbox isolation.
//!
//! These run real child interpreters. Each test skips itself when no
//! `python3` is available on `PATH`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codemode_sandbox_rs::prelude::*;
use serde_json::json;

/// Helper to create a test sandbox config rooted at `workspace`.
fn test_config(workspace: &Path) -> SandboxConfig {
    SandboxConfig::builder()
        .workspace_root(workspace)
        .timeout(Duration::from_secs(10))
        .max_memory(512 * 1024 * 1024)
        .build()
}

/// Build an executor, or `None` when the host has no interpreter.
fn executor(config: SandboxConfig) -> Option<CodeExecutor> {
    match CodeExecutor::new(config) {
        Ok(executor) => Some(executor),
        Err(e) if e.is_interpreter_missing() => {
            eprintln!("skipping: {}", e);
            None
        }
        Err(e) => panic!("failed to create executor: {}", e),
    }
}

/// Test the simplest end-to-end result.
#[tokio::test]
async fn test_result_slot() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let result = executor.execute("_result = 1 + 1", None).await.unwrap();
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(result.result, Some(json!(2)));
    assert_eq!(result.metadata.exit_code, Some(0));
}

/// Test that `result` is used when `_result` is unset, and that printed
/// output is kept apart from the result.
#[tokio::test]
async fn test_fallback_slot_and_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let result = executor
        .execute("print('hello')\nresult = {'items': [1, 2], 'ok': True}", None)
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.result, Some(json!({"items": [1, 2], "ok": true})));
    assert_eq!(result.stdout, "hello\n");
}

/// Test that top-level await runs inside an event loop.
#[tokio::test]
async fn test_top_level_await() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = "import asyncio\nawait asyncio.sleep(0)\n_result = 'async'";
    let result = executor.execute(source, None).await.unwrap();
    assert_eq!(result.result, Some(json!("async")));
}

/// Test that exceptions come back as data with a trimmed traceback.
#[tokio::test]
async fn test_runtime_exception_is_data() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = "def f():\n    raise ValueError('bad input')\nf()";
    let result = executor.execute(source, None).await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_type.as_deref(), Some("ValueError"));
    assert_eq!(result.error.as_deref(), Some("bad input"));
    let traceback = result.traceback.unwrap();
    assert!(traceback.contains("<sandbox>"));
    assert!(traceback.contains("raise ValueError"));
}

/// Test that dangerous source never reaches the executor.
#[tokio::test]
async fn test_os_system_blocked_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = match Orchestrator::startup(test_config(dir.path()), None).await {
        Ok(orchestrator) => orchestrator,
        Err(e) if e.is_interpreter_missing() => return,
        Err(e) => panic!("startup failed: {}", e),
    };

    let outcome = orchestrator
        .validate_then_execute("import os\nos.system('ls')")
        .await
        .unwrap();
    assert!(outcome.is_rejected());
    let names: Vec<&str> = outcome
        .validation()
        .blocking_violations
        .iter()
        .map(|v| v.rule_name.as_str())
        .collect();
    assert!(names.contains(&"dangerous_import") || names.contains(&"dangerous_call"));
}

/// Test that infinite loops are killed at the timeout.
#[tokio::test]
async fn test_infinite_loop_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let started = Instant::now();
    let result = executor
        .execute(
            "while True:\n    pass",
            Some(ExecutionLimits::new().timeout(Duration::from_secs(2))),
        )
        .await
        .unwrap();

    assert!(!result.is_success());
    assert!(result.is_timeout());
    assert_eq!(result.error_type.as_deref(), Some("ExecutionTimeout"));
    assert!(result.error.as_deref().unwrap().contains("timeout"));
    assert!(started.elapsed() < Duration::from_secs(8), "took {:?}", started.elapsed());
}

/// Test that a timed-out child does not keep running.
#[cfg(unix)]
#[tokio::test]
async fn test_timed_out_child_is_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = "import os\n_pid = os.getpid()\nopen('pid.txt', 'w').write(str(_pid))\nwhile True:\n    pass";
    let result = executor
        .execute(source, Some(ExecutionLimits::new().timeout(Duration::from_secs(1))))
        .await
        .unwrap();
    assert!(result.is_timeout());

    let pid: i32 = std::fs::read_to_string(dir.path().join("pid.txt"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    assert!(!alive, "child {} still running", pid);
}

/// Test that outbound network access is denied.
#[tokio::test]
async fn test_network_access_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = r#"
import socket
s = socket.socket(socket.AF_INET, socket.SOCK_STREAM)
s.settimeout(1)
s.connect(("8.8.8.8", 53))
print("SECURITY_BREACH: connected")
"#;
    let result = executor.execute(source, None).await.unwrap();
    assert!(!result.is_success());
    assert!(result.is_policy_violation(), "{:?}", result);
    assert!(!result.stdout.contains("SECURITY_BREACH"));
}

/// Test that loopback is reachable regardless of the allow-list.
#[tokio::test]
async fn test_loopback_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move { listener.accept().await.is_ok() });

    let source = format!(
        "import socket\ns = socket.create_connection(('127.0.0.1', {}), timeout=5)\ns.close()\n_result = 'connected'",
        port
    );
    let result = executor.execute(&source, None).await.unwrap();
    assert_eq!(result.result, Some(json!("connected")), "{:?}", result);
    assert!(accept.await.unwrap());
}

/// Test that system files cannot be read.
#[tokio::test]
async fn test_filesystem_access_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = r#"
with open('/etc/passwd', 'r') as f:
    print(f.read())
print('SECURITY_BREACH: file read succeeded')
"#;
    let result = executor.execute(source, None).await.unwrap();
    assert!(!result.is_success());
    assert!(result.is_policy_violation());
    assert!(!result.stdout.contains("SECURITY_BREACH"));
}

/// Test that `..` cannot climb out of the workspace.
#[tokio::test]
async fn test_path_traversal_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();
    let Some(executor) = executor(test_config(&workspace)) else { return };

    let result = executor
        .execute("_result = open('../secret.txt').read()", None)
        .await
        .unwrap();
    assert!(result.is_policy_violation(), "{:?}", result);

    let result = executor
        .execute("import os\n_result = os.listdir('..')", None)
        .await
        .unwrap();
    assert!(result.is_policy_violation(), "{:?}", result);
}

/// Test that the working directory cannot be moved out of the workspace.
#[tokio::test]
async fn test_chdir_out_of_workspace_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("ws");
    let outside = dir.path().join("outside");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::create_dir_all(&outside).unwrap();
    let Some(executor) = executor(test_config(&workspace)) else { return };

    let source = format!(
        "import pathlib\npathlib.os.chdir({:?})\nopen('escaped.txt', 'w').write('pwned')\n_result = 'wrote'",
        outside.display().to_string()
    );
    let result = executor.execute(&source, None).await.unwrap();
    assert!(result.is_policy_violation(), "{:?}", result);
    assert!(!outside.join("escaped.txt").exists());
}

/// Test that relative paths follow the real working directory inside the
/// workspace.
#[tokio::test]
async fn test_chdir_within_workspace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = "import pathlib\npathlib.os.chdir('sub')\nopen('note.txt', 'w').write('here')\n_result = open('note.txt').read()";
    let result = executor.execute(source, None).await.unwrap();
    assert_eq!(result.result, Some(json!("here")), "{:?}", result);
    assert!(dir.path().join("sub/note.txt").exists());

    let source = "import pathlib\npathlib.os.chdir('sub')\n_result = open('../../escaped.txt', 'w')";
    let result = executor.execute(source, None).await.unwrap();
    assert!(result.is_policy_violation(), "{:?}", result);
}

/// Test that a failure is still reported when stdout overflows its cap.
#[tokio::test]
async fn test_failure_survives_output_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig::builder()
        .workspace_root(dir.path())
        .max_output_bytes(1024)
        .build();
    let Some(executor) = executor(config) else { return };

    let result = executor
        .execute("print('x' * 4096)\nraise ValueError('real failure')", None)
        .await
        .unwrap();
    assert!(!result.is_success(), "{:?}", result);
    assert_eq!(result.error_type.as_deref(), Some("ValueError"));
    assert!(result.metadata.stdout_truncated);
    assert!(result.stdout.len() <= 1024);

    let result = executor
        .execute("print('x' * 4096)\n_result = 7", None)
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(result.result, Some(json!(7)));
}

/// Test that the workspace itself is readable and writable.
#[tokio::test]
async fn test_workspace_writes_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let source = "with open('notes.txt', 'w') as f:\n    f.write('kept')\nwith open('notes.txt') as f:\n    _result = f.read()";
    let result = executor.execute(source, None).await.unwrap();
    assert_eq!(result.result, Some(json!("kept")), "{:?}", result);
    assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "kept");
}

/// Test that writes are refused when disabled while reads still work.
#[tokio::test]
async fn test_writes_disabled() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.txt"), "data").unwrap();
    let config = SandboxConfig::builder()
        .workspace_root(dir.path())
        .allow_writes(false)
        .build();
    let Some(executor) = executor(config) else { return };

    let result = executor
        .execute("_result = open('input.txt').read()", None)
        .await
        .unwrap();
    assert_eq!(result.result, Some(json!("data")));

    let result = executor
        .execute("open('output.txt', 'w').write('x')", None)
        .await
        .unwrap();
    assert!(result.is_policy_violation());
    assert!(!dir.path().join("output.txt").exists());
}

/// Test that per-execution scripts do not accumulate in the workspace.
#[tokio::test]
async fn test_script_files_removed() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    executor.execute("_result = 1", None).await.unwrap();
    executor.execute("raise RuntimeError('x')", None).await.unwrap();
    executor
        .execute("while True:\n    pass", Some(ExecutionLimits::new().timeout(Duration::from_secs(1))))
        .await
        .unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(".exec_"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

/// Test that the address-space limit turns a huge allocation into an error.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_memory_limit() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };

    let result = executor
        .execute(
            "data = bytearray(2 * 1024 * 1024 * 1024)\n_result = len(data)",
            Some(ExecutionLimits::new().max_memory(256 * 1024 * 1024)),
        )
        .await
        .unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_type.as_deref(), Some("MemoryError"));
}

/// Test that a generated wrapper reaches the host provider through the
/// bridge, with PII flowing through untouched.
#[tokio::test]
async fn test_tool_call_through_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let provider = StaticProvider::new("directory").with_tool(
        Tool::new(
            "lookup",
            "Find a user's email",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        ),
        |args| ToolResult::json(&json!({"name": args["name"], "email": "alice@example.com"})),
    );

    let orchestrator = match Orchestrator::startup(test_config(dir.path()), Some(Arc::new(provider))).await {
        Ok(orchestrator) => orchestrator.with_result_tokenization(true),
        Err(e) if e.is_interpreter_missing() => return,
        Err(e) => panic!("startup failed: {}", e),
    };
    assert_eq!(orchestrator.generation_report().total_tools(), 1);
    assert!(orchestrator.verify_tool_exists("directory", "lookup").exists);

    let source = "from servers.directory import lookup\nuser = await lookup('alice')\n_result = user['email']";
    let outcome = orchestrator.validate_then_execute(source).await.unwrap();
    let result = outcome.execution().expect("validation passed");
    assert!(result.is_success(), "{:?}", result);

    let exposed = result.result.clone().unwrap();
    let token = exposed.as_str().unwrap();
    assert!(token.starts_with("[EMAIL_"), "{}", token);
    assert_eq!(orchestrator.tokenizer().untokenize_str(token), "alice@example.com");
}

/// Test that tool wrappers fail loudly without an attached client.
#[tokio::test]
async fn test_tool_call_without_client() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let generator = codemode_sandbox_rs::tools::ToolGenerator::new(config.servers_root()).unwrap();
    generator
        .generate_tools("directory", &[Tool::new("lookup", "", json!({}))])
        .unwrap();
    let Some(executor) = executor(config) else { return };

    let result = executor
        .execute("from servers.directory import lookup\n_result = await lookup()", None)
        .await
        .unwrap();
    assert!(!result.is_success());
    assert!(result.error.as_deref().unwrap().contains("no tool client"), "{:?}", result);
}

/// Test that concurrent executions stay independent.
#[tokio::test]
async fn test_concurrent_executions() {
    let dir = tempfile::tempdir().unwrap();
    let Some(executor) = executor(test_config(dir.path())) else { return };
    let executor = Arc::new(executor);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let source = format!("import time\ntime.sleep(0.1)\n_result = {} * 10", i);
                executor.execute(&source, None).await.unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.result, Some(json!(i * 10)));
    }
}
