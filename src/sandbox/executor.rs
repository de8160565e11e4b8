//! Core execution engine: runs wrapped source in a child interpreter.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{parse_python_exception, ErrorKind, Result, SandboxError};
use crate::policy::{FileSystemPolicy, NetworkPolicy};
use crate::sandbox::config::{absolute, SandboxConfig};
use crate::sandbox::harness::{self, HarnessConfig};
use crate::sandbox::inventory::{ToolInventory, ToolVerification};
use crate::sandbox::io::{split_result_line, CapturedOutput};
use crate::sandbox::limits::{ExecutionLimits, ResourceLimits};
use crate::tools::{ToolBridge, ToolClient};

/// How long to wait for the output readers once the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Metadata about an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Wall-clock time from harness render to result decode.
    pub duration_ms: u64,
    /// Exit code, when the child exited normally.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Result of one execution. Failures inside the child are data here, never
/// a [`SandboxError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Value of `_result` (or `result`) at the end of the program.
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub traceback: Option<String>,
    /// Program output, without the harness result line.
    pub stdout: String,
    pub stderr: String,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    /// Check if the execution was successful.
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_timeout(&self) -> bool {
        self.metadata.timed_out
    }

    pub fn is_policy_violation(&self) -> bool {
        self.error_type.as_deref() == Some(ErrorKind::PolicyViolation.as_str())
    }

    fn failure(error: String, kind: ErrorKind, stdout: String, stderr: String) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            error_type: Some(kind.to_string()),
            traceback: None,
            stdout,
            stderr,
            metadata: ExecutionMetadata::default(),
        }
    }
}

/// The line the harness prints last.
#[derive(Debug, Deserialize)]
struct HarnessPayload {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    traceback: Option<String>,
}

/// Runs untrusted source in a fresh child process per call.
pub struct CodeExecutor {
    config: SandboxConfig,
    interpreter: PathBuf,
    servers_root: PathBuf,
    network_policy: NetworkPolicy,
    filesystem_policy: FileSystemPolicy,
    tool_client: Option<Arc<ToolClient>>,
}

impl CodeExecutor {
    /// Create an executor. Creates the workspace directory if needed and
    /// fails if the interpreter cannot be found.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let workspace = absolute(&config.workspace_root);
        std::fs::create_dir_all(&workspace)?;

        let servers_root = absolute(&config.servers_root());
        if servers_root.file_name().and_then(|n| n.to_str()) != Some("servers") {
            return Err(SandboxError::Config(format!(
                "servers root must be a directory named 'servers', got {}",
                servers_root.display()
            )));
        }

        let interpreter = find_interpreter(&config.python_path)?;
        let network_policy = NetworkPolicy::new(&config.allowed_endpoints);
        let filesystem_policy = FileSystemPolicy::new(&workspace, config.allow_writes);

        tracing::debug!(
            interpreter = %interpreter.display(),
            workspace = %filesystem_policy.workspace_root().display(),
            "code executor ready"
        );

        Ok(Self {
            config,
            interpreter,
            servers_root,
            network_policy,
            filesystem_policy,
            tool_client: None,
        })
    }

    /// Attach the client that serves tool calls from the sandbox.
    pub fn with_tool_client(mut self, client: Arc<ToolClient>) -> Self {
        self.tool_client = Some(client);
        self
    }

    /// Replace the network allow-list.
    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = policy;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn servers_root(&self) -> &Path {
        &self.servers_root
    }

    pub fn network_policy(&self) -> &NetworkPolicy {
        &self.network_policy
    }

    pub fn filesystem_policy(&self) -> &FileSystemPolicy {
        &self.filesystem_policy
    }

    pub fn tool_client(&self) -> Option<&Arc<ToolClient>> {
        self.tool_client.as_ref()
    }

    /// Execute `source` under the configured limits, or `limits` when given.
    ///
    /// Only supervisor-side failures (script file, spawn, bridge) are
    /// returned as errors.
    pub async fn execute(&self, source: &str, limits: Option<ExecutionLimits>) -> Result<ExecutionResult> {
        let limits = ResourceLimits::resolve(&self.config, limits);
        let started = Instant::now();

        let harness_config = HarnessConfig::new(
            self.config
                .enforce_network_policy
                .then_some(&self.network_policy),
            self.config
                .enforce_filesystem_policy
                .then_some(&self.filesystem_policy),
            &self.filesystem_policy,
            &limits,
            self.servers_root.clone(),
        );
        let script = harness::render(source, &harness_config).map_err(SandboxError::Harness)?;

        // Removed when dropped, on every return path.
        let script_file = tempfile::Builder::new()
            .prefix(".exec_")
            .suffix(".py")
            .tempfile_in(self.filesystem_policy.workspace_root())?;
        std::fs::write(script_file.path(), script)?;

        let bridge = match &self.tool_client {
            Some(client) => Some(ToolBridge::start(Arc::clone(client)).await?),
            None => None,
        };

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg("-B")
            .arg(script_file.path())
            .current_dir(self.filesystem_policy.workspace_root())
            .env_clear()
            .env("LANG", "C.UTF-8")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        if let Some(bridge) = &bridge {
            for (key, value) in bridge.env() {
                cmd.env(key, value);
            }
        }
        #[cfg(unix)]
        {
            cmd.process_group(0);
            unsafe {
                cmd.pre_exec(move || {
                    limits.apply_to_current_process();
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
        tracing::debug!(pid = child.id(), timeout = ?limits.timeout, "sandbox process spawned");

        let cap = self.config.max_output_bytes;
        let stdout_reader = spawn_reader(child.stdout.take(), cap);
        let stderr_reader = spawn_reader(child.stderr.take(), cap);

        let status = match tokio::time::timeout(limits.timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                kill_process_group(&mut child).await;
                None
            }
        };

        let stdout = collect(stdout_reader).await;
        let stderr = collect(stderr_reader).await;
        drop(bridge);

        let mut result = match status {
            None => {
                tracing::warn!(timeout = ?limits.timeout, "sandbox execution timed out; process killed");
                let mut result = ExecutionResult::failure(
                    format!("timeout after {}s", limits.timeout.as_secs_f64()),
                    ErrorKind::ExecutionTimeout,
                    stdout.to_string_lossy(),
                    stderr.to_string_lossy(),
                );
                result.metadata.timed_out = true;
                result
            }
            Some(status) => decode(
                &stdout.to_string_lossy(),
                stdout.tail_lossy().as_deref(),
                stderr.to_string_lossy(),
                status,
            ),
        };

        result.metadata.duration_ms = started.elapsed().as_millis() as u64;
        result.metadata.stdout_truncated = stdout.is_truncated();
        result.metadata.stderr_truncated = stderr.is_truncated();

        tracing::info!(
            success = result.success,
            error_type = result.error_type.as_deref().unwrap_or(""),
            duration_ms = result.metadata.duration_ms,
            exit_code = ?result.metadata.exit_code,
            "sandbox execution finished"
        );
        Ok(result)
    }

    /// Everything currently generated under the servers root.
    pub fn list_available_tools(&self) -> ToolInventory {
        ToolInventory::scan(&self.servers_root)
    }

    /// Check for one generated tool, with diagnostics if it is missing.
    pub fn verify_tool_exists(&self, server: &str, tool: &str) -> ToolVerification {
        ToolInventory::scan(&self.servers_root).verify(server, tool)
    }
}

/// Resolve the interpreter: paths with a directory component are used as
/// given, bare names are searched on `PATH`.
fn find_interpreter(python: &Path) -> Result<PathBuf> {
    let not_found = || SandboxError::InterpreterNotFound(python.display().to_string());

    if python.components().count() > 1 {
        return if python.is_file() {
            Ok(absolute(python))
        } else {
            Err(not_found())
        };
    }

    let path = std::env::var_os("PATH").ok_or_else(not_found)?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(python))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

fn spawn_reader<R>(stream: Option<R>, cap: usize) -> Option<JoinHandle<std::io::Result<CapturedOutput>>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    stream.map(|stream| tokio::spawn(CapturedOutput::read_from(stream, cap)))
}

/// Join a reader, giving up if a leaked descendant still holds the pipe.
async fn collect(reader: Option<JoinHandle<std::io::Result<CapturedOutput>>>) -> CapturedOutput {
    let Some(mut reader) = reader else {
        return CapturedOutput::default();
    };
    match tokio::time::timeout(READER_GRACE, &mut reader).await {
        Ok(Ok(Ok(output))) => output,
        Ok(Ok(Err(e))) => {
            tracing::debug!(error = %e, "output reader failed");
            CapturedOutput::default()
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "output reader panicked");
            CapturedOutput::default()
        }
        Err(_) => {
            reader.abort();
            CapturedOutput::default()
        }
    }
}

/// Kill the child's whole process group, then the child itself, and reap it.
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "child already exited");
    }
}

/// Turn raw process output into an [`ExecutionResult`].
///
/// `tail` is the end of stdout when the head was truncated; the result line
/// is taken from it in that case.
fn decode(stdout: &str, tail: Option<&str>, stderr: String, status: ExitStatus) -> ExecutionResult {
    let (program_stdout, line) = match tail {
        Some(tail) => (stdout.to_string(), split_result_line(tail).1),
        None => split_result_line(stdout),
    };
    let payload = line.and_then(|line| serde_json::from_str::<HarnessPayload>(line).ok());

    let mut result = match payload {
        Some(payload) => ExecutionResult {
            success: payload.success,
            result: payload.result,
            error: payload.error,
            error_type: payload.error_type,
            traceback: payload.traceback,
            stdout: program_stdout,
            stderr,
            metadata: ExecutionMetadata::default(),
        },
        None if status.success() && tail.is_some() => ExecutionResult::failure(
            "stdout exceeded max_output_bytes and the result line was lost".to_string(),
            ErrorKind::OutputTruncated,
            stdout.to_string(),
            stderr,
        ),
        // A program that only printed still succeeded.
        None if status.success() => ExecutionResult {
            success: true,
            result: None,
            error: None,
            error_type: None,
            traceback: None,
            stdout: stdout.to_string(),
            stderr,
            metadata: ExecutionMetadata::default(),
        },
        None => {
            let (error, traceback) = match parse_python_exception(&stderr) {
                Some(exc) if exc.message.is_empty() => (exc.exception_type, exc.traceback),
                Some(exc) => (format!("{}: {}", exc.exception_type, exc.message), exc.traceback),
                None => (describe_status(status), None),
            };
            let mut result =
                ExecutionResult::failure(error, ErrorKind::ProcessCrash, stdout.to_string(), stderr);
            result.traceback = traceback;
            result
        }
    };
    result.metadata.exit_code = status.code();
    result
}

fn describe_status(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("process killed by signal {}", signal);
        }
    }
    match status.code() {
        Some(code) => format!("process exited with status {}", code),
        None => "process exited abnormally".to_string(),
    }
}
