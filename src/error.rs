//! Error types for the code-execution runtime.
//!
//! Only trusted, supervisor-side failures are represented as errors here.
//! Anything that goes wrong inside the sandboxed child is converted to data
//! (an [`ExecutionResult`](crate::sandbox::executor::ExecutionResult)) before
//! it crosses back to the parent.

use std::fmt;

use thiserror::Error;

use crate::tools::generator::GenerationError;
use crate::tools::ProviderError;

/// Errors raised by the supervisor while preparing or running an execution.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The configured Python interpreter could not be found.
    #[error("Python interpreter not found: {0}")]
    InterpreterNotFound(String),

    /// Failed to spawn the child process.
    #[error("failed to spawn sandbox process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Failed to render the execution harness.
    #[error("failed to render sandbox harness: {0}")]
    Harness(#[source] anyhow::Error),

    /// I/O error in the supervisor (temp files, workspace setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A tool provider failed during startup.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Tool module generation failed as a whole (not a per-tool failure).
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl SandboxError {
    /// Check if this error means the interpreter is unavailable.
    pub fn is_interpreter_missing(&self) -> bool {
        matches!(self, SandboxError::InterpreterNotFound(_))
    }
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Names of the failure kinds a caller can observe.
///
/// These strings appear verbatim in `ExecutionResult::error_type` and in
/// validation reports, so UI and logging code can switch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source could not be parsed.
    SyntaxViolation,
    /// A BLOCK-level security rule matched.
    SecurityBlockViolation,
    /// A WARN-level security rule matched.
    SecurityWarning,
    /// Runtime network or filesystem denial inside the child.
    PolicyViolation,
    /// The child exceeded its wall-clock budget and was killed.
    ExecutionTimeout,
    /// The child exited without a parseable result.
    ProcessCrash,
    /// Stdout overflowed its cap and the result line was lost with it.
    OutputTruncated,
    /// A generated tool file failed to materialize.
    GenerationVerificationError,
    /// A tool provider call or discovery failed.
    ProviderError,
}

impl ErrorKind {
    /// The stable string form of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyntaxViolation => "SyntaxViolation",
            ErrorKind::SecurityBlockViolation => "SecurityBlockViolation",
            ErrorKind::SecurityWarning => "SecurityWarning",
            ErrorKind::PolicyViolation => "PolicyViolation",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::ProcessCrash => "ProcessCrash",
            ErrorKind::OutputTruncated => "OutputTruncated",
            ErrorKind::GenerationVerificationError => "GenerationVerificationError",
            ErrorKind::ProviderError => "ProviderError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exception recovered from Python's stderr output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonException {
    /// The type of Python exception (e.g., "ValueError", "TypeError").
    pub exception_type: String,
    /// The exception message.
    pub message: String,
    /// The full Python traceback, if available.
    pub traceback: Option<String>,
}

/// Parse a Python exception from stderr output.
///
/// Used when a child dies before it can report a structured result, for
/// example when the interpreter itself fails during start-up.
pub fn parse_python_exception(stderr: &str) -> Option<PythonException> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = stderr.lines().collect();

    // Format: "ExceptionType: message" or "ExceptionType"
    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
        }
        if !line.starts_with(' ')
            && !line.is_empty()
            && !line.starts_with("Traceback")
            && looks_like_exception(line)
        {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (exception_type, message) = match exception_str.find(':') {
        Some(colon_pos) => (
            exception_str[..colon_pos].trim().to_string(),
            exception_str[colon_pos + 1..].trim().to_string(),
        ),
        None => (exception_str.trim().to_string(), String::new()),
    };

    let traceback = traceback_start
        .filter(|start| *start <= line_idx)
        .map(|start| lines[start..=line_idx].join("\n"));

    Some(PythonException {
        exception_type,
        message,
        traceback,
    })
}

/// Check if a line looks like a Python exception.
fn looks_like_exception(line: &str) -> bool {
    const SUFFIXES: [&str; 4] = ["Error", "Exception", "Warning", "Violation"];
    const STANDALONE: [&str; 5] = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
        "MemoryError",
    ];

    if !line
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
    {
        return false;
    }

    // The exception name is everything up to the first colon or space; it may
    // be dotted ("socket.gaierror") but never contains spaces.
    let name = line
        .split(|c: char| c == ':' || c == ' ')
        .next()
        .unwrap_or_default();
    let bare = name.rsplit('.').next().unwrap_or(name);

    SUFFIXES.iter().any(|suffix| bare.ends_with(suffix)) || STANDALONE.contains(&bare)
}
