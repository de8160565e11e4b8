//! # Code-mode sandbox
//!
//! Runs short Python programs written by a language model, in place of
//! direct tool calls, under static and runtime controls.
//!
//! A submission flows through:
//!
//! 1. **Validation**: [`SecurityEngine`] parses the source and runs its
//!    rules. A syntax error or any BLOCK-level violation stops here.
//! 2. **Execution**: [`CodeExecutor`] wraps the source in a harness and runs
//!    it in a fresh child interpreter with a cleared environment, its own
//!    process group, `setrlimit` limits and a hard wall-clock timeout. The
//!    harness enforces the [`NetworkPolicy`] and [`FileSystemPolicy`] inside
//!    the child.
//! 3. **Tools**: generated `servers.<provider>.<tool>` modules call back to
//!    the host over a per-execution loopback bridge. The [`ToolClient`]
//!    behind it tokenizes PII with a [`PrivacyTokenizer`] so the
//!    model-facing path only sees tokens.
//!
//! ## Example
//!
//! ```rust,ignore
//! use codemode_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .workspace_root("./workspace")
//!         .timeout(Duration::from_secs(5))
//!         .build();
//!
//!     let orchestrator = Orchestrator::startup(config, None).await?;
//!     let outcome = orchestrator.validate_then_execute("_result = 1 + 1").await?;
//!
//!     let result = outcome.execution().expect("not blocked");
//!     assert_eq!(result.result, Some(serde_json::json!(2)));
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! Static validation is defense in depth. The binding controls are process
//! isolation, resource limits and the runtime policies, and none of them is
//! a substitute for a container or VM against a determined local attacker.

pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod prelude;
pub mod privacy;
pub mod sandbox;
pub mod security;
pub mod skills;
pub mod tools;

// Re-export main types at crate root for convenience
pub use error::{ErrorKind, Result, SandboxError};
pub use orchestrator::{AutoFixer, NoopFixer, Orchestrator, Outcome};
pub use policy::{FileAction, FileSystemPolicy, NetworkPolicy};
pub use privacy::PrivacyTokenizer;
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::{CodeExecutor, ExecutionMetadata, ExecutionResult};
pub use sandbox::limits::ExecutionLimits;
pub use security::{SecurityEngine, SecurityViolation, ValidationResult, ViolationLevel};
pub use tools::{Tool, ToolClient, ToolProvider, ToolResult};
