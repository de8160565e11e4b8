//! Prelude module for convenient imports.

pub use crate::error::{ErrorKind, Result, SandboxError};
pub use crate::orchestrator::{AutoFixer, Orchestrator, Outcome};
pub use crate::policy::{FileAction, FileSystemPolicy, NetworkPolicy};
pub use crate::privacy::PrivacyTokenizer;
pub use crate::sandbox::{
    config::SandboxConfig,
    executor::{CodeExecutor, ExecutionResult},
    limits::ExecutionLimits,
};
pub use crate::security::{SecurityEngine, ValidationResult};
pub use crate::tools::{
    create_provider, ProviderConfig, ProviderKind, StaticProvider, Tool, ToolClient, ToolProvider,
    ToolResult,
};
