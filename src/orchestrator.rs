//! Sequences a submission through fixing, validation and execution, and owns
//! startup of the generated tool tree.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::privacy::PrivacyTokenizer;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::executor::{CodeExecutor, ExecutionResult};
use crate::sandbox::inventory::{ToolInventory, ToolVerification};
use crate::sandbox::limits::ExecutionLimits;
use crate::security::{SecurityEngine, ValidationResult};
use crate::skills::{discover_skills, SkillDiscovery};
use crate::tools::{GenerationReport, ToolClient, ToolGenerator, ToolProvider};

/// Heuristic source repair run before validation.
///
/// Returns the possibly modified source and a description of each fix.
/// Must be idempotent and must not fail.
pub trait AutoFixer: Send + Sync {
    fn fix(&self, source: &str) -> (String, Vec<String>);
}

/// Leaves source untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFixer;

impl AutoFixer for NoopFixer {
    fn fix(&self, source: &str) -> (String, Vec<String>) {
        (source.to_string(), Vec::new())
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Validation blocked the source; nothing ran.
    Rejected {
        validation: ValidationResult,
        fixes: Vec<String>,
    },
    /// The source ran. Warnings, if any, are in `validation`.
    Executed {
        validation: ValidationResult,
        result: ExecutionResult,
        fixes: Vec<String>,
    },
}

impl Outcome {
    pub fn validation(&self) -> &ValidationResult {
        match self {
            Outcome::Rejected { validation, .. } | Outcome::Executed { validation, .. } => validation,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            Outcome::Executed { result, .. } => Some(result),
            Outcome::Rejected { .. } => None,
        }
    }

    pub fn fixes(&self) -> &[String] {
        match self {
            Outcome::Rejected { fixes, .. } | Outcome::Executed { fixes, .. } => fixes,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected { .. })
    }
}

/// Process-wide entry point: one per running service.
pub struct Orchestrator {
    engine: SecurityEngine,
    executor: CodeExecutor,
    fixer: Box<dyn AutoFixer>,
    tokenizer: Arc<PrivacyTokenizer>,
    generation: GenerationReport,
    skills: SkillDiscovery,
    tokenize_results: bool,
}

impl Orchestrator {
    /// Build the executor, regenerate the tool tree from `provider`, and
    /// discover skills.
    ///
    /// The provider's endpoint, if it has one, is added to the network
    /// allow-list. Provider and generation failures abort startup; a single
    /// tool failing to generate does not.
    pub async fn startup(mut config: SandboxConfig, provider: Option<Arc<dyn ToolProvider>>) -> Result<Self> {
        if let Some(endpoint) = provider
            .as_ref()
            .and_then(|p| p.provider_config().network_endpoint())
        {
            config.allowed_endpoints.insert(endpoint);
        }

        let executor = CodeExecutor::new(config)?;
        let generator = ToolGenerator::new(executor.servers_root())?;
        generator.prepare()?;

        let generation = match &provider {
            Some(provider) => generator.generate_all(std::slice::from_ref(provider)).await?,
            None => GenerationReport {
                servers_root: executor.servers_root().to_path_buf(),
                ..GenerationReport::default()
            },
        };

        let tokenizer = Arc::new(PrivacyTokenizer::new());
        let executor = match provider {
            Some(provider) => {
                executor.with_tool_client(Arc::new(ToolClient::new(provider, Arc::clone(&tokenizer))))
            }
            None => executor,
        };

        let skills = discover_skills(executor.filesystem_policy().workspace_root());

        tracing::info!(
            tools = generation.total_tools(),
            generation_errors = generation.has_errors(),
            skills = skills.skills.len(),
            "orchestrator started"
        );

        Ok(Self {
            engine: SecurityEngine::default(),
            executor,
            fixer: Box::new(NoopFixer),
            tokenizer,
            generation,
            skills,
            tokenize_results: false,
        })
    }

    /// Use a different fixer.
    pub fn with_fixer(mut self, fixer: impl AutoFixer + 'static) -> Self {
        self.fixer = Box::new(fixer);
        self
    }

    /// Use a different rule set.
    pub fn with_engine(mut self, engine: SecurityEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Tokenize PII in returned results so the model-facing path only sees
    /// tokens.
    pub fn with_result_tokenization(mut self, enabled: bool) -> Self {
        self.tokenize_results = enabled;
        self
    }

    pub fn engine(&self) -> &SecurityEngine {
        &self.engine
    }

    pub fn executor(&self) -> &CodeExecutor {
        &self.executor
    }

    pub fn tokenizer(&self) -> &Arc<PrivacyTokenizer> {
        &self.tokenizer
    }

    pub fn generation_report(&self) -> &GenerationReport {
        &self.generation
    }

    pub fn skills(&self) -> &SkillDiscovery {
        &self.skills
    }

    pub fn list_available_tools(&self) -> ToolInventory {
        self.executor.list_available_tools()
    }

    pub fn verify_tool_exists(&self, server: &str, tool: &str) -> ToolVerification {
        self.executor.verify_tool_exists(server, tool)
    }

    /// Fix, validate and, unless blocked, execute `source`.
    pub async fn validate_then_execute(&self, source: &str) -> Result<Outcome> {
        self.validate_then_execute_with_limits(source, None).await
    }

    /// As [`validate_then_execute`](Self::validate_then_execute), with
    /// per-call limits.
    pub async fn validate_then_execute_with_limits(
        &self,
        source: &str,
        limits: Option<ExecutionLimits>,
    ) -> Result<Outcome> {
        let (source, fixes) = self.fixer.fix(source);
        let validation = self.engine.validate(&source);

        if validation.blocked {
            tracing::info!(
                kind = ?validation.block_kind(),
                violations = validation.blocking_violations.len(),
                "submission rejected"
            );
            return Ok(Outcome::Rejected { validation, fixes });
        }

        let mut result = self.executor.execute(&source, limits).await?;
        if self.tokenize_results {
            result = self.tokenize_result(result);
        }
        Ok(Outcome::Executed {
            validation,
            result,
            fixes,
        })
    }

    fn tokenize_result(&self, mut result: ExecutionResult) -> ExecutionResult {
        let tokenizer = &self.tokenizer;
        result.result = result.result.map(|value| tokenizer.tokenize(&value));
        result.error = result.error.map(|e| tokenizer.tokenize_str(&e));
        result.traceback = result.traceback.map(|t| tokenizer.tokenize_str(&t));
        result.stdout = tokenizer.tokenize_str(&result.stdout);
        result.stderr = tokenizer.tokenize_str(&result.stderr);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AppendPass;

    impl AutoFixer for AppendPass {
        fn fix(&self, source: &str) -> (String, Vec<String>) {
            if source.trim_end().ends_with(':') {
                (format!("{}\n    pass\n", source.trim_end()), vec!["added missing body".to_string()])
            } else {
                (source.to_string(), Vec::new())
            }
        }
    }

    #[test]
    fn test_noop_fixer() {
        let (source, fixes) = NoopFixer.fix("x = 1");
        assert_eq!(source, "x = 1");
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_fixer_is_idempotent() {
        let (once, _) = AppendPass.fix("if x:");
        let (twice, fixes) = AppendPass.fix(&once);
        assert_eq!(once, twice);
        assert!(fixes.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_source_is_never_executed() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::builder().workspace_root(dir.path()).build();
        let orchestrator = match Orchestrator::startup(config, None).await {
            Ok(orchestrator) => orchestrator,
            Err(e) if e.is_interpreter_missing() => return,
            Err(e) => panic!("startup failed: {e}"),
        };

        let outcome = orchestrator
            .validate_then_execute("import os\nos.system('ls')")
            .await
            .unwrap();
        assert!(outcome.is_rejected());
        assert!(outcome.execution().is_none());
        let rules: Vec<&str> = outcome
            .validation()
            .blocking_violations
            .iter()
            .map(|v| v.rule_name.as_str())
            .collect();
        assert!(rules.contains(&"dangerous_import"));
    }

    #[tokio::test]
    async fn test_fixes_are_reported_on_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::builder().workspace_root(dir.path()).build();
        let orchestrator = match Orchestrator::startup(config, None).await {
            Ok(orchestrator) => orchestrator.with_fixer(AppendPass),
            Err(e) if e.is_interpreter_missing() => return,
            Err(e) => panic!("startup failed: {e}"),
        };

        let outcome = orchestrator
            .validate_then_execute("import subprocess\nif True:")
            .await
            .unwrap();
        assert!(outcome.is_rejected());
        assert_eq!(outcome.fixes(), ["added missing body".to_string()]);
    }
}
