//! Static analysis of candidate source before it is allowed to run.
//!
//! The [`SecurityEngine`] parses the source once and runs a list of
//! [`SecurityRule`]s over the AST. Rules only report; the engine decides that
//! a submission is blocked when at least one BLOCK-level violation was found.
//! This is defense in depth: the runtime policies enforced inside the child
//! remain the binding control.

pub mod ast;
pub mod calls;
pub mod imports;
pub mod literals;
pub mod loops;

use std::fmt;

use rustpython_parser::ast::{Stmt, Suite};
use rustpython_parser::Parse;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

pub use self::ast::SourceText;
pub use calls::DangerousCallRule;
pub use imports::DangerousImportRule;
pub use literals::FilesystemLiteralRule;
pub use loops::InfiniteLoopRule;

/// Severity of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViolationLevel {
    /// Prevents execution.
    Block,
    /// Surfaced alongside a successful validation.
    Warn,
    /// Informational only.
    Info,
}

impl fmt::Display for ViolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationLevel::Block => f.write_str("BLOCK"),
            ViolationLevel::Warn => f.write_str("WARN"),
            ViolationLevel::Info => f.write_str("INFO"),
        }
    }
}

/// A single finding produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub rule_name: String,
    pub level: ViolationLevel,
    pub message: String,
    /// 1-based line number.
    pub line: usize,
    /// 0-based column, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SecurityViolation {
    /// Build a violation located at a byte offset of `source`.
    pub fn at(
        rule_name: impl Into<String>,
        level: ViolationLevel,
        message: impl Into<String>,
        source: &SourceText<'_>,
        offset: usize,
    ) -> Self {
        let (line, column) = source.location(offset);
        Self {
            rule_name: rule_name.into(),
            level,
            message: message.into(),
            line,
            column: Some(column),
            snippet: source.snippet(line),
        }
    }

    /// The taxonomy name of this violation.
    pub fn kind(&self) -> ErrorKind {
        match self.level {
            ViolationLevel::Block => ErrorKind::SecurityBlockViolation,
            ViolationLevel::Warn | ViolationLevel::Info => ErrorKind::SecurityWarning,
        }
    }
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (line {}): {}",
            self.level, self.rule_name, self.line, self.message
        )
    }
}

/// Outcome of validating one piece of source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub blocked: bool,
    pub violations: Vec<SecurityViolation>,
    pub blocking_violations: Vec<SecurityViolation>,
    pub warnings: Vec<SecurityViolation>,
    pub info: Vec<SecurityViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntax_error: Option<String>,
}

impl ValidationResult {
    /// Categorize rule output by level.
    pub fn from_violations(violations: Vec<SecurityViolation>) -> Self {
        let by_level = |level: ViolationLevel| -> Vec<SecurityViolation> {
            violations
                .iter()
                .filter(|v| v.level == level)
                .cloned()
                .collect()
        };
        let blocking_violations = by_level(ViolationLevel::Block);
        let warnings = by_level(ViolationLevel::Warn);
        let info = by_level(ViolationLevel::Info);
        let blocked = !blocking_violations.is_empty();

        Self {
            valid: !blocked,
            blocked,
            violations,
            blocking_violations,
            warnings,
            info,
            syntax_error: None,
        }
    }

    /// An unparsable submission. No rules ran.
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            blocked: true,
            violations: Vec::new(),
            blocking_violations: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
            syntax_error: Some(message.into()),
        }
    }

    /// The taxonomy name of the reason this result blocks, if it does.
    pub fn block_kind(&self) -> Option<ErrorKind> {
        if self.syntax_error.is_some() {
            Some(ErrorKind::SyntaxViolation)
        } else if self.blocked {
            Some(ErrorKind::SecurityBlockViolation)
        } else {
            None
        }
    }

    /// Human-readable report suitable for feeding back to a code generator.
    pub fn report(&self) -> String {
        if let Some(err) = &self.syntax_error {
            return format!("{}: {}", ErrorKind::SyntaxViolation, err);
        }
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single static check over a parsed module.
pub trait SecurityRule: Send + Sync {
    /// Stable rule identifier.
    fn name(&self) -> &'static str;

    /// Inspect the module and report violations.
    fn check(&self, module: &[Stmt], source: &SourceText<'_>) -> Vec<SecurityViolation>;
}

/// Runs every registered rule over a submission.
pub struct SecurityEngine {
    rules: Vec<Box<dyn SecurityRule>>,
}

impl Default for SecurityEngine {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl SecurityEngine {
    /// Create an engine with an explicit rule list.
    pub fn new(rules: Vec<Box<dyn SecurityRule>>) -> Self {
        Self { rules }
    }

    /// Register an additional rule.
    pub fn add_rule(&mut self, rule: Box<dyn SecurityRule>) {
        self.rules.push(rule);
    }

    /// Names of the registered rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Parse and check `source`.
    ///
    /// Never fails: a parse error becomes a blocked result with
    /// `syntax_error` set and no rule output.
    pub fn validate(&self, source: &str) -> ValidationResult {
        let text = SourceText::new(source);

        let module = match Suite::parse(source, "<sandbox>") {
            Ok(module) => module,
            Err(err) => {
                let (line, column) = text.location(u32::from(err.offset) as usize);
                let message = format!("{} at line {}, column {}", err.error, line, column);
                tracing::debug!(%message, "source rejected: syntax error");
                return ValidationResult::syntax_error(message);
            }
        };

        let violations: Vec<SecurityViolation> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(&module, &text))
            .collect();

        let result = ValidationResult::from_violations(violations);
        tracing::debug!(
            blocked = result.blocked,
            blocking = result.blocking_violations.len(),
            warnings = result.warnings.len(),
            "source validated"
        );
        result
    }
}

/// The built-in rule set.
pub fn default_rules() -> Vec<Box<dyn SecurityRule>> {
    vec![
        Box::new(DangerousImportRule::default()),
        Box::new(DangerousCallRule::default()),
        Box::new(FilesystemLiteralRule::default()),
        Box::new(InfiniteLoopRule),
    ]
}
