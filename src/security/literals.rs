//! Advisory check for string literals that name sensitive host paths.
//!
//! This never blocks. The filesystem policy enforced inside the child is the
//! real control; the warning just gives the code generator early feedback.

use rustpython_parser::ast::{self, Expr, Stmt};

use super::ast::{walk_body, walk_expr, SourceText, Visitor};
use super::{SecurityRule, SecurityViolation, ViolationLevel};

/// Absolute path prefixes that point into OS-owned or credential locations.
pub const SENSITIVE_PATH_PREFIXES: &[&str] = &[
    "/etc/",
    "/proc/",
    "/sys/",
    "/dev/",
    "/root/",
    "/boot/",
    "/var/log/",
    "/var/run/",
    "/usr/bin/",
    "/usr/sbin/",
    "/bin/",
    "/sbin/",
    "/private/etc/",
    "~/.ssh",
    "~/.aws",
    "~/.config",
    "C:\\Windows",
];

const SNIPPET_LIMIT: usize = 80;

/// Warns on string literals that begin with a sensitive path prefix.
#[derive(Debug, Clone)]
pub struct FilesystemLiteralRule {
    prefixes: Vec<String>,
}

impl Default for FilesystemLiteralRule {
    fn default() -> Self {
        Self {
            prefixes: SENSITIVE_PATH_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

struct LiteralCollector<'r, 's> {
    prefixes: &'r [String],
    source: &'r SourceText<'s>,
    violations: Vec<SecurityViolation>,
}

impl Visitor for LiteralCollector<'_, '_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Constant(constant) = expr {
            if let ast::Constant::Str(value) = &constant.value {
                if let Some(prefix) = self.prefixes.iter().find(|p| value.starts_with(p.as_str())) {
                    let shown: String = value.chars().take(SNIPPET_LIMIT).collect();
                    let mut violation = SecurityViolation::at(
                        "filesystem_literal",
                        ViolationLevel::Warn,
                        format!(
                            "string literal references sensitive path '{}' (prefix '{}'); access will be checked at runtime",
                            shown, prefix
                        ),
                        self.source,
                        u32::from(constant.range.start()) as usize,
                    );
                    violation.snippet = Some(shown);
                    self.violations.push(violation);
                }
            }
        }
        walk_expr(self, expr);
    }
}

impl SecurityRule for FilesystemLiteralRule {
    fn name(&self) -> &'static str {
        "filesystem_literal"
    }

    fn check(&self, module: &[Stmt], source: &SourceText<'_>) -> Vec<SecurityViolation> {
        let mut collector = LiteralCollector {
            prefixes: &self.prefixes,
            source,
            violations: Vec::new(),
        };
        walk_body(&mut collector, module);
        collector.violations
    }
}
