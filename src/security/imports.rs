//! Import checks.
//!
//! The posture is "allow unless explicitly dangerous": modules on the block
//! list stop execution, known-safe modules and the generated namespaces pass
//! silently, and everything else is only a warning.

use std::collections::HashSet;

use rustpython_parser::ast::Stmt;

use super::ast::{walk_body, walk_stmt, SourceText, Visitor};
use super::{SecurityRule, SecurityViolation, ViolationLevel};

/// Modules that give access to processes, the OS, raw networking, native
/// code, or arbitrary deserialization.
pub const BLOCKED_MODULES: &[&str] = &[
    "os",
    "posix",
    "nt",
    "subprocess",
    "shutil",
    "socket",
    "socketserver",
    "ssl",
    "ftplib",
    "telnetlib",
    "smtplib",
    "poplib",
    "imaplib",
    "http.server",
    "xmlrpc",
    "pickle",
    "cPickle",
    "_pickle",
    "marshal",
    "shelve",
    "dill",
    "ctypes",
    "cffi",
    "multiprocessing",
    "signal",
    "pty",
    "pexpect",
    "importlib",
    "imp",
    "builtins",
    "__builtin__",
    "code",
    "codeop",
    "resource",
];

/// Utility modules generated code routinely needs.
pub const ALLOWED_MODULES: &[&str] = &[
    "abc",
    "asyncio",
    "base64",
    "bisect",
    "calendar",
    "collections",
    "contextlib",
    "copy",
    "csv",
    "dataclasses",
    "datetime",
    "decimal",
    "difflib",
    "enum",
    "fractions",
    "functools",
    "hashlib",
    "heapq",
    "html",
    "io",
    "itertools",
    "json",
    "logging",
    "math",
    "numbers",
    "operator",
    "pathlib",
    "pprint",
    "random",
    "re",
    "statistics",
    "string",
    "textwrap",
    "time",
    "typing",
    "unicodedata",
    "urllib.parse",
    "uuid",
    "warnings",
    "zoneinfo",
];

/// Top-level packages produced by the tool generator and skills discovery.
pub const GENERATED_NAMESPACES: &[&str] = &["servers", "skills"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportClass {
    Blocked(String),
    Allowed,
    Unknown,
}

/// Flags imports of dangerous modules (BLOCK) and unrecognized ones (WARN).
#[derive(Debug, Clone)]
pub struct DangerousImportRule {
    blocked: HashSet<String>,
    allowed: HashSet<String>,
    namespaces: HashSet<String>,
}

impl Default for DangerousImportRule {
    fn default() -> Self {
        Self {
            blocked: BLOCKED_MODULES.iter().map(|m| m.to_string()).collect(),
            allowed: ALLOWED_MODULES.iter().map(|m| m.to_string()).collect(),
            namespaces: GENERATED_NAMESPACES.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl DangerousImportRule {
    /// Treat another top-level package as trusted.
    pub fn with_allowed_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    /// Mark an additional module as safe.
    pub fn with_allowed_module(mut self, module: impl Into<String>) -> Self {
        self.allowed.insert(module.into());
        self
    }

    fn classify(&self, module: &str) -> ImportClass {
        let prefixes: Vec<&str> = module
            .match_indices('.')
            .map(|(idx, _)| &module[..idx])
            .chain(std::iter::once(module))
            .collect();

        if let Some(hit) = prefixes.iter().find(|p| self.blocked.contains(**p)) {
            return ImportClass::Blocked(hit.to_string());
        }

        let root = prefixes.first().copied().unwrap_or(module);
        if self.namespaces.contains(root) || prefixes.iter().any(|p| self.allowed.contains(*p)) {
            ImportClass::Allowed
        } else {
            ImportClass::Unknown
        }
    }
}

struct ImportCollector<'r, 's> {
    rule: &'r DangerousImportRule,
    source: &'r SourceText<'s>,
    violations: Vec<SecurityViolation>,
}

impl ImportCollector<'_, '_> {
    fn report(&mut self, module: &str, offset: usize) {
        match self.rule.classify(module) {
            ImportClass::Blocked(hit) => self.violations.push(SecurityViolation::at(
                "dangerous_import",
                ViolationLevel::Block,
                format!("import of '{}' is not allowed (module '{}' is blocked)", module, hit),
                self.source,
                offset,
            )),
            ImportClass::Unknown => self.violations.push(SecurityViolation::at(
                "unknown_import",
                ViolationLevel::Warn,
                format!("import of unrecognized module '{}'; it may be unavailable", module),
                self.source,
                offset,
            )),
            ImportClass::Allowed => {}
        }
    }
}

impl Visitor for ImportCollector<'_, '_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import(node) => {
                for alias in &node.names {
                    self.report(alias.name.as_str(), u32::from(alias.range.start()) as usize);
                }
            }
            Stmt::ImportFrom(node) => {
                let relative = node.level.as_ref().map_or(false, |level| level.to_u32() > 0);
                if let (false, Some(module)) = (relative, &node.module) {
                    self.report(module.as_str(), u32::from(node.range.start()) as usize);
                }
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }
}

impl SecurityRule for DangerousImportRule {
    fn name(&self) -> &'static str {
        "dangerous_import"
    }

    fn check(&self, module: &[Stmt], source: &SourceText<'_>) -> Vec<SecurityViolation> {
        let mut collector = ImportCollector {
            rule: self,
            source,
            violations: Vec::new(),
        };
        walk_body(&mut collector, module);
        collector.violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityEngine;

    fn check(source: &str) -> Vec<SecurityViolation> {
        let engine = SecurityEngine::new(vec![Box::new(DangerousImportRule::default())]);
        engine.validate(source).violations
    }

    #[test]
    fn test_classify() {
        let rule = DangerousImportRule::default();
        assert_eq!(rule.classify("os.path"), ImportClass::Blocked("os".into()));
        assert_eq!(rule.classify("http.server"), ImportClass::Blocked("http.server".into()));
        assert_eq!(rule.classify("json"), ImportClass::Allowed);
        assert_eq!(rule.classify("urllib.parse"), ImportClass::Allowed);
        assert_eq!(rule.classify("servers.github.list_issues"), ImportClass::Allowed);
        assert_eq!(rule.classify("requests"), ImportClass::Unknown);
        assert_eq!(rule.classify("http.client"), ImportClass::Unknown);
    }

    #[test]
    fn test_blocked_imports() {
        let violations = check("import json, subprocess\nfrom pickle import loads\n");
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.level == ViolationLevel::Block));
        assert_eq!(violations[0].line, 1);
        assert_eq!(violations[1].line, 2);
    }

    #[test]
    fn test_nested_import_is_found() {
        let violations = check("def f():\n    if True:\n        import ctypes\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 3);
    }

    #[test]
    fn test_unknown_import_warns() {
        let violations = check("import numpy as np\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_name, "unknown_import");
        assert_eq!(violations[0].level, ViolationLevel::Warn);
    }

    #[test]
    fn test_generated_namespaces_and_relative_imports() {
        let source = "from servers.weather import get_forecast\nfrom skills.report import render\nfrom . import helpers\n";
        assert!(check(source).is_empty());
    }

    #[test]
    fn test_extra_namespace() {
        let rule = DangerousImportRule::default().with_allowed_namespace("workspace_lib");
        assert_eq!(rule.classify("workspace_lib.util"), ImportClass::Allowed);
    }
}
