//! Calls to eval-style built-ins and process-level APIs.

use std::collections::HashSet;

use rustpython_parser::ast::{Expr, Stmt};

use super::ast::{dotted_name, walk_body, walk_expr, SourceText, Visitor};
use super::{SecurityRule, SecurityViolation, ViolationLevel};

/// Built-ins that evaluate or reach arbitrary code or the module namespace.
pub const DANGEROUS_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "breakpoint",
    "globals",
];

/// Dotted call paths that spawn, replace, or terminate processes, or that
/// reach the interpreter's module table. A path also matches anything below
/// it (`sys.modules.get`).
pub const DANGEROUS_ATTRIBUTE_PATHS: &[&str] = &[
    "os.system",
    "os.popen",
    "os.fork",
    "os.forkpty",
    "os.kill",
    "os.killpg",
    "os._exit",
    "os.abort",
    "os.execl",
    "os.execle",
    "os.execlp",
    "os.execlpe",
    "os.execv",
    "os.execve",
    "os.execvp",
    "os.execvpe",
    "os.spawnl",
    "os.spawnle",
    "os.spawnlp",
    "os.spawnlpe",
    "os.spawnv",
    "os.spawnve",
    "os.spawnvp",
    "os.spawnvpe",
    "os.posix_spawn",
    "os.posix_spawnp",
    "subprocess.run",
    "subprocess.call",
    "subprocess.check_call",
    "subprocess.check_output",
    "subprocess.Popen",
    "subprocess.getoutput",
    "subprocess.getstatusoutput",
    "sys.exit",
    "sys.modules",
    "sys._getframe",
    "builtins.eval",
    "builtins.exec",
    "builtins.__import__",
    "importlib.import_module",
    "asyncio.create_subprocess_exec",
    "asyncio.create_subprocess_shell",
];

/// Flags direct calls to dangerous built-ins and attribute paths.
#[derive(Debug, Clone)]
pub struct DangerousCallRule {
    builtins: HashSet<String>,
    paths: Vec<String>,
}

impl Default for DangerousCallRule {
    fn default() -> Self {
        Self {
            builtins: DANGEROUS_BUILTINS.iter().map(|b| b.to_string()).collect(),
            paths: DANGEROUS_ATTRIBUTE_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl DangerousCallRule {
    fn match_path(&self, path: &str) -> Option<&str> {
        self.paths
            .iter()
            .find(|blocked| {
                path == blocked.as_str()
                    || path
                        .strip_prefix(blocked.as_str())
                        .map_or(false, |rest| rest.starts_with('.'))
            })
            .map(String::as_str)
    }
}

struct CallCollector<'r, 's> {
    rule: &'r DangerousCallRule,
    source: &'r SourceText<'s>,
    violations: Vec<SecurityViolation>,
}

impl Visitor for CallCollector<'_, '_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Call(call) = expr {
            let offset = u32::from(call.range.start()) as usize;
            let message = match call.func.as_ref() {
                Expr::Name(name) if self.rule.builtins.contains(name.id.as_str()) => {
                    Some(format!("call to built-in '{}' is not allowed", name.id.as_str()))
                }
                func @ Expr::Attribute(_) => dotted_name(func).and_then(|path| {
                    self.rule
                        .match_path(&path)
                        .map(|hit| format!("call to '{}' is not allowed (matches '{}')", path, hit))
                }),
                _ => None,
            };
            if let Some(message) = message {
                self.violations.push(SecurityViolation::at(
                    "dangerous_call",
                    ViolationLevel::Block,
                    message,
                    self.source,
                    offset,
                ));
            }
        }
        walk_expr(self, expr);
    }
}

impl SecurityRule for DangerousCallRule {
    fn name(&self) -> &'static str {
        "dangerous_call"
    }

    fn check(&self, module: &[Stmt], source: &SourceText<'_>) -> Vec<SecurityViolation> {
        let mut collector = CallCollector {
            rule: self,
            source,
            violations: Vec::new(),
        };
        walk_body(&mut collector, module);
        collector.violations
    }
}
