//! Detection of `while True:` loops with no way out.

use rustpython_parser::ast::{self, Expr, Stmt};

use super::ast::{walk_body, walk_stmt, SourceText, Visitor};
use super::{SecurityRule, SecurityViolation, ViolationLevel};

/// Warns on `while <constant true>:` whose body never breaks.
///
/// The search for `break` descends through nested loops, conditionals,
/// `try` blocks and their `else` branches, but not into nested function or
/// class definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfiniteLoopRule;

fn is_constant_true(test: &Expr) -> bool {
    match test {
        Expr::Constant(constant) => match &constant.value {
            ast::Constant::Bool(value) => *value,
            ast::Constant::Int(value) => value.to_string() != "0",
            _ => false,
        },
        _ => false,
    }
}

fn contains_break(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::Break(_) => true,
        Stmt::For(node) => contains_break(&node.body) || contains_break(&node.orelse),
        Stmt::AsyncFor(node) => contains_break(&node.body) || contains_break(&node.orelse),
        Stmt::While(node) => contains_break(&node.body) || contains_break(&node.orelse),
        Stmt::If(node) => contains_break(&node.body) || contains_break(&node.orelse),
        Stmt::With(node) => contains_break(&node.body),
        Stmt::AsyncWith(node) => contains_break(&node.body),
        Stmt::Try(node) => {
            contains_break(&node.body)
                || handlers_break(&node.handlers)
                || contains_break(&node.orelse)
                || contains_break(&node.finalbody)
        }
        Stmt::TryStar(node) => {
            contains_break(&node.body)
                || handlers_break(&node.handlers)
                || contains_break(&node.orelse)
                || contains_break(&node.finalbody)
        }
        Stmt::Match(node) => node.cases.iter().any(|case| contains_break(&case.body)),
        _ => false,
    })
}

fn handlers_break(handlers: &[ast::ExceptHandler]) -> bool {
    handlers.iter().any(|handler| match handler {
        ast::ExceptHandler::ExceptHandler(handler) => contains_break(&handler.body),
    })
}

struct LoopCollector<'r, 's> {
    source: &'r SourceText<'s>,
    violations: Vec<SecurityViolation>,
}

impl Visitor for LoopCollector<'_, '_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::While(node) = stmt {
            if is_constant_true(&node.test) && !contains_break(&node.body) {
                self.violations.push(SecurityViolation::at(
                    "infinite_loop",
                    ViolationLevel::Warn,
                    "loop condition is always true and the body never breaks; execution will hit the timeout",
                    self.source,
                    u32::from(node.range.start()) as usize,
                ));
            }
        }
        walk_stmt(self, stmt);
    }
}

impl SecurityRule for InfiniteLoopRule {
    fn name(&self) -> &'static str {
        "infinite_loop"
    }

    fn check(&self, module: &[Stmt], source: &SourceText<'_>) -> Vec<SecurityViolation> {
        let mut collector = LoopCollector {
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
        let engine = SecurityEngine::new(vec![Box::new(InfiniteLoopRule)]);
        engine.validate(source).violations
    }

    #[test]
    fn test_bare_infinite_loop_warns() {
        let violations = check("while True:\n    pass\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].level, ViolationLevel::Warn);
        assert_eq!(violations[0].line, 1);
    }

    #[test]
    fn test_while_one_warns() {
        assert_eq!(check("while 1:\n    x = 1\n").len(), 1);
        assert!(check("while 0:\n    x = 1\n").is_empty());
    }

    #[test]
    fn test_break_in_nested_blocks_counts() {
        let source = r#"
while True:
    try:
        item = get()
    except ValueError:
        continue
    else:
        if item is None:
            break
"#;
        assert!(check(source).is_empty());

        let source = "while True:\n    for x in y:\n        pass\n    else:\n        break\n";
        assert!(check(source).is_empty());
    }

    #[test]
    fn test_break_inside_nested_function_does_not_count() {
        let source = "while True:\n    def f():\n        while x:\n            break\n";
        assert_eq!(check(source).len(), 1);
    }

    #[test]
    fn test_nested_infinite_loop_in_function() {
        let source = "async def main():\n    while True:\n        await tick()\n";
        let violations = check(source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
    }

    #[test]
    fn test_non_constant_condition_ignored() {
        assert!(check("while running:\n    step()\n").is_empty());
    }
}
