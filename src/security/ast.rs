//! Source positions and a read-only traversal over the parsed Python AST.

use rustpython_parser::ast::{self, Expr, Stmt};

/// Source text with a precomputed line table for offset -> (line, column)
/// lookups.
#[derive(Debug)]
pub struct SourceText<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceText<'a> {
    /// Index the given source.
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self { text, line_starts }
    }

    /// The raw source text.
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Convert a byte offset into a 1-based line and 0-based character column.
    pub fn location(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let start = self.line_starts[line_idx];
        let column = self
            .text
            .get(start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0);
        (line_idx + 1, column)
    }

    /// The text of a 1-based line, without its terminator.
    pub fn line(&self, line: usize) -> Option<&'a str> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        self.text
            .get(start..end)
            .map(|l| l.trim_end_matches('\r'))
    }

    /// The trimmed source line, used as a violation snippet.
    pub fn snippet(&self, line: usize) -> Option<String> {
        self.line(line)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
    }
}

/// Read-only AST visitor. Override a hook and call the matching `walk_*`
/// function to keep descending.
pub(crate) trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub(crate) fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

fn walk_exprs<V: Visitor + ?Sized>(visitor: &mut V, exprs: &[Expr]) {
    for expr in exprs {
        visitor.visit_expr(expr);
    }
}

fn walk_opt<V: Visitor + ?Sized>(visitor: &mut V, expr: &Option<Box<Expr>>) {
    if let Some(expr) = expr {
        visitor.visit_expr(expr);
    }
}

fn walk_arguments<V: Visitor + ?Sized>(visitor: &mut V, args: &ast::Arguments) {
    for arg in args
        .posonlyargs
        .iter()
        .chain(args.args.iter())
        .chain(args.kwonlyargs.iter())
    {
        walk_opt(visitor, &arg.default);
    }
}

fn walk_comprehensions<V: Visitor + ?Sized>(visitor: &mut V, generators: &[ast::Comprehension]) {
    for generator in generators {
        visitor.visit_expr(&generator.target);
        visitor.visit_expr(&generator.iter);
        walk_exprs(visitor, &generator.ifs);
    }
}

fn walk_handlers<V: Visitor + ?Sized>(visitor: &mut V, handlers: &[ast::ExceptHandler]) {
    for handler in handlers {
        match handler {
            ast::ExceptHandler::ExceptHandler(handler) => {
                walk_opt(visitor, &handler.type_);
                walk_body(visitor, &handler.body);
            }
        }
    }
}

fn walk_with_items<V: Visitor + ?Sized>(visitor: &mut V, items: &[ast::WithItem]) {
    for item in items {
        visitor.visit_expr(&item.context_expr);
        walk_opt(visitor, &item.optional_vars);
    }
}

pub(crate) fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::FunctionDef(node) => {
            walk_exprs(visitor, &node.decorator_list);
            walk_arguments(visitor, &node.args);
            walk_opt(visitor, &node.returns);
            walk_body(visitor, &node.body);
        }
        Stmt::AsyncFunctionDef(node) => {
            walk_exprs(visitor, &node.decorator_list);
            walk_arguments(visitor, &node.args);
            walk_opt(visitor, &node.returns);
            walk_body(visitor, &node.body);
        }
        Stmt::ClassDef(node) => {
            walk_exprs(visitor, &node.decorator_list);
            walk_exprs(visitor, &node.bases);
            for keyword in &node.keywords {
                visitor.visit_expr(&keyword.value);
            }
            walk_body(visitor, &node.body);
        }
        Stmt::Return(node) => walk_opt(visitor, &node.value),
        Stmt::Delete(node) => walk_exprs(visitor, &node.targets),
        Stmt::Assign(node) => {
            walk_exprs(visitor, &node.targets);
            visitor.visit_expr(&node.value);
        }
        Stmt::AugAssign(node) => {
            visitor.visit_expr(&node.target);
            visitor.visit_expr(&node.value);
        }
        Stmt::AnnAssign(node) => {
            visitor.visit_expr(&node.target);
            visitor.visit_expr(&node.annotation);
            walk_opt(visitor, &node.value);
        }
        Stmt::For(node) => {
            visitor.visit_expr(&node.target);
            visitor.visit_expr(&node.iter);
            walk_body(visitor, &node.body);
            walk_body(visitor, &node.orelse);
        }
        Stmt::AsyncFor(node) => {
            visitor.visit_expr(&node.target);
            visitor.visit_expr(&node.iter);
            walk_body(visitor, &node.body);
            walk_body(visitor, &node.orelse);
        }
        Stmt::While(node) => {
            visitor.visit_expr(&node.test);
            walk_body(visitor, &node.body);
            walk_body(visitor, &node.orelse);
        }
        Stmt::If(node) => {
            visitor.visit_expr(&node.test);
            walk_body(visitor, &node.body);
            walk_body(visitor, &node.orelse);
        }
        Stmt::With(node) => {
            walk_with_items(visitor, &node.items);
            walk_body(visitor, &node.body);
        }
        Stmt::AsyncWith(node) => {
            walk_with_items(visitor, &node.items);
            walk_body(visitor, &node.body);
        }
        Stmt::Match(node) => {
            visitor.visit_expr(&node.subject);
            for case in &node.cases {
                walk_opt(visitor, &case.guard);
                walk_body(visitor, &case.body);
            }
        }
        Stmt::Raise(node) => {
            walk_opt(visitor, &node.exc);
            walk_opt(visitor, &node.cause);
        }
        Stmt::Try(node) => {
            walk_body(visitor, &node.body);
            walk_handlers(visitor, &node.handlers);
            walk_body(visitor, &node.orelse);
            walk_body(visitor, &node.finalbody);
        }
        Stmt::TryStar(node) => {
            walk_body(visitor, &node.body);
            walk_handlers(visitor, &node.handlers);
            walk_body(visitor, &node.orelse);
            walk_body(visitor, &node.finalbody);
        }
        Stmt::Assert(node) => {
            visitor.visit_expr(&node.test);
            walk_opt(visitor, &node.msg);
        }
        Stmt::Expr(node) => visitor.visit_expr(&node.value),
        _ => {}
    }
}

pub(crate) fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::BoolOp(node) => walk_exprs(visitor, &node.values),
        Expr::NamedExpr(node) => {
            visitor.visit_expr(&node.target);
            visitor.visit_expr(&node.value);
        }
        Expr::BinOp(node) => {
            visitor.visit_expr(&node.left);
            visitor.visit_expr(&node.right);
        }
        Expr::UnaryOp(node) => visitor.visit_expr(&node.operand),
        Expr::Lambda(node) => {
            walk_arguments(visitor, &node.args);
            visitor.visit_expr(&node.body);
        }
        Expr::IfExp(node) => {
            visitor.visit_expr(&node.test);
            visitor.visit_expr(&node.body);
            visitor.visit_expr(&node.orelse);
        }
        Expr::Dict(node) => {
            for key in node.keys.iter().flatten() {
                visitor.visit_expr(key);
            }
            walk_exprs(visitor, &node.values);
        }
        Expr::Set(node) => walk_exprs(visitor, &node.elts),
        Expr::ListComp(node) => {
            visitor.visit_expr(&node.elt);
            walk_comprehensions(visitor, &node.generators);
        }
        Expr::SetComp(node) => {
            visitor.visit_expr(&node.elt);
            walk_comprehensions(visitor, &node.generators);
        }
        Expr::DictComp(node) => {
            visitor.visit_expr(&node.key);
            visitor.visit_expr(&node.value);
            walk_comprehensions(visitor, &node.generators);
        }
        Expr::GeneratorExp(node) => {
            visitor.visit_expr(&node.elt);
            walk_comprehensions(visitor, &node.generators);
        }
        Expr::Await(node) => visitor.visit_expr(&node.value),
        Expr::Yield(node) => walk_opt(visitor, &node.value),
        Expr::YieldFrom(node) => visitor.visit_expr(&node.value),
        Expr::Compare(node) => {
            visitor.visit_expr(&node.left);
            walk_exprs(visitor, &node.comparators);
        }
        Expr::Call(node) => {
            visitor.visit_expr(&node.func);
            walk_exprs(visitor, &node.args);
            for keyword in &node.keywords {
                visitor.visit_expr(&keyword.value);
            }
        }
        Expr::FormattedValue(node) => {
            visitor.visit_expr(&node.value);
            walk_opt(visitor, &node.format_spec);
        }
        Expr::JoinedStr(node) => walk_exprs(visitor, &node.values),
        Expr::Attribute(node) => visitor.visit_expr(&node.value),
        Expr::Subscript(node) => {
            visitor.visit_expr(&node.value);
            visitor.visit_expr(&node.slice);
        }
        Expr::Starred(node) => visitor.visit_expr(&node.value),
        Expr::List(node) => walk_exprs(visitor, &node.elts),
        Expr::Tuple(node) => walk_exprs(visitor, &node.elts),
        Expr::Slice(node) => {
            walk_opt(visitor, &node.lower);
            walk_opt(visitor, &node.upper);
            walk_opt(visitor, &node.step);
        }
        _ => {}
    }
}

/// Resolve an `Attribute` chain back to its root name, e.g. `os.path.join`.
///
/// Returns `None` when the chain is rooted in something other than a plain
/// name (a call result, a subscript, a literal).
pub(crate) fn dotted_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(name) => Some(name.id.as_str().to_string()),
        Expr::Attribute(attr) => {
            let mut base = dotted_name(&attr.value)?;
            base.push('.');
            base.push_str(attr.attr.as_str());
            Some(base)
        }
        _ => None,
    }
}
