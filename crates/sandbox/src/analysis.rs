//! Static facts about a parsed module, used for quality scoring and the
//! structural security check.

use crate::ast::{Comprehension, Expr, FStringPart, FunctionDef, Module, Stmt};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeFacts {
    /// Top-level function definitions.
    pub function_count: usize,
    /// Every `def`, nested ones included.
    pub definition_count: usize,
    /// Imported module names, including the module of `from x import y`.
    pub imports: Vec<String>,
    /// Dotted callee names, e.g. `re.sub` or `eval`.
    pub calls: Vec<String>,
    /// Every name and dotted attribute chain referenced.
    pub names: Vec<String>,
    pub raise_count: usize,
    pub try_count: usize,
    pub params_total: usize,
    pub params_annotated: usize,
    pub has_return_annotation: bool,
    /// Return annotation of the first function, rendered as source.
    pub return_annotation: Option<String>,
    /// Mean cyclomatic complexity over all functions.
    pub average_complexity: f64,
}

pub fn analyze(module: &Module) -> CodeFacts {
    let mut facts = CodeFacts::default();
    let mut complexities = Vec::new();
    let mut visitor = Visitor { facts: &mut facts };
    visitor.block(&module.body);

    for def in module.functions() {
        complexities.push(cyclomatic_complexity(def));
    }
    facts.function_count = complexities.len();
    if let Some(first) = module.functions().next() {
        facts.has_return_annotation = first.returns.is_some();
        facts.return_annotation = first.returns.as_ref().map(Expr::render);
    }
    if !complexities.is_empty() {
        facts.average_complexity =
            complexities.iter().sum::<usize>() as f64 / complexities.len() as f64;
    }
    facts
}

/// McCabe complexity: one plus each decision point.
pub fn cyclomatic_complexity(def: &FunctionDef) -> usize {
    1 + decisions_in_block(&def.body)
}

fn decisions_in_block(body: &[Stmt]) -> usize {
    body.iter().map(decisions_in_stmt).sum()
}

fn decisions_in_stmt(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::If { test, body, orelse } => {
            1 + decisions_in_expr(test) + decisions_in_block(body) + decisions_in_block(orelse)
        }
        Stmt::For {
            iter, body, orelse, ..
        } => 1 + decisions_in_expr(iter) + decisions_in_block(body) + decisions_in_block(orelse),
        Stmt::While { test, body, orelse } => {
            1 + decisions_in_expr(test) + decisions_in_block(body) + decisions_in_block(orelse)
        }
        Stmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            handlers.len()
                + decisions_in_block(body)
                + handlers.iter().map(|h| decisions_in_block(&h.body)).sum::<usize>()
                + decisions_in_block(orelse)
                + decisions_in_block(finalbody)
        }
        Stmt::Assert { test, .. } => 1 + decisions_in_expr(test),
        Stmt::Expr(e) | Stmt::Return(Some(e)) | Stmt::Raise(Some(e)) => decisions_in_expr(e),
        Stmt::Assign { value, .. } | Stmt::AugAssign { value, .. } => decisions_in_expr(value),
        // Nested functions are scored on their own.
        _ => 0,
    }
}

fn decisions_in_expr(expr: &Expr) -> usize {
    let comprehension = |generators: &[Comprehension]| -> usize {
        generators
            .iter()
            .map(|g| 1 + g.ifs.len() + decisions_in_expr(&g.iter))
            .sum()
    };
    match expr {
        Expr::BoolOp { values, .. } => {
            values.len().saturating_sub(1) + values.iter().map(decisions_in_expr).sum::<usize>()
        }
        Expr::IfExp { test, body, orelse } => {
            1 + decisions_in_expr(test) + decisions_in_expr(body) + decisions_in_expr(orelse)
        }
        Expr::ListComp { elt, generators } => comprehension(generators) + decisions_in_expr(elt),
        Expr::DictComp {
            key,
            value,
            generators,
        } => comprehension(generators) + decisions_in_expr(key) + decisions_in_expr(value),
        Expr::Call { func, args, kwargs } => {
            decisions_in_expr(func)
                + args.iter().map(decisions_in_expr).sum::<usize>()
                + kwargs.iter().map(|(_, e)| decisions_in_expr(e)).sum::<usize>()
        }
        Expr::Compare {
            left, comparators, ..
        } => decisions_in_expr(left) + comparators.iter().map(decisions_in_expr).sum::<usize>(),
        Expr::BinOp { left, right, .. } => decisions_in_expr(left) + decisions_in_expr(right),
        Expr::UnaryOp { operand, .. } | Expr::Await(operand) => decisions_in_expr(operand),
        _ => 0,
    }
}

struct Visitor<'a> {
    facts: &'a mut CodeFacts,
}

impl Visitor<'_> {
    fn block(&mut self, body: &[Stmt]) {
        body.iter().for_each(|s| self.stmt(s));
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign { targets, value } => {
                targets.iter().for_each(|t| self.expr(t));
                self.expr(value);
            }
            Stmt::AugAssign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Stmt::If { test, body, orelse } | Stmt::While { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(target);
                self.expr(iter);
                self.block(body);
                self.block(orelse);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.facts.try_count += 1;
                self.block(body);
                for handler in handlers {
                    self.facts.names.extend(handler.kinds.iter().cloned());
                    self.block(&handler.body);
                }
                self.block(orelse);
                self.block(finalbody);
            }
            Stmt::Return(value) => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Raise(value) => {
                self.facts.raise_count += 1;
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Assert { test, msg } => {
                self.expr(test);
                if let Some(m) = msg {
                    self.expr(m);
                }
            }
            Stmt::Delete(targets) => targets.iter().for_each(|t| self.expr(t)),
            Stmt::FunctionDef(def) => {
                self.facts.definition_count += 1;
                for param in &def.params {
                    self.facts.params_total += 1;
                    if param.annotation.is_some() {
                        self.facts.params_annotated += 1;
                    }
                    if let Some(d) = &param.default {
                        self.expr(d);
                    }
                }
                self.block(&def.body);
            }
            Stmt::Import(names) => {
                self.facts
                    .imports
                    .extend(names.iter().map(|n| n.name.clone()));
            }
            Stmt::ImportFrom { module, names } => {
                self.facts.imports.push(module.clone());
                self.facts
                    .names
                    .extend(names.iter().map(|n| format!("{module}.{}", n.name)));
            }
            Stmt::Break | Stmt::Continue | Stmt::Pass => {}
        }
    }

    fn comprehension(&mut self, generators: &[Comprehension]) {
        for g in generators {
            self.expr(&g.target);
            self.expr(&g.iter);
            g.ifs.iter().for_each(|e| self.expr(e));
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(name) => self.facts.names.push(name.clone()),
            Expr::Attribute { value, .. } => match expr.dotted_name() {
                Some(dotted) => self.facts.names.push(dotted),
                None => self.expr(value),
            },
            Expr::FString(parts) => {
                for part in parts {
                    if let FStringPart::Field { expr, .. } = part {
                        self.expr(expr);
                    }
                }
            }
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                items.iter().for_each(|e| self.expr(e));
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    self.expr(k);
                    self.expr(v);
                }
            }
            Expr::ListComp { elt, generators } => {
                self.comprehension(generators);
                self.expr(elt);
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                self.comprehension(generators);
                self.expr(key);
                self.expr(value);
            }
            Expr::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            Expr::Slice { lower, upper, step } => {
                for bound in [lower, upper, step].into_iter().flatten() {
                    self.expr(bound);
                }
            }
            Expr::Call { func, args, kwargs } => {
                if let Some(callee) = func.dotted_name() {
                    self.facts.calls.push(callee);
                }
                self.expr(func);
                args.iter().for_each(|e| self.expr(e));
                kwargs.iter().for_each(|(_, e)| self.expr(e));
            }
            Expr::BinOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::UnaryOp { operand, .. } | Expr::Await(operand) => self.expr(operand),
            Expr::BoolOp { values, .. } => values.iter().for_each(|e| self.expr(e)),
            Expr::Compare {
                left, comparators, ..
            } => {
                self.expr(left);
                comparators.iter().for_each(|e| self.expr(e));
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::Constant(_) => {}
        }
    }
}
