use super::expressions::{
    binary_operator, build_expr, build_target_items, build_target_list, check_target,
};
use super::{Rule, children, has_child, line_of, required, unexpected};
use crate::ast::{ExceptHandler, Expr, FunctionDef, ImportName, Param, Stmt};
use crate::error::{SandboxError, SandboxResult};
use pest::iterators::Pair;
use std::sync::Arc;

/// Build one source statement. A simple line may hold several
/// `;`-separated statements.
pub(super) fn build_statement(pair: Pair<'_, Rule>) -> SandboxResult<Vec<Stmt>> {
    Ok(match pair.as_rule() {
        Rule::simple_line => pair
            .into_inner()
            .map(build_small_statement)
            .collect::<SandboxResult<Vec<_>>>()?,
        Rule::if_stmt => vec![build_if(pair)?],
        Rule::while_stmt => vec![build_while(pair)?],
        Rule::for_stmt => vec![build_for(pair)?],
        Rule::try_stmt => vec![build_try(pair)?],
        Rule::funcdef => vec![build_function(pair)?],
        Rule::unsupported_stmt => return Err(unsupported_statement(pair)),
        _ => return Err(unexpected(&pair)),
    })
}

fn unsupported_statement(pair: Pair<'_, Rule>) -> SandboxError {
    let what = match pair.into_inner().next().map(|p| p.as_rule()) {
        Some(Rule::decorator_mark) => "decorators",
        Some(Rule::kw_class) => "class definitions",
        Some(Rule::kw_with) => "with statements",
        _ => "async for / async with statements",
    };
    SandboxError::Unsupported(what.into())
}

/// Body of a compound statement: an indented block or an inline simple
/// line.
fn build_suite(pair: Pair<'_, Rule>) -> SandboxResult<Vec<Stmt>> {
    match pair.as_rule() {
        Rule::block => {
            let mut body = Vec::new();
            for stmt in pair.into_inner() {
                body.extend(build_statement(stmt)?);
            }
            Ok(body)
        }
        _ => build_statement(pair),
    }
}

/// Expression of a clause header such as `while x:` or `elif y:`.
fn header_test(head: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&head);
    build_expr(required(&mut children(head), line, "condition")?)
}

/// Body of an `elif`/`else`/`finally` clause: header followed by suite.
fn clause_body(clause: Pair<'_, Rule>) -> SandboxResult<Vec<Stmt>> {
    let line = line_of(&clause);
    let mut parts = clause.into_inner();
    required(&mut parts, line, "clause header")?;
    build_suite(required(&mut parts, line, "clause body")?)
}

fn build_if(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let test = header_test(required(&mut parts, line, "if header")?)?;
    let body = build_suite(required(&mut parts, line, "if body")?)?;

    let mut elifs = Vec::new();
    let mut orelse = Vec::new();
    for clause in parts {
        if clause.as_rule() == Rule::elif_clause {
            let clause_line = line_of(&clause);
            let mut inner = clause.into_inner();
            let elif_test = header_test(required(&mut inner, clause_line, "elif header")?)?;
            let elif_body = build_suite(required(&mut inner, clause_line, "elif body")?)?;
            elifs.push((elif_test, elif_body));
        } else {
            orelse = clause_body(clause)?;
        }
    }
    // `elif` chains nest as an `if` in the preceding orelse.
    for (test, body) in elifs.into_iter().rev() {
        orelse = vec![Stmt::If { test, body, orelse }];
    }
    Ok(Stmt::If { test, body, orelse })
}

fn build_while(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let test = header_test(required(&mut parts, line, "while header")?)?;
    let body = build_suite(required(&mut parts, line, "while body")?)?;
    let orelse = match parts.next() {
        Some(clause) => clause_body(clause)?,
        None => Vec::new(),
    };
    Ok(Stmt::While { test, body, orelse })
}

fn build_for(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let head = required(&mut parts, line, "for header")?;
    let mut head_parts = children(head);
    let target = build_target_list(required(&mut head_parts, line, "loop target")?)?;
    let iter = build_expr(required(&mut head_parts, line, "iterable")?)?;
    let body = build_suite(required(&mut parts, line, "for body")?)?;
    let orelse = match parts.next() {
        Some(clause) => clause_body(clause)?,
        None => Vec::new(),
    };
    Ok(Stmt::For {
        target,
        iter,
        body,
        orelse,
    })
}

fn exception_kinds(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Name(_) | Expr::Attribute { .. } => expr.dotted_name().map(|n| vec![n]),
        Expr::Tuple(items) => items
            .iter()
            .map(|item| item.dotted_name())
            .collect::<Option<Vec<_>>>(),
        _ => None,
    }
}

fn build_handler(clause: Pair<'_, Rule>) -> SandboxResult<ExceptHandler> {
    let line = line_of(&clause);
    let mut parts = clause.into_inner();
    let head = required(&mut parts, line, "except header")?;
    let body = build_suite(required(&mut parts, line, "except body")?)?;

    let mut kinds = Vec::new();
    let mut binding = None;
    for part in children(head) {
        match part.as_rule() {
            Rule::identifier => binding = Some(part.as_str().to_string()),
            _ => {
                kinds = exception_kinds(&build_expr(part)?).ok_or_else(|| {
                    SandboxError::syntax(line, "except clause must name exception classes")
                })?;
            }
        }
    }
    Ok(ExceptHandler {
        kinds,
        binding,
        body,
    })
}

fn build_try(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    required(&mut parts, line, "try header")?;
    let body = build_suite(required(&mut parts, line, "try body")?)?;

    let mut handlers = Vec::new();
    let mut orelse = Vec::new();
    let mut finalbody = Vec::new();
    let mut has_finally = false;
    for clause in parts {
        match clause.as_rule() {
            Rule::except_clause => handlers.push(build_handler(clause)?),
            Rule::else_clause => {
                if handlers.is_empty() {
                    return Err(SandboxError::syntax(
                        line_of(&clause),
                        "try statement has else without except",
                    ));
                }
                orelse = clause_body(clause)?;
            }
            _ => {
                has_finally = true;
                finalbody = clause_body(clause)?;
            }
        }
    }
    if handlers.is_empty() && !has_finally {
        return Err(SandboxError::syntax(
            line,
            "try statement needs an except or finally clause",
        ));
    }
    Ok(Stmt::Try {
        body,
        handlers,
        orelse,
        finalbody,
    })
}

fn build_params(pair: Pair<'_, Rule>) -> SandboxResult<Vec<Param>> {
    let mut params: Vec<Param> = Vec::new();
    for param in pair.into_inner() {
        let line = line_of(&param);
        match param.as_rule() {
            Rule::star_param => {
                return Err(SandboxError::Unsupported("variadic parameters".into()));
            }
            Rule::slash_param => continue,
            _ => {}
        }
        let mut parts = param.into_inner();
        let name = required(&mut parts, line, "parameter name")?.as_str().to_string();
        let mut annotation = None;
        let mut default = None;
        for part in parts {
            let part_line = line_of(&part);
            let rule = part.as_rule();
            let value = build_expr(required(&mut part.into_inner(), part_line, "expression")?)?;
            if rule == Rule::annotation {
                annotation = Some(value);
            } else {
                default = Some(value);
            }
        }
        if default.is_none() && params.iter().any(|p| p.default.is_some()) {
            return Err(SandboxError::syntax(
                line,
                "non-default argument follows default argument",
            ));
        }
        params.push(Param {
            name,
            annotation,
            default,
        });
    }
    Ok(params)
}

fn build_function(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let head = required(&mut parts, line, "function header")?;
    let body = build_suite(required(&mut parts, line, "function body")?)?;

    let is_async = has_child(&head, Rule::kw_async);
    let mut head_parts = children(head);
    let name = required(&mut head_parts, line, "function name")?
        .as_str()
        .to_string();
    let mut params = Vec::new();
    let mut returns = None;
    for part in head_parts {
        if part.as_rule() == Rule::parameters {
            params = build_params(part)?;
        } else {
            returns = Some(build_expr(part)?);
        }
    }
    Ok(Stmt::FunctionDef(Arc::new(FunctionDef {
        name,
        params,
        returns,
        body,
        is_async,
        line,
    })))
}

fn build_small_statement(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::pass_stmt => Ok(Stmt::Pass),
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::return_stmt => Ok(Stmt::Return(
            children(pair).next().map(build_expr).transpose()?,
        )),
        // A `from` cause is parsed and dropped.
        Rule::raise_stmt => Ok(Stmt::Raise(
            children(pair).next().map(build_expr).transpose()?,
        )),
        Rule::assert_stmt => {
            let mut parts = children(pair);
            let test = build_expr(required(&mut parts, line, "assertion")?)?;
            let msg = parts.next().map(build_expr).transpose()?;
            Ok(Stmt::Assert { test, msg })
        }
        Rule::del_stmt => {
            let targets = required(&mut children(pair), line, "del target")?;
            Ok(Stmt::Delete(build_target_items(targets)?))
        }
        Rule::global_stmt => {
            let word = if has_child(&pair, Rule::kw_global) {
                "global"
            } else {
                "nonlocal"
            };
            Err(SandboxError::Unsupported(format!("{word} declarations")))
        }
        Rule::import_stmt => children(pair)
            .map(import_name)
            .collect::<SandboxResult<Vec<_>>>()
            .map(Stmt::Import),
        Rule::from_import => build_from_import(pair),
        Rule::aug_assign => build_aug_assign(pair),
        Rule::ann_assign => {
            let mut parts = pair.into_inner();
            let target = build_expr(required(&mut parts, line, "target")?)?;
            check_target(&target, line)?;
            let annotation = required(&mut parts, line, "annotation")?;
            build_expr(required(&mut annotation.into_inner(), line, "annotation")?)?;
            match parts.next() {
                Some(assigned) => {
                    let value =
                        build_expr(required(&mut assigned.into_inner(), line, "value")?)?;
                    Ok(Stmt::Assign {
                        targets: vec![target],
                        value,
                    })
                }
                None => Ok(Stmt::Pass),
            }
        }
        Rule::assign_stmt => {
            let mut targets = pair
                .into_inner()
                .map(build_expr)
                .collect::<SandboxResult<Vec<_>>>()?;
            let value = targets
                .pop()
                .ok_or_else(|| SandboxError::syntax(line, "expected a value"))?;
            for target in &targets {
                check_target(target, line)?;
            }
            Ok(Stmt::Assign { targets, value })
        }
        Rule::expr_stmt => Ok(Stmt::Expr(build_expr(required(
            &mut pair.into_inner(),
            line,
            "expression",
        )?)?)),
        _ => Err(unexpected(&pair)),
    }
}

fn build_aug_assign(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let target = build_expr(required(&mut parts, line, "target")?)?;
    let op = required(&mut parts, line, "operator")?;
    let value = build_expr(required(&mut parts, line, "value")?)?;
    if matches!(target, Expr::Tuple(_) | Expr::List(_)) {
        return Err(SandboxError::syntax(
            line,
            "illegal expression for augmented assignment",
        ));
    }
    check_target(&target, line)?;
    let symbol = op.as_str().trim_end_matches('=');
    if symbol == "@" {
        return Err(SandboxError::Unsupported("matrix multiplication".into()));
    }
    let op = binary_operator(symbol).ok_or_else(|| unexpected(&op))?;
    Ok(Stmt::AugAssign { target, op, value })
}

/// `name [as alias]` in either import form.
fn import_name(pair: Pair<'_, Rule>) -> SandboxResult<ImportName> {
    let line = line_of(&pair);
    let mut parts = children(pair);
    let name = required(&mut parts, line, "module name")?.as_str().to_string();
    let alias = parts.next().map(|p| p.as_str().to_string());
    Ok(ImportName { name, alias })
}

fn build_from_import(pair: Pair<'_, Rule>) -> SandboxResult<Stmt> {
    let line = line_of(&pair);
    let mut parts = children(pair);
    let module = required(&mut parts, line, "module name")?;
    if module.as_rule() == Rule::relative_module {
        return Err(SandboxError::Unsupported("relative imports".into()));
    }
    let names = required(&mut parts, line, "imported names")?;
    if names.as_rule() == Rule::import_star {
        return Err(SandboxError::Unsupported("wildcard imports".into()));
    }
    Ok(Stmt::ImportFrom {
        module: module.as_str().to_string(),
        names: names
            .into_inner()
            .map(import_name)
            .collect::<SandboxResult<Vec<_>>>()?,
    })
}
