//! Toolscript front end.
//!
//! `toolscript.pest` follows Python's grammar and precedence for the
//! supported subset; the builders in this module lower the resulting pairs
//! into [`crate::ast`]. Syntax outside the subset (classes, `with`, lambdas,
//! generators, star-args, decorators) still parses, so that the builders can
//! reject it with [`SandboxError::Unsupported`] instead of a syntax error.

mod expressions;
mod literals;
mod statements;

use crate::ast::Module;
use crate::error::{SandboxError, SandboxResult};
use pest::Parser;
use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::Pair;

#[derive(pest_derive::Parser)]
#[grammar = "toolscript.pest"] // relative to src/
pub struct ToolscriptParser;

/// Parse a complete source file.
pub fn parse(source: &str) -> SandboxResult<Module> {
    let mut pairs = ToolscriptParser::parse(Rule::file, source).map_err(syntax_error)?;
    let Some(file) = pairs.next() else {
        return Ok(Module { body: Vec::new() });
    };
    let mut body = Vec::new();
    for pair in file.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        body.extend(statements::build_statement(pair)?);
    }
    Ok(Module { body })
}

fn syntax_error(err: PestError<Rule>) -> SandboxError {
    let line = match err.line_col {
        LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
    };
    SandboxError::syntax(line, format!("invalid syntax, {}", err.variant.message()))
}

fn line_of(pair: &Pair<'_, Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_and
            | Rule::kw_as
            | Rule::kw_assert
            | Rule::kw_async
            | Rule::kw_await
            | Rule::kw_break
            | Rule::kw_class
            | Rule::kw_continue
            | Rule::kw_def
            | Rule::kw_del
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_except
            | Rule::kw_finally
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_global
            | Rule::kw_if
            | Rule::kw_import
            | Rule::kw_in
            | Rule::kw_is
            | Rule::kw_lambda
            | Rule::kw_nonlocal
            | Rule::kw_not
            | Rule::kw_or
            | Rule::kw_pass
            | Rule::kw_raise
            | Rule::kw_return
            | Rule::kw_try
            | Rule::kw_while
            | Rule::kw_with
            | Rule::kw_yield
    )
}

/// Inner pairs with keyword tokens dropped.
fn children<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn has_child(pair: &Pair<'_, Rule>, rule: Rule) -> bool {
    pair.clone().into_inner().any(|p| p.as_rule() == rule)
}

/// Next pair the grammar guarantees; a miss means the grammar and the
/// builders disagree.
fn required<'i>(
    pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
    line: usize,
    what: &str,
) -> SandboxResult<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| SandboxError::syntax(line, format!("expected {what}")))
}

fn unexpected(pair: &Pair<'_, Rule>) -> SandboxError {
    SandboxError::syntax(
        line_of(pair),
        format!("unexpected {:?} '{}'", pair.as_rule(), pair.as_str().trim()),
    )
}
