use super::literals::{build_number, build_strings};
use super::{Rule, children, has_child, line_of, required, unexpected};
use crate::ast::{BinOp, BoolOp, CmpOp, Comprehension, Constant, Expr, UnaryOp};
use crate::error::{SandboxError, SandboxResult};
use pest::iterators::Pair;

pub(super) fn build_expr(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::testlist => build_sequence(pair, Expr::Tuple),
        Rule::target_list => build_target_list(pair),
        // Single-child levels the grammar always wraps.
        Rule::test | Rule::not_test => {
            build_expr(required(&mut pair.into_inner(), line, "expression")?)
        }
        Rule::lambda_expr => Err(SandboxError::Unsupported("lambda expressions".into())),
        Rule::walrus => Err(SandboxError::Unsupported("assignment expressions".into())),
        Rule::yield_expr => Err(SandboxError::Unsupported("generators".into())),
        Rule::conditional => build_conditional(pair),
        Rule::or_test => build_bool_op(pair, BoolOp::Or),
        Rule::and_test => build_bool_op(pair, BoolOp::And),
        Rule::not_expr => {
            let operand = build_expr(required(&mut children(pair), line, "operand")?)?;
            Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            })
        }
        Rule::comparison => build_comparison(pair),
        Rule::bitor => fold_uniform(pair, BinOp::BitOr),
        Rule::bitxor => fold_uniform(pair, BinOp::BitXor),
        Rule::bitand => fold_uniform(pair, BinOp::BitAnd),
        Rule::shift | Rule::arith | Rule::term => fold_with_operators(pair),
        Rule::factor => build_factor(pair),
        Rule::power => build_power(pair),
        Rule::primary => build_primary(pair),
        Rule::paren_atom => build_paren(pair),
        Rule::list_atom => build_list(pair),
        Rule::brace_atom => build_brace(pair),
        Rule::strings => build_strings(pair),
        Rule::number => build_number(pair),
        Rule::ellipsis | Rule::none_lit => Ok(Expr::Constant(Constant::None)),
        Rule::true_lit => Ok(Expr::Constant(Constant::Bool(true))),
        Rule::false_lit => Ok(Expr::Constant(Constant::Bool(false))),
        Rule::identifier => Ok(Expr::Name(pair.as_str().to_string())),
        _ => Err(unexpected(&pair)),
    }
}

/// Items separated by `comma` tokens. A single item without a comma stands
/// for itself; anything else builds a sequence.
fn build_sequence(pair: Pair<'_, Rule>, make: fn(Vec<Expr>) -> Expr) -> SandboxResult<Expr> {
    let mut items = Vec::new();
    let mut saw_comma = false;
    for child in pair.into_inner() {
        if child.as_rule() == Rule::comma {
            saw_comma = true;
        } else {
            items.push(build_expr(child)?);
        }
    }
    if !saw_comma && items.len() == 1 {
        return Ok(items.remove(0));
    }
    Ok(make(items))
}

/// Loop or comprehension target: names, subscripts, attributes and tuples
/// of them.
pub(super) fn build_target_list(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let target = build_sequence(pair, Expr::Tuple)?;
    check_target(&target, line)?;
    Ok(target)
}

/// Individual targets of a `del` statement.
pub(super) fn build_target_items(pair: Pair<'_, Rule>) -> SandboxResult<Vec<Expr>> {
    let line = line_of(&pair);
    let targets = pair
        .into_inner()
        .filter(|p| p.as_rule() != Rule::comma)
        .map(build_expr)
        .collect::<SandboxResult<Vec<_>>>()?;
    for target in &targets {
        check_target(target, line)?;
    }
    Ok(targets)
}

pub(super) fn check_target(target: &Expr, line: usize) -> SandboxResult<()> {
    match target {
        Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. } => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => {
            items.iter().try_for_each(|item| check_target(item, line))
        }
        _ => Err(SandboxError::syntax(line, "cannot assign to expression")),
    }
}

fn build_conditional(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut parts = children(pair);
    let body = build_expr(required(&mut parts, line, "expression")?)?;
    let Some(test) = parts.next() else {
        return Ok(body);
    };
    let test = build_expr(test)?;
    let orelse = build_expr(required(&mut parts, line, "else branch")?)?;
    Ok(Expr::IfExp {
        test: Box::new(test),
        body: Box::new(body),
        orelse: Box::new(orelse),
    })
}

fn build_bool_op(pair: Pair<'_, Rule>, op: BoolOp) -> SandboxResult<Expr> {
    let mut values = children(pair)
        .map(build_expr)
        .collect::<SandboxResult<Vec<_>>>()?;
    if values.len() == 1 {
        return Ok(values.remove(0));
    }
    Ok(Expr::BoolOp { op, values })
}

fn comparison_operator(pair: &Pair<'_, Rule>) -> SandboxResult<CmpOp> {
    let words: Vec<&str> = pair.as_str().split_whitespace().collect();
    Ok(match words.as_slice() {
        ["=="] => CmpOp::Eq,
        ["!="] => CmpOp::NotEq,
        ["<"] => CmpOp::Lt,
        ["<="] => CmpOp::LtE,
        [">"] => CmpOp::Gt,
        [">="] => CmpOp::GtE,
        ["in"] => CmpOp::In,
        ["not", "in"] => CmpOp::NotIn,
        ["is"] => CmpOp::Is,
        ["is", "not"] => CmpOp::IsNot,
        _ => return Err(unexpected(pair)),
    })
}

fn build_comparison(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let left = build_expr(required(&mut inner, line, "operand")?)?;
    let mut ops = Vec::new();
    let mut comparators = Vec::new();
    while let Some(op) = inner.next() {
        ops.push(comparison_operator(&op)?);
        comparators.push(build_expr(required(&mut inner, line, "operand")?)?);
    }
    if ops.is_empty() {
        return Ok(left);
    }
    Ok(Expr::Compare {
        left: Box::new(left),
        ops,
        comparators,
    })
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// Left fold for levels with a single operator (`|`, `^`, `&`).
fn fold_uniform(pair: Pair<'_, Rule>, op: BinOp) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut operands = pair.into_inner();
    let mut left = build_expr(required(&mut operands, line, "operand")?)?;
    for right in operands {
        left = binary(left, op, build_expr(right)?);
    }
    Ok(left)
}

pub(super) fn binary_operator(symbol: &str) -> Option<BinOp> {
    Some(match symbol {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "//" => BinOp::FloorDiv,
        "%" => BinOp::Mod,
        "**" => BinOp::Pow,
        "&" => BinOp::BitAnd,
        "|" => BinOp::BitOr,
        "^" => BinOp::BitXor,
        "<<" => BinOp::LShift,
        ">>" => BinOp::RShift,
        _ => return None,
    })
}

/// Left fold for levels whose operators appear as tokens.
fn fold_with_operators(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut left = build_expr(required(&mut inner, line, "operand")?)?;
    while let Some(op) = inner.next() {
        if op.as_str() == "@" {
            return Err(SandboxError::Unsupported("matrix multiplication".into()));
        }
        let op_kind = binary_operator(op.as_str()).ok_or_else(|| unexpected(&op))?;
        let right = build_expr(required(&mut inner, line, "operand")?)?;
        left = binary(left, op_kind, right);
    }
    Ok(left)
}

fn build_factor(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let first = required(&mut inner, line, "operand")?;
    if first.as_rule() != Rule::unary_op {
        return build_expr(first);
    }
    let op = match first.as_str() {
        "-" => UnaryOp::Neg,
        "+" => UnaryOp::Pos,
        _ => UnaryOp::Invert,
    };
    let operand = build_expr(required(&mut inner, line, "operand")?)?;
    // Fold negative literals so `-1` is a constant.
    if op == UnaryOp::Neg {
        match operand {
            Expr::Constant(Constant::Int(i)) => return Ok(Expr::Constant(Constant::Int(-i))),
            Expr::Constant(Constant::Float(f)) => {
                return Ok(Expr::Constant(Constant::Float(-f)));
            }
            _ => {}
        }
    }
    Ok(Expr::UnaryOp {
        op,
        operand: Box::new(operand),
    })
}

fn build_power(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let awaited = has_child(&pair, Rule::kw_await);
    let mut parts = children(pair);
    let mut base = build_expr(required(&mut parts, line, "operand")?)?;
    if awaited {
        base = Expr::Await(Box::new(base));
    }
    match parts.next() {
        Some(exponent) => Ok(binary(base, BinOp::Pow, build_expr(exponent)?)),
        None => Ok(base),
    }
}

fn build_primary(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut expr = build_expr(required(&mut inner, line, "operand")?)?;
    for trailer in inner {
        expr = match trailer.as_rule() {
            Rule::call => build_call(expr, trailer)?,
            Rule::subscription => Expr::Subscript {
                value: Box::new(expr),
                index: Box::new(build_subscription(trailer)?),
            },
            Rule::attribute_ref => {
                let attr = required(&mut trailer.into_inner(), line, "attribute name")?;
                Expr::Attribute {
                    value: Box::new(expr),
                    attr: attr.as_str().to_string(),
                }
            }
            _ => return Err(unexpected(&trailer)),
        };
    }
    Ok(expr)
}

fn build_call(func: Expr, pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    let arguments = pair.into_inner().flat_map(|p| p.into_inner());
    for argument in arguments {
        let line = line_of(&argument);
        match argument.as_rule() {
            Rule::star_arg => return Err(SandboxError::Unsupported("argument unpacking".into())),
            Rule::kwarg => {
                let mut inner = argument.into_inner();
                let name = required(&mut inner, line, "keyword")?.as_str().to_string();
                let value = build_expr(required(&mut inner, line, "keyword value")?)?;
                kwargs.push((name, value));
            }
            Rule::positional => {
                if !kwargs.is_empty() {
                    return Err(SandboxError::syntax(
                        line,
                        "positional argument follows keyword argument",
                    ));
                }
                let mut inner = argument.into_inner();
                let value = build_expr(required(&mut inner, line, "argument")?)?;
                let generators = inner
                    .map(build_comprehension)
                    .collect::<SandboxResult<Vec<_>>>()?;
                if generators.is_empty() {
                    args.push(value);
                } else {
                    args.push(Expr::ListComp {
                        elt: Box::new(value),
                        generators,
                    });
                }
            }
            _ => return Err(unexpected(&argument)),
        }
    }
    Ok(Expr::Call {
        func: Box::new(func),
        args,
        kwargs,
    })
}

fn build_subscription(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let mut items = Vec::new();
    let mut saw_comma = false;
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::comma => saw_comma = true,
            Rule::slice => items.push(build_slice(child)?),
            _ => items.push(build_expr(child)?),
        }
    }
    if !saw_comma && items.len() == 1 {
        return Ok(items.remove(0));
    }
    Ok(Expr::Tuple(items))
}

fn build_slice(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let mut lower = None;
    let mut upper = None;
    let mut step = None;
    for bound in pair.into_inner() {
        let line = line_of(&bound);
        let rule = bound.as_rule();
        let value = Box::new(build_expr(required(
            &mut bound.into_inner(),
            line,
            "slice bound",
        )?)?);
        match rule {
            Rule::slice_lower => lower = Some(value),
            Rule::slice_upper => upper = Some(value),
            _ => step = Some(value),
        }
    }
    Ok(Expr::Slice { lower, upper, step })
}

pub(super) fn build_comprehension(pair: Pair<'_, Rule>) -> SandboxResult<Comprehension> {
    let line = line_of(&pair);
    if has_child(&pair, Rule::kw_async) {
        return Err(SandboxError::Unsupported("async comprehensions".into()));
    }
    let mut parts = children(pair);
    let target = build_target_list(required(&mut parts, line, "loop target")?)?;
    let iter = build_expr(required(&mut parts, line, "iterable")?)?;
    let ifs = parts
        .map(|clause| {
            let line = line_of(&clause);
            build_expr(required(&mut children(clause), line, "condition")?)
        })
        .collect::<SandboxResult<Vec<_>>>()?;
    Ok(Comprehension { target, iter, ifs })
}

/// Shared shape of `(...)` and `[...]`: a first item followed by either
/// comprehension clauses or further comma-separated items.
struct DisplayParts {
    items: Vec<Expr>,
    generators: Vec<Comprehension>,
    saw_comma: bool,
}

impl DisplayParts {
    fn comprehension(&mut self) -> Option<Expr> {
        if self.generators.is_empty() {
            return None;
        }
        let elt = self.items.pop()?;
        Some(Expr::ListComp {
            elt: Box::new(elt),
            generators: std::mem::take(&mut self.generators),
        })
    }
}

fn display(pair: Pair<'_, Rule>) -> SandboxResult<DisplayParts> {
    let mut out = DisplayParts {
        items: Vec::new(),
        generators: Vec::new(),
        saw_comma: false,
    };
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::comma => out.saw_comma = true,
            Rule::comp_for => out.generators.push(build_comprehension(child)?),
            _ => out.items.push(build_expr(child)?),
        }
    }
    Ok(out)
}

fn build_paren(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let mut parts = display(pair)?;
    if let Some(comp) = parts.comprehension() {
        return Ok(comp);
    }
    if !parts.saw_comma && parts.items.len() == 1 {
        return Ok(parts.items.remove(0));
    }
    Ok(Expr::Tuple(parts.items))
}

fn build_list(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let mut parts = display(pair)?;
    if let Some(comp) = parts.comprehension() {
        return Ok(comp);
    }
    Ok(Expr::List(parts.items))
}

fn build_brace(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let Some(body) = pair.into_inner().next() else {
        return Ok(Expr::Dict(Vec::new()));
    };
    if body.as_rule() == Rule::set_body {
        if has_child(&body, Rule::comp_for) {
            return Err(SandboxError::Unsupported("set comprehensions".into()));
        }
        let items = body
            .into_inner()
            .map(build_expr)
            .collect::<SandboxResult<Vec<_>>>()?;
        return Ok(Expr::Set(items));
    }

    let mut pairs = Vec::new();
    let mut generators = Vec::new();
    for entry in body.into_inner() {
        let line = line_of(&entry);
        match entry.as_rule() {
            Rule::dict_unpack => return Err(SandboxError::Unsupported("dict unpacking".into())),
            Rule::dict_pair => {
                let mut kv = entry.into_inner();
                let key = build_expr(required(&mut kv, line, "dict key")?)?;
                let value = build_expr(required(&mut kv, line, "dict value")?)?;
                pairs.push((key, value));
            }
            Rule::comp_for => generators.push(build_comprehension(entry)?),
            _ => return Err(unexpected(&entry)),
        }
    }
    let Some((key, value)) = pairs.pop().filter(|_| !generators.is_empty()) else {
        return Ok(Expr::Dict(pairs));
    };
    Ok(Expr::DictComp {
        key: Box::new(key),
        value: Box::new(value),
        generators,
    })
}
