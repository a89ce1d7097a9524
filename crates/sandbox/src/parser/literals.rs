use super::expressions::build_expr;
use super::{Rule, ToolscriptParser, line_of, required, unexpected};
use crate::ast::{Constant, Expr, FStringPart};
use crate::error::{SandboxError, SandboxResult};
use pest::Parser;
use pest::iterators::Pair;

pub(super) fn build_number(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let literal = required(&mut parts, line, "number")?;
    if parts.next().is_some() {
        return Err(SandboxError::Unsupported("complex literals".into()));
    }
    let text: String = literal.as_str().chars().filter(|c| *c != '_').collect();
    match literal.as_rule() {
        Rule::radix_int => {
            let radix = match text.as_bytes().get(1) {
                Some(b'x' | b'X') => 16,
                Some(b'o' | b'O') => 8,
                _ => 2,
            };
            i64::from_str_radix(&text[2..], radix)
                .map(|i| Expr::Constant(Constant::Int(i)))
                .map_err(|_| SandboxError::syntax(line, format!("invalid integer literal '{text}'")))
        }
        Rule::float_lit => text
            .parse::<f64>()
            .map(|f| Expr::Constant(Constant::Float(f)))
            .map_err(|_| SandboxError::syntax(line, format!("invalid float literal '{text}'"))),
        Rule::dec_int => text
            .parse::<i64>()
            .map(|i| Expr::Constant(Constant::Int(i)))
            .map_err(|_| {
                SandboxError::syntax(line, format!("integer literal '{text}' is too large"))
            }),
        _ => Err(unexpected(&literal)),
    }
}

/// Adjacent string literals concatenate; any f-string among them makes the
/// whole atom an f-string.
pub(super) fn build_strings(pair: Pair<'_, Rule>) -> SandboxResult<Expr> {
    let mut parts: Vec<FStringPart> = Vec::new();
    let mut formatted = false;
    for literal in pair.into_inner() {
        let line = line_of(&literal);
        let mut prefix = String::new();
        let mut body = "";
        for part in literal.into_inner() {
            match part.as_rule() {
                Rule::string_prefix => prefix = part.as_str().to_ascii_lowercase(),
                _ => {
                    body = part
                        .into_inner()
                        .next()
                        .map(|b| b.as_str())
                        .unwrap_or_default();
                }
            }
        }
        let text = if prefix.contains('r') {
            body.to_string()
        } else {
            unescape(body, line)?
        };
        if prefix.contains('f') {
            formatted = true;
            for part in build_fstring(&text, line)? {
                match part {
                    FStringPart::Literal(text) => push_literal(&mut parts, &text),
                    field => parts.push(field),
                }
            }
        } else {
            push_literal(&mut parts, &text);
        }
    }
    if formatted {
        return Ok(Expr::FString(parts));
    }
    let text = parts
        .into_iter()
        .map(|p| match p {
            FStringPart::Literal(s) => s,
            FStringPart::Field { .. } => String::new(),
        })
        .collect();
    Ok(Expr::Constant(Constant::Str(text)))
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else if !text.is_empty() {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Decode backslash escapes. Unknown escapes are kept verbatim and a
/// backslash before a newline joins the lines.
fn unescape(body: &str, line: usize) -> SandboxResult<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' => out.push(hex_escape(&mut chars, 2, line)?),
            'u' => out.push(hex_escape(&mut chars, 4, line)?),
            'U' => out.push(hex_escape(&mut chars, 8, line)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn hex_escape(chars: &mut std::str::Chars<'_>, digits: usize, line: usize) -> SandboxResult<char> {
    let text: String = chars.by_ref().take(digits).collect();
    if text.chars().count() < digits {
        return Err(SandboxError::syntax(line, "truncated escape sequence"));
    }
    u32::from_str_radix(&text, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| SandboxError::syntax(line, format!("invalid escape sequence '{text}'")))
}

/// Split a decoded f-string body into literal text and `{expr!c:spec}`
/// fields.
fn build_fstring(body: &str, line: usize) -> SandboxResult<Vec<FStringPart>> {
    let mut pairs = ToolscriptParser::parse(Rule::fstring_body, body).map_err(|err| {
        SandboxError::syntax(line, format!("f-string: {}", err.variant.message()))
    })?;
    let Some(root) = pairs.next() else {
        return Ok(Vec::new());
    };
    let mut parts = Vec::new();
    for piece in root.into_inner() {
        match piece.as_rule() {
            Rule::fstring_text => push_literal(&mut parts, piece.as_str()),
            Rule::fstring_escape => push_literal(&mut parts, &piece.as_str()[..1]),
            Rule::fstring_field => parts.push(build_field(piece, line)?),
            _ => {}
        }
    }
    Ok(parts)
}

fn build_field(pair: Pair<'_, Rule>, line: usize) -> SandboxResult<FStringPart> {
    let mut expr = None;
    let mut conversion = None;
    let mut spec = String::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::fstring_conversion => conversion = part.as_str().chars().nth(1),
            Rule::fstring_spec => {
                spec = part
                    .into_inner()
                    .next()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default();
            }
            _ => expr = Some(build_expr(part)?),
        }
    }
    let expr = expr.ok_or_else(|| SandboxError::syntax(line, "f-string: empty expression"))?;
    Ok(FStringPart::Field {
        expr,
        conversion,
        spec,
    })
}
