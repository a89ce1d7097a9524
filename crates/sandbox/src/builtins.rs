//! Builtin functions, the `re`/`math`/`asyncio` modules, and methods on
//! the builtin types.

use crate::error::{SandboxError, SandboxResult};
use crate::format::format_value;
use crate::interpreter::Interpreter;
use crate::limits::Budget;
use crate::ops::{self, VALUE_SIZE};
use crate::value::{BoundMethod, Dict, MatchData, Value, py_cmp, py_eq, py_repr, py_str};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::rc::Rc;

const BUILTINS: &[&str] = &[
    "len", "str", "int", "float", "bool", "list", "dict", "set", "min", "max", "sum",
];

const EXCEPTIONS: &[&str] = &["ValueError", "Exception"];

const MODULES: &[&str] = &["re", "math", "asyncio"];

const MODULE_FUNCTIONS: &[&str] = &[
    "re.match",
    "re.search",
    "re.fullmatch",
    "re.findall",
    "re.sub",
    "re.split",
    "math.sqrt",
    "math.floor",
    "math.ceil",
    "math.fabs",
    "math.pow",
    "math.log",
    "math.log10",
    "math.log2",
    "math.exp",
    "math.sin",
    "math.cos",
    "math.tan",
    "math.trunc",
    "math.isnan",
    "math.isinf",
    "math.isfinite",
    "asyncio.sleep",
];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "casefold", "strip", "lstrip", "rstrip", "split", "rsplit", "splitlines",
    "join", "replace", "startswith", "endswith", "find", "rfind", "index", "rindex", "count",
    "isdigit", "isalpha", "isalnum", "isspace", "isupper", "islower", "isnumeric", "isdecimal",
    "title", "capitalize", "swapcase", "center", "ljust", "rjust", "zfill", "format",
    "partition", "rpartition", "removeprefix", "removesuffix",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "copy", "clear",
];

const MATCH_METHODS: &[&str] = &["group", "groups", "groupdict", "start", "end", "span"];

const RE_IGNORECASE: i64 = 2;
const RE_MULTILINE: i64 = 8;
const RE_DOTALL: i64 = 16;
const RE_VERBOSE: i64 = 64;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

fn find_static(table: &[&'static str], name: &str) -> Option<&'static str> {
    table.iter().copied().find(|n| *n == name)
}

pub(crate) fn lookup_builtin(name: &str) -> Option<Value> {
    if let Some(n) = find_static(BUILTINS, name) {
        return Some(Value::Builtin(n));
    }
    if EXCEPTIONS.contains(&name) {
        return Some(Value::ExceptionType(Rc::from(name)));
    }
    find_static(MODULES, name).map(Value::Module)
}

pub(crate) fn module_attribute(module: &'static str, attr: &str) -> SandboxResult<Value> {
    let qualified = format!("{module}.{attr}");
    if let Some(f) = find_static(MODULE_FUNCTIONS, &qualified) {
        return Ok(Value::Builtin(f));
    }
    let constant = match (module, attr) {
        ("re", "I" | "IGNORECASE") => Some(Value::Int(RE_IGNORECASE)),
        ("re", "M" | "MULTILINE") => Some(Value::Int(RE_MULTILINE)),
        ("re", "S" | "DOTALL") => Some(Value::Int(RE_DOTALL)),
        ("re", "X" | "VERBOSE") => Some(Value::Int(RE_VERBOSE)),
        ("re", "error") => Some(Value::ExceptionType(Rc::from("re.error"))),
        ("math", "pi") => Some(Value::Float(std::f64::consts::PI)),
        ("math", "e") => Some(Value::Float(std::f64::consts::E)),
        ("math", "tau") => Some(Value::Float(std::f64::consts::TAU)),
        ("math", "inf") => Some(Value::Float(f64::INFINITY)),
        ("math", "nan") => Some(Value::Float(f64::NAN)),
        _ => None,
    };
    constant.ok_or_else(|| {
        SandboxError::raised(
            "AttributeError",
            format!("module '{module}' has no attribute '{attr}'"),
        )
    })
}

pub(crate) fn get_attribute(value: &Value, attr: &str) -> SandboxResult<Value> {
    let table = match value {
        Value::Module(m) => return module_attribute(*m, attr),
        Value::Exception(e) if attr == "args" => {
            return Ok(if e.message.is_empty() {
                Value::tuple(Vec::new())
            } else {
                Value::tuple(vec![Value::str(&e.message)])
            });
        }
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Match(_) => MATCH_METHODS,
        _ => &[],
    };
    match find_static(table, attr) {
        Some(name) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: value.clone(),
            name,
        }))),
        None => Err(SandboxError::raised(
            "AttributeError",
            format!("'{}' object has no attribute '{attr}'", value.type_name()),
        )),
    }
}

/// Positional and keyword arguments of one builtin call.
struct Args {
    name: String,
    positional: Vec<Value>,
    kwargs: Vec<(String, Value)>,
}

impl Args {
    fn new(name: &str, positional: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self {
            name: name.to_string(),
            positional,
            kwargs,
        }
    }

    fn kwarg(&mut self, key: &str) -> Option<Value> {
        let i = self.kwargs.iter().position(|(k, _)| k == key)?;
        Some(self.kwargs.remove(i).1)
    }

    /// Positional argument `i`, or the keyword of the same name.
    fn arg(&mut self, i: usize, key: &str) -> Option<Value> {
        match self.positional.get(i) {
            Some(v) => Some(v.clone()),
            None => self.kwarg(key),
        }
    }

    fn required(&mut self, i: usize, key: &str) -> SandboxResult<Value> {
        self.arg(i, key).ok_or_else(|| {
            SandboxError::type_error(format!(
                "{}() missing required argument '{key}' (pos {})",
                self.name,
                i + 1
            ))
        })
    }

    fn check(&self, max: usize) -> SandboxResult<()> {
        if self.positional.len() > max {
            return Err(SandboxError::type_error(format!(
                "{}() takes at most {max} argument{} ({} given)",
                self.name,
                if max == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        if let Some((key, _)) = self.kwargs.first() {
            return Err(SandboxError::type_error(format!(
                "'{key}' is an invalid keyword argument for {}()",
                self.name
            )));
        }
        Ok(())
    }
}

fn expect_str(value: &Value, what: &str) -> SandboxResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(SandboxError::type_error(format!(
            "{what} must be str, not {}",
            other.type_name()
        ))),
    }
}

fn expect_int(value: &Value, what: &str) -> SandboxResult<i64> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(value.as_int().unwrap_or_default()),
        other => Err(SandboxError::type_error(format!(
            "'{}' object cannot be interpreted as an integer ({what})",
            other.type_name()
        ))),
    }
}

fn expect_real(value: &Value) -> SandboxResult<f64> {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => Ok(value.as_float().unwrap_or_default()),
        other => Err(SandboxError::type_error(format!(
            "must be real number, not {}",
            other.type_name()
        ))),
    }
}

fn charge_result(budget: &mut Budget, value: &Value) -> SandboxResult<()> {
    match value {
        Value::Str(s) => budget.charge(s.len()),
        Value::List(items) => budget.charge(items.borrow().len() * VALUE_SIZE),
        Value::Tuple(items) => budget.charge(items.len() * VALUE_SIZE),
        Value::Dict(d) => budget.charge(d.borrow().len() * 2 * VALUE_SIZE),
        _ => Ok(()),
    }
}

/// Items in first-seen order with duplicates removed, as `set()` yields.
pub(crate) fn dedup(items: Vec<Value>) -> SandboxResult<Vec<Value>> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        item.check_hashable()?;
        if !out.iter().any(|seen| py_eq(seen, &item)) {
            out.push(item);
        }
    }
    Ok(out)
}

pub(crate) fn call_builtin(
    interp: &mut Interpreter,
    name: &str,
    positional: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> SandboxResult<Value> {
    let mut args = Args::new(name, positional, kwargs);
    let result = match name {
        "len" => {
            args.check(1)?;
            let v = args.required(0, "obj")?;
            let n = match &v {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(d) => d.borrow().len(),
                other => {
                    return Err(SandboxError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Value::Int(n as i64)
        }
        "str" => {
            args.check(1)?;
            Value::str(&args.arg(0, "object").map(|v| py_str(&v)).unwrap_or_default())
        }
        "int" => {
            let v = args.arg(0, "x");
            let base = args.arg(1, "base");
            args.check(2)?;
            to_int(v, base)?
        }
        "float" => {
            args.check(1)?;
            to_float(args.arg(0, "x"))?
        }
        "bool" => {
            args.check(1)?;
            Value::Bool(args.arg(0, "x").is_some_and(|v| v.truthy()))
        }
        "list" => {
            args.check(1)?;
            match args.arg(0, "iterable") {
                Some(v) => Value::list(ops::iterate(&v)?),
                None => Value::list(Vec::new()),
            }
        }
        "set" => {
            args.check(1)?;
            match args.arg(0, "iterable") {
                Some(v) => Value::list(dedup(ops::iterate(&v)?)?),
                None => Value::list(Vec::new()),
            }
        }
        "dict" => {
            let mut dict = Dict::new();
            if let Some(source) = args.positional.first().cloned() {
                update_dict(&mut dict, &source)?;
            }
            for (k, v) in std::mem::take(&mut args.kwargs) {
                dict.insert(Value::str(&k), v);
            }
            args.check(1)?;
            Value::dict(dict)
        }
        "min" => extremum(interp, args, Ordering::Less)?,
        "max" => extremum(interp, args, Ordering::Greater)?,
        "sum" => {
            let iterable = args.required(0, "iterable")?;
            let start = args.arg(1, "start").unwrap_or(Value::Int(0));
            args.check(2)?;
            if matches!(start, Value::Str(_)) {
                return Err(SandboxError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let mut total = start;
            for item in ops::iterate(&iterable)? {
                interp.budget.tick()?;
                total = ops::binop(&mut interp.budget, crate::ast::BinOp::Add, &total, &item)?;
            }
            total
        }
        "asyncio.sleep" => {
            args.arg(0, "delay");
            args.check(2)?;
            Value::None
        }
        n if n.starts_with("re.") => regex_call(interp, &n[3..], args)?,
        n if n.starts_with("math.") => math_call(&n[5..], args)?,
        other => {
            return Err(SandboxError::raised(
                "NameError",
                format!("name '{other}' is not defined"),
            ));
        }
    };
    charge_result(&mut interp.budget, &result)?;
    Ok(result)
}

fn to_int(value: Option<Value>, base: Option<Value>) -> SandboxResult<Value> {
    let Some(value) = value else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = base {
        let base = expect_int(&base, "base")?;
        let Value::Str(s) = &value else {
            return Err(SandboxError::type_error(
                "int() can't convert non-string with explicit base",
            ));
        };
        return parse_int(s, base as u32);
    }
    match &value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or_default())),
        Value::Float(f) => {
            if f.is_nan() {
                Err(SandboxError::value_error("cannot convert float NaN to integer"))
            } else if f.is_infinite() {
                Err(SandboxError::raised(
                    "OverflowError",
                    "cannot convert float infinity to integer",
                ))
            } else if f.abs() >= 9.2e18 {
                Err(SandboxError::raised("OverflowError", "int too large"))
            } else {
                Ok(Value::Int(f.trunc() as i64))
            }
        }
        Value::Str(s) => parse_int(s, 10),
        other => Err(SandboxError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_int(text: &str, base: u32) -> SandboxResult<Value> {
    let invalid = || {
        SandboxError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            py_repr(&Value::str(text))
        ))
    };
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = match (base, lower.get(..2)) {
        (16 | 0, Some("0x")) => (16, &body[2..]),
        (8 | 0, Some("0o")) => (8, &body[2..]),
        (2 | 0, Some("0b")) => (2, &body[2..]),
        (0, _) => (10, body),
        (b, _) if (2..=36).contains(&b) => (b, body),
        _ => return Err(SandboxError::value_error("int() base must be >= 2 and <= 36, or 0")),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned = digits.replace('_', "");
    let signed = if negative { format!("-{cleaned}") } else { cleaned };
    match i64::from_str_radix(&signed, radix) {
        Ok(i) => Ok(Value::Int(i)),
        Err(e) if matches!(
            e.kind(),
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow
        ) => Err(SandboxError::raised("OverflowError", "int too large")),
        Err(_) => Err(invalid()),
    }
}

fn to_float(value: Option<Value>) -> SandboxResult<Value> {
    match value {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => s
            .trim()
            .replace('_', "")
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| {
                SandboxError::value_error(format!(
                    "could not convert string to float: {}",
                    py_repr(&Value::Str(s.clone()))
                ))
            }),
        Some(v) => match v.as_float() {
            Some(f) => Ok(Value::Float(f)),
            None => Err(SandboxError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))),
        },
    }
}

fn update_dict(dict: &mut Dict, source: &Value) -> SandboxResult<()> {
    if let Value::Dict(other) = source {
        for (k, v) in other.borrow().entries() {
            dict.insert(k.clone(), v.clone());
        }
        return Ok(());
    }
    for (i, pair) in ops::iterate(source)?.into_iter().enumerate() {
        let items = ops::iterate(&pair).map_err(|_| {
            SandboxError::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [key, value] = <[Value; 2]>::try_from(items).map_err(|items| {
            SandboxError::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        key.check_hashable()?;
        dict.insert(key, value);
    }
    Ok(())
}

fn extremum(interp: &mut Interpreter, mut args: Args, want: Ordering) -> SandboxResult<Value> {
    let key = args.kwarg("key").filter(|k| !matches!(k, Value::None));
    let default = args.kwarg("default");
    args.check(usize::MAX)?;
    let items = match args.positional.len() {
        0 => {
            return Err(SandboxError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                args.name
            )));
        }
        1 => ops::iterate(&args.positional[0])?,
        _ => std::mem::take(&mut args.positional),
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            Some((_, best_key)) => py_cmp(&k, best_key)? == want,
            None => true,
        };
        if replace {
            best = Some((item, k));
        }
    }
    match (best, default) {
        (Some((item, _)), _) => Ok(item),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(SandboxError::value_error(format!(
            "{}() arg is an empty sequence",
            args.name
        ))),
    }
}

fn math_call(function: &str, mut args: Args) -> SandboxResult<Value> {
    let domain = || SandboxError::value_error("math domain error");
    let x = expect_real(&args.required(0, "x")?)?;
    let result = match function {
        "sqrt" => {
            if x < 0.0 {
                return Err(domain());
            }
            x.sqrt()
        }
        "floor" | "ceil" | "trunc" => {
            if x.is_nan() {
                return Err(SandboxError::value_error("cannot convert float NaN to integer"));
            }
            if x.is_infinite() || x.abs() >= 9.2e18 {
                return Err(SandboxError::raised(
                    "OverflowError",
                    "cannot convert float infinity to integer",
                ));
            }
            args.check(1)?;
            let r = match function {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            };
            return Ok(Value::Int(r as i64));
        }
        "fabs" => x.abs(),
        "pow" => {
            let y = expect_real(&args.required(1, "y")?)?;
            if x == 0.0 && y < 0.0 {
                return Err(domain());
            }
            x.powf(y)
        }
        "log" => {
            if x <= 0.0 {
                return Err(domain());
            }
            match args.arg(1, "base") {
                Some(base) => {
                    let base = expect_real(&base)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain());
                    }
                    x.ln() / base.ln()
                }
                None => x.ln(),
            }
        }
        "log10" | "log2" => {
            if x <= 0.0 {
                return Err(domain());
            }
            if function == "log10" { x.log10() } else { x.log2() }
        }
        "exp" => {
            let r = x.exp();
            if r.is_infinite() && x.is_finite() {
                return Err(SandboxError::raised("OverflowError", "math range error"));
            }
            r
        }
        "sin" | "cos" | "tan" => {
            if x.is_infinite() {
                return Err(domain());
            }
            match function {
                "sin" => x.sin(),
                "cos" => x.cos(),
                _ => x.tan(),
            }
        }
        "isnan" => return Ok(Value::Bool(x.is_nan())),
        "isinf" => return Ok(Value::Bool(x.is_infinite())),
        "isfinite" => return Ok(Value::Bool(x.is_finite())),
        other => {
            return Err(SandboxError::raised(
                "AttributeError",
                format!("module 'math' has no attribute '{other}'"),
            ));
        }
    };
    args.check(2)?;
    Ok(Value::Float(result))
}

enum Anchor {
    Search,
    Start,
    Full,
}

/// Rewrite Python-only escapes the regex crate spells differently.
fn translate_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Z') => out.push_str("\\z"),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn compile_regex(
    interp: &mut Interpreter,
    pattern: &str,
    flags: i64,
    anchor: Anchor,
) -> SandboxResult<Rc<Regex>> {
    let body = translate_pattern(pattern);
    let source = match anchor {
        Anchor::Search => body,
        Anchor::Start => format!("\\A(?:{body})"),
        Anchor::Full => format!("\\A(?:{body})\\z"),
    };
    let key = (source, flags);
    if let Some(re) = interp.regexes.get(&key) {
        return Ok(re.clone());
    }
    let compiled = RegexBuilder::new(&key.0)
        .case_insensitive(flags & RE_IGNORECASE != 0)
        .multi_line(flags & RE_MULTILINE != 0)
        .dot_matches_new_line(flags & RE_DOTALL != 0)
        .ignore_whitespace(flags & RE_VERBOSE != 0)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| {
            let message = e.to_string();
            if message.contains("not supported") {
                SandboxError::Unsupported(format!("regular expression {}", py_repr(&Value::str(pattern))))
            } else {
                SandboxError::raised("re.error", message)
            }
        })?;
    let compiled = Rc::new(compiled);
    interp.regexes.insert(key, compiled.clone());
    Ok(compiled)
}

fn match_value(re: &Regex, text: &Rc<str>, captures: &regex::Captures<'_>) -> Value {
    Value::Match(Rc::new(MatchData {
        text: text.clone(),
        spans: (0..captures.len())
            .map(|i| captures.get(i).map(|m| (m.start(), m.end())))
            .collect(),
        names: re.capture_names().map(|n| n.map(str::to_string)).collect(),
    }))
}

fn regex_flags(args: &mut Args, position: usize) -> SandboxResult<i64> {
    match args.arg(position, "flags") {
        Some(v) => expect_int(&v, "flags"),
        None => Ok(0),
    }
}

fn regex_call(interp: &mut Interpreter, function: &str, mut args: Args) -> SandboxResult<Value> {
    let pattern = expect_str(&args.required(0, "pattern")?, "pattern")?;
    match function {
        "match" | "search" | "fullmatch" => {
            let text = expect_str(&args.required(1, "string")?, "string")?;
            let flags = regex_flags(&mut args, 2)?;
            args.check(3)?;
            let anchor = match function {
                "match" => Anchor::Start,
                "fullmatch" => Anchor::Full,
                _ => Anchor::Search,
            };
            let re = compile_regex(interp, &pattern, flags, anchor)?;
            Ok(match re.captures(&text) {
                Some(caps) => match_value(&re, &text, &caps),
                None => Value::None,
            })
        }
        "findall" => {
            let text = expect_str(&args.required(1, "string")?, "string")?;
            let flags = regex_flags(&mut args, 2)?;
            args.check(3)?;
            let re = compile_regex(interp, &pattern, flags, Anchor::Search)?;
            let groups = re.captures_len() - 1;
            let group_text = |caps: &regex::Captures<'_>, i: usize| {
                Value::str(caps.get(i).map(|m| m.as_str()).unwrap_or(""))
            };
            let mut out = Vec::new();
            for caps in re.captures_iter(&text) {
                interp.budget.tick()?;
                out.push(match groups {
                    0 => group_text(&caps, 0),
                    1 => group_text(&caps, 1),
                    n => Value::tuple((1..=n).map(|i| group_text(&caps, i)).collect()),
                });
            }
            Ok(Value::list(out))
        }
        "sub" => {
            let repl = args.required(1, "repl")?;
            let text = expect_str(&args.required(2, "string")?, "string")?;
            let count = match args.arg(3, "count") {
                Some(v) => expect_int(&v, "count")?,
                None => 0,
            };
            let flags = regex_flags(&mut args, 4)?;
            args.check(5)?;
            let re = compile_regex(interp, &pattern, flags, Anchor::Search)?;
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for (n, caps) in re.captures_iter(&text).enumerate() {
                if count > 0 && n as i64 >= count {
                    break;
                }
                interp.budget.tick()?;
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                out.push_str(&text[last..whole.start()]);
                let before = out.len();
                match &repl {
                    Value::Str(template) => expand_template(template, &re, &caps, &mut out)?,
                    callable if callable.is_callable() => {
                        let m = match_value(&re, &text, &caps);
                        let replacement = interp.call(callable, vec![m], Vec::new())?;
                        out.push_str(&expect_str(&replacement, "replacement")?);
                    }
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "expected str or callable repl, not {}",
                            other.type_name()
                        )));
                    }
                }
                interp.budget.charge(out.len() - before)?;
                last = whole.end();
            }
            out.push_str(&text[last..]);
            Ok(Value::str(&out))
        }
        "split" => {
            let text = expect_str(&args.required(1, "string")?, "string")?;
            let maxsplit = match args.arg(2, "maxsplit") {
                Some(v) => expect_int(&v, "maxsplit")?,
                None => 0,
            };
            let flags = regex_flags(&mut args, 3)?;
            args.check(4)?;
            let re = compile_regex(interp, &pattern, flags, Anchor::Search)?;
            let mut out = Vec::new();
            let mut last = 0;
            for (n, caps) in re.captures_iter(&text).enumerate() {
                if maxsplit > 0 && n as i64 >= maxsplit {
                    break;
                }
                interp.budget.tick()?;
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                out.push(Value::str(&text[last..whole.start()]));
                for i in 1..caps.len() {
                    out.push(caps.get(i).map_or(Value::None, |m| Value::str(m.as_str())));
                }
                last = whole.end();
            }
            out.push(Value::str(&text[last..]));
            Ok(Value::list(out))
        }
        other => Err(SandboxError::raised(
            "AttributeError",
            format!("module 're' has no attribute '{other}'"),
        )),
    }
}

/// Expand a `re.sub` replacement template (`\1`, `\g<name>`, `\n`).
fn expand_template(
    template: &str,
    re: &Regex,
    caps: &regex::Captures<'_>,
    out: &mut String,
) -> SandboxResult<()> {
    let group = |index: usize, out: &mut String| -> SandboxResult<()> {
        if index >= caps.len() {
            return Err(SandboxError::raised("re.error", format!("invalid group reference {index}")));
        }
        if let Some(m) = caps.get(index) {
            out.push_str(m.as_str());
        }
        Ok(())
    };
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let Some(&next) = chars.get(i + 1) else {
            return Err(SandboxError::raised("re.error", "bad escape (end of pattern)"));
        };
        i += 2;
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            'g' => {
                if chars.get(i) != Some(&'<') {
                    return Err(SandboxError::raised("re.error", "missing <"));
                }
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == '>')
                    .ok_or_else(|| SandboxError::raised("re.error", "missing >, unterminated name"))?;
                let name: String = chars[i + 1..i + close].iter().collect();
                i += close + 1;
                match name.parse::<usize>() {
                    Ok(index) => group(index, out)?,
                    Err(_) => {
                        let index = re
                            .capture_names()
                            .position(|n| n == Some(name.as_str()))
                            .ok_or_else(|| {
                                SandboxError::raised("IndexError", format!("unknown group name '{name}'"))
                            })?;
                        group(index, out)?;
                    }
                }
            }
            d if d.is_ascii_digit() => {
                let mut digits = String::from(d);
                if let Some(&second) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                    digits.push(second);
                    i += 1;
                }
                group(digits.parse().unwrap_or(0), out)?;
            }
            c if c.is_ascii_alphabetic() => {
                return Err(SandboxError::raised("re.error", format!("bad escape \\{c}")));
            }
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    Ok(())
}

pub(crate) fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    positional: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> SandboxResult<Value> {
    let args = Args::new(
        &format!("{}.{name}", receiver.type_name()),
        positional,
        kwargs,
    );
    let result = match receiver {
        Value::Str(s) => return str_method(&mut interp.budget, s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args)?,
        Value::Tuple(items) => sequence_method(items, name, args, "tuple")?,
        Value::Dict(d) => dict_method(d, name, args)?,
        Value::Match(m) => match_method(m, name, args)?,
        other => {
            return Err(SandboxError::raised(
                "AttributeError",
                format!("'{}' object has no attribute '{name}'", other.type_name()),
            ));
        }
    };
    charge_result(&mut interp.budget, &result)?;
    Ok(result)
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && out.len() as i64 == maxsplit {
            out.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                out.push(Value::str(&rest[..i]));
                rest = rest[i..].trim_start();
            }
            None => {
                out.push(Value::str(rest));
                break;
            }
        }
    }
    out
}

fn rsplit_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit >= 0 && out.len() as i64 == maxsplit {
            out.push(Value::str(rest));
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(i) => {
                let width = rest[i..].chars().next().map_or(1, char::len_utf8);
                out.push(Value::str(&rest[i + width..]));
                rest = rest[..i].trim_end();
            }
            None => {
                out.push(Value::str(rest));
                break;
            }
        }
    }
    out.reverse();
    out
}

fn splitlines(s: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => out.push(Value::str(&std::mem::take(&mut current))),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push(Value::str(&std::mem::take(&mut current)));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(Value::str(&current));
    }
    out
}

fn char_offset(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

/// Byte offset of the `chars`-th character, clamped to the string end.
fn byte_offset(s: &str, chars: i64) -> usize {
    let len = s.chars().count() as i64;
    let index = if chars < 0 { (chars + len).max(0) } else { chars.min(len) };
    s.char_indices().nth(index as usize).map_or(s.len(), |(b, _)| b)
}

fn strip_set(chars: Option<Value>) -> SandboxResult<Option<Vec<char>>> {
    match chars {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(expect_str(&v, "strip arg")?.chars().collect())),
    }
}

fn affix_matches(
    s: &str,
    affix: &Value,
    test: fn(&str, &str) -> bool,
    method: &str,
) -> SandboxResult<bool> {
    match affix {
        Value::Str(a) => Ok(test(s, a)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if test(s, &expect_str(option, method)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(SandboxError::type_error(format!(
            "{method} first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn justify(budget: &mut Budget, s: &str, args: &mut Args, align: char) -> SandboxResult<String> {
    let width = expect_int(&args.required(0, "width")?, "width")?.max(0) as usize;
    let fill = match args.arg(1, "fillchar") {
        Some(v) => {
            let f = expect_str(&v, "fillchar")?;
            let mut chars = f.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(SandboxError::type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
        None => ' ',
    };
    args.check(2)?;
    let len = s.chars().count();
    if len >= width {
        budget.charge(s.len())?;
        return Ok(s.to_string());
    }
    let gap = width - len;
    budget.charge(s.len().saturating_add(gap.saturating_mul(fill.len_utf8())))?;
    let (left, right) = match align {
        '<' => (0, gap),
        '>' => (gap, 0),
        _ => {
            let left = gap / 2 + (gap & width & 1);
            (left, gap - left)
        }
    };
    let pad = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    Ok(format!("{}{s}{}", pad(left), pad(right)))
}

fn cased_check(s: &str, upper: bool) -> bool {
    let mut any = false;
    for c in s.chars() {
        if c.is_lowercase() {
            if upper {
                return false;
            }
            any = true;
        } else if c.is_uppercase() {
            if !upper {
                return false;
            }
            any = true;
        }
    }
    any
}

/// String methods charge their own results. Methods whose output can grow
/// past their inputs charge before allocating.
fn str_method(
    budget: &mut Budget,
    s: &Rc<str>,
    name: &str,
    mut args: Args,
) -> SandboxResult<Value> {
    let s: &str = s;
    let all = |pred: fn(char) -> bool| Value::Bool(!s.is_empty() && s.chars().all(pred));
    let result = match name {
        "upper" => Value::str(&s.to_uppercase()),
        "lower" | "casefold" => Value::str(&s.to_lowercase()),
        "swapcase" => Value::str(
            &s.chars()
                .flat_map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().collect::<Vec<_>>()
                    } else {
                        c.to_uppercase().collect::<Vec<_>>()
                    }
                })
                .collect::<String>(),
        ),
        "strip" | "lstrip" | "rstrip" => {
            let set = strip_set(args.arg(0, "chars"))?;
            args.check(1)?;
            let matches = |c: char| match &set {
                Some(chars) => chars.contains(&c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            })
        }
        "split" | "rsplit" => {
            let sep = args.arg(0, "sep").filter(|v| !matches!(v, Value::None));
            let maxsplit = match args.arg(1, "maxsplit") {
                Some(v) => expect_int(&v, "maxsplit")?,
                None => -1,
            };
            args.check(2)?;
            let parts = match sep {
                None if name == "split" => split_whitespace(s, maxsplit),
                None => rsplit_whitespace(s, maxsplit),
                Some(sep) => {
                    let sep = expect_str(&sep, "sep")?;
                    if sep.is_empty() {
                        return Err(SandboxError::value_error("empty separator"));
                    }
                    let mut parts: Vec<Value> = match (name, maxsplit) {
                        (_, m) if m < 0 => s.split(sep.as_ref()).map(Value::str).collect(),
                        ("split", m) => s.splitn(m as usize + 1, sep.as_ref()).map(Value::str).collect(),
                        (_, m) => s.rsplitn(m as usize + 1, sep.as_ref()).map(Value::str).collect(),
                    };
                    if name == "rsplit" && maxsplit >= 0 {
                        parts.reverse();
                    }
                    parts
                }
            };
            Value::list(parts)
        }
        "splitlines" => {
            args.check(0)?;
            Value::list(splitlines(s))
        }
        "join" => {
            let iterable = args.required(0, "iterable")?;
            args.check(1)?;
            let mut parts = Vec::new();
            for (i, item) in ops::iterate(&iterable)?.into_iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p),
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            let total = parts
                .iter()
                .fold(s.len().saturating_mul(parts.len()), |acc, p| {
                    acc.saturating_add(p.len())
                });
            budget.charge(total)?;
            return Ok(Value::str(
                &parts.iter().map(|p| &**p).collect::<Vec<&str>>().join(s),
            ));
        }
        "replace" => {
            let old = expect_str(&args.required(0, "old")?, "replace() argument 1")?;
            let new = expect_str(&args.required(1, "new")?, "replace() argument 2")?;
            let count = match args.arg(2, "count") {
                Some(v) => expect_int(&v, "count")?,
                None => -1,
            };
            args.check(3)?;
            let found = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old.as_ref()).count()
            };
            let replaced = if count < 0 { found } else { found.min(count as usize) };
            budget.charge(s.len().saturating_add(replaced.saturating_mul(new.len())))?;
            return Ok(if count < 0 {
                Value::str(&s.replace(old.as_ref(), &new))
            } else {
                Value::str(&s.replacen(old.as_ref(), &new, count as usize))
            });
        }
        "startswith" | "endswith" => {
            let affix = args.required(0, "prefix")?;
            let start = args.arg(1, "start").map(|v| expect_int(&v, "start")).transpose()?;
            args.check(2)?;
            let haystack = &s[byte_offset(s, start.unwrap_or(0))..];
            let test: fn(&str, &str) -> bool = if name == "startswith" {
                |h, a| h.starts_with(a)
            } else {
                |h, a| h.ends_with(a)
            };
            Value::Bool(affix_matches(haystack, &affix, test, name)?)
        }
        "find" | "rfind" | "index" | "rindex" => {
            let sub = expect_str(&args.required(0, "sub")?, "must be str")?;
            let start = args.arg(1, "start").map(|v| expect_int(&v, "start")).transpose()?;
            let end = args.arg(2, "end").map(|v| expect_int(&v, "end")).transpose()?;
            args.check(3)?;
            let lo = byte_offset(s, start.unwrap_or(0));
            let hi = end.map_or(s.len(), |e| byte_offset(s, e)).max(lo);
            let window = &s[lo..hi];
            let found = if name.starts_with('r') {
                window.rfind(sub.as_ref())
            } else {
                window.find(sub.as_ref())
            };
            match found {
                Some(b) => Value::Int(char_offset(s, lo + b)),
                None if name.ends_with("index") => {
                    return Err(SandboxError::value_error("substring not found"));
                }
                None => Value::Int(-1),
            }
        }
        "count" => {
            let sub = expect_str(&args.required(0, "sub")?, "must be str")?;
            args.check(1)?;
            if sub.is_empty() {
                Value::Int(s.chars().count() as i64 + 1)
            } else {
                Value::Int(s.matches(sub.as_ref()).count() as i64)
            }
        }
        "isdigit" | "isdecimal" => all(|c| c.is_ascii_digit()),
        "isnumeric" => all(char::is_numeric),
        "isalpha" => all(char::is_alphabetic),
        "isalnum" => all(char::is_alphanumeric),
        "isspace" => all(char::is_whitespace),
        "isupper" => Value::Bool(cased_check(s, true)),
        "islower" => Value::Bool(cased_check(s, false)),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Value::str(&out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            let out: String = match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            };
            Value::str(&out)
        }
        "center" => return Ok(Value::str(&justify(budget, s, &mut args, '^')?)),
        "ljust" => return Ok(Value::str(&justify(budget, s, &mut args, '<')?)),
        "rjust" => return Ok(Value::str(&justify(budget, s, &mut args, '>')?)),
        "zfill" => {
            let width = expect_int(&args.required(0, "width")?, "width")?.max(0) as usize;
            args.check(1)?;
            let len = s.chars().count();
            if len >= width {
                Value::str(s)
            } else {
                budget.charge(s.len().saturating_add(width - len))?;
                let zeros = "0".repeat(width - len);
                let out = match s.chars().next() {
                    Some(sign @ ('+' | '-')) => format!("{sign}{zeros}{}", &s[1..]),
                    _ => format!("{zeros}{s}"),
                };
                return Ok(Value::str(&out));
            }
        }
        "format" => {
            let kwargs = std::mem::take(&mut args.kwargs);
            Value::str(&format_template(budget, s, &args.positional, &kwargs)?)
        }
        "partition" | "rpartition" => {
            let sep = expect_str(&args.required(0, "sep")?, "must be str")?;
            args.check(1)?;
            if sep.is_empty() {
                return Err(SandboxError::value_error("empty separator"));
            }
            let found = if name == "partition" {
                s.find(sep.as_ref())
            } else {
                s.rfind(sep.as_ref())
            };
            let parts = match found {
                Some(i) => [&s[..i], sep.as_ref(), &s[i + sep.len()..]],
                None if name == "partition" => [s, "", ""],
                None => ["", "", s],
            };
            Value::tuple(parts.iter().map(|p| Value::str(p)).collect())
        }
        "removeprefix" => {
            let prefix = expect_str(&args.required(0, "prefix")?, "must be str")?;
            Value::str(s.strip_prefix(prefix.as_ref()).unwrap_or(s))
        }
        "removesuffix" => {
            let suffix = expect_str(&args.required(0, "suffix")?, "must be str")?;
            Value::str(s.strip_suffix(suffix.as_ref()).unwrap_or(s))
        }
        other => {
            return Err(SandboxError::raised(
                "AttributeError",
                format!("'str' object has no attribute '{other}'"),
            ));
        }
    };
    charge_result(budget, &result)?;
    Ok(result)
}

/// `str.format` replacement fields: `{}`, `{0}`, `{name}`, `{name[key]}`,
/// `{0.attr}`, with `!r`/`!s` conversions and a format spec.
fn format_template(
    budget: &mut Budget,
    template: &str,
    positional: &[Value],
    kwargs: &[(String, Value)],
) -> SandboxResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut auto_index = 0usize;
    let mut numbering: Option<bool> = None;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => {
                return Err(SandboxError::value_error(
                    "Single '}' encountered in format string",
                ));
            }
            '{' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == '}')
                    .ok_or_else(|| {
                        SandboxError::value_error("Single '{' encountered in format string")
                    })?;
                let field: String = chars[i + 1..i + close].iter().collect();
                i += close + 1;

                let (field, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (field, conversion) = match field.split_once('!') {
                    Some((f, c)) => (f, c.chars().next()),
                    None => (field, None),
                };
                let head_end = field.find(['.', '[']).unwrap_or(field.len());
                let (head, mut accessors) = field.split_at(head_end);

                let mut value = if head.is_empty() {
                    if numbering == Some(true) {
                        return Err(SandboxError::value_error(
                            "cannot switch from manual field specification to automatic field numbering",
                        ));
                    }
                    numbering = Some(false);
                    let index = auto_index;
                    auto_index += 1;
                    positional_field(positional, index)?
                } else if let Ok(index) = head.parse::<usize>() {
                    if numbering == Some(false) {
                        return Err(SandboxError::value_error(
                            "cannot switch from automatic field numbering to manual field specification",
                        ));
                    }
                    numbering = Some(true);
                    positional_field(positional, index)?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| k == head)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| SandboxError::raised("KeyError", py_repr(&Value::str(head))))?
                };

                while !accessors.is_empty() {
                    if let Some(rest) = accessors.strip_prefix('.') {
                        let end = rest.find(['.', '[']).unwrap_or(rest.len());
                        value = get_attribute(&value, &rest[..end])?;
                        accessors = &rest[end..];
                    } else if let Some(rest) = accessors.strip_prefix('[') {
                        let end = rest
                            .find(']')
                            .ok_or_else(|| SandboxError::value_error("Missing ']' in format string"))?;
                        let key = &rest[..end];
                        let key = match key.parse::<i64>() {
                            Ok(n) => Value::Int(n),
                            Err(_) => Value::str(key),
                        };
                        value = ops::get_item(&value, &key)?;
                        accessors = &rest[end + 1..];
                    } else {
                        return Err(SandboxError::value_error(
                            "Only '.' or '[' may follow ']' in format field specifier",
                        ));
                    }
                }

                let value = match conversion {
                    Some('r') | Some('a') => Value::str(&py_repr(&value)),
                    Some('s') => Value::str(&py_str(&value)),
                    Some(c) => {
                        return Err(SandboxError::value_error(format!(
                            "Unknown conversion specifier {c}"
                        )));
                    }
                    None => value,
                };
                out.push_str(&format_value(budget, &value, spec)?);
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn positional_field(positional: &[Value], index: usize) -> SandboxResult<Value> {
    positional.get(index).cloned().ok_or_else(|| {
        SandboxError::raised(
            "IndexError",
            format!("Replacement index {index} out of range for positional args tuple"),
        )
    })
}

fn sequence_method(items: &[Value], name: &str, mut args: Args, kind: &str) -> SandboxResult<Value> {
    let needle = args.required(0, "value")?;
    args.check(1)?;
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| py_eq(v, &needle)).count() as i64)),
        "index" => items
            .iter()
            .position(|v| py_eq(v, &needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| {
                SandboxError::value_error(format!("{} is not in {kind}", py_repr(&needle)))
            }),
        other => Err(SandboxError::raised(
            "AttributeError",
            format!("'{kind}' object has no attribute '{other}'"),
        )),
    }
}

fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> SandboxResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        keyed.push((k, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = if reverse { py_cmp(b, a) } else { py_cmp(a, b) };
        ordering.unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    mut args: Args,
) -> SandboxResult<Value> {
    let Value::List(list) = receiver else {
        return Err(SandboxError::type_error("expected list"));
    };
    match name {
        "append" => {
            let item = args.required(0, "object")?;
            args.check(1)?;
            interp.budget.charge(VALUE_SIZE)?;
            list.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            let iterable = args.required(0, "iterable")?;
            args.check(1)?;
            let extra = ops::iterate(&iterable)?;
            interp.budget.charge(extra.len() * VALUE_SIZE)?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let index = expect_int(&args.required(0, "index")?, "index")?;
            let item = args.required(1, "object")?;
            args.check(2)?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, item);
            Ok(Value::None)
        }
        "pop" => {
            let index = args.arg(0, "index").map(|v| expect_int(&v, "index")).transpose()?;
            args.check(1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(SandboxError::raised("IndexError", "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = index.unwrap_or(-1);
            let at = if index < 0 { index + len } else { index };
            if at < 0 || at >= len {
                return Err(SandboxError::raised("IndexError", "pop index out of range"));
            }
            Ok(items.remove(at as usize))
        }
        "remove" => {
            let needle = args.required(0, "value")?;
            args.check(1)?;
            let mut items = list.borrow_mut();
            let at = items
                .iter()
                .position(|v| py_eq(v, &needle))
                .ok_or_else(|| SandboxError::value_error("list.remove(x): x not in list"))?;
            items.remove(at);
            Ok(Value::None)
        }
        "index" | "count" => {
            let items = list.borrow().clone();
            sequence_method(&items, name, args, "list")
        }
        "sort" => {
            let key = args.kwarg("key").filter(|k| !matches!(k, Value::None));
            let reverse = args.kwarg("reverse").is_some_and(|v| v.truthy());
            args.check(0)?;
            let items = list.borrow().clone();
            let sorted = sort_values(interp, items, key, reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            args.check(0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            args.check(0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            args.check(0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(SandboxError::raised(
            "AttributeError",
            format!("'list' object has no attribute '{other}'"),
        )),
    }
}

fn dict_method(
    dict: &Rc<std::cell::RefCell<Dict>>,
    name: &str,
    mut args: Args,
) -> SandboxResult<Value> {
    match name {
        "get" => {
            let key = args.required(0, "key")?;
            let default = args.arg(1, "default").unwrap_or(Value::None);
            args.check(2)?;
            key.check_hashable()?;
            Ok(dict.borrow().get(&key).unwrap_or(default))
        }
        "keys" => {
            args.check(0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            args.check(0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            args.check(0)?;
            Ok(Value::list(
                dict.borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            let key = args.required(0, "key")?;
            let default = args.arg(1, "default");
            args.check(2)?;
            key.check_hashable()?;
            let removed = dict.borrow_mut().remove(&key);
            removed
                .or(default)
                .ok_or_else(|| SandboxError::raised("KeyError", py_repr(&key)))
        }
        "popitem" => {
            args.check(0)?;
            let mut d = dict.borrow_mut();
            let last = d
                .keys()
                .pop()
                .ok_or_else(|| SandboxError::raised("KeyError", "'popitem(): dictionary is empty'"))?;
            let value = d.remove(&last).unwrap_or(Value::None);
            Ok(Value::tuple(vec![last, value]))
        }
        "setdefault" => {
            let key = args.required(0, "key")?;
            let default = args.arg(1, "default").unwrap_or(Value::None);
            args.check(2)?;
            key.check_hashable()?;
            let mut d = dict.borrow_mut();
            match d.get(&key) {
                Some(existing) => Ok(existing),
                None => {
                    d.insert(key, default.clone());
                    Ok(default)
                }
            }
        }
        "update" => {
            let source = args.positional.first().cloned();
            let extra = std::mem::take(&mut args.kwargs);
            args.check(1)?;
            let mut merged = dict.borrow().clone();
            if let Some(source) = source {
                update_dict(&mut merged, &source)?;
            }
            for (k, v) in extra {
                merged.insert(Value::str(&k), v);
            }
            *dict.borrow_mut() = merged;
            Ok(Value::None)
        }
        "copy" => {
            args.check(0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            args.check(0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(SandboxError::raised(
            "AttributeError",
            format!("'dict' object has no attribute '{other}'"),
        )),
    }
}

fn match_method(m: &MatchData, name: &str, mut args: Args) -> SandboxResult<Value> {
    let group_arg = |args: &mut Args| -> SandboxResult<usize> {
        match args.arg(0, "group") {
            Some(g) => m.group_index(&g),
            None => Ok(0),
        }
    };
    match name {
        "group" => {
            let selected = std::mem::take(&mut args.positional);
            args.check(0)?;
            match selected.as_slice() {
                [] => Ok(m.group(0)),
                [one] => Ok(m.group(m.group_index(one)?)),
                many => {
                    let groups = many
                        .iter()
                        .map(|g| m.group_index(g).map(|i| m.group(i)))
                        .collect::<SandboxResult<Vec<_>>>()?;
                    Ok(Value::tuple(groups))
                }
            }
        }
        "groups" => {
            let default = args.arg(0, "default").unwrap_or(Value::None);
            args.check(1)?;
            Ok(Value::tuple(
                (1..m.spans.len())
                    .map(|i| match m.group(i) {
                        Value::None => default.clone(),
                        v => v,
                    })
                    .collect(),
            ))
        }
        "groupdict" => {
            let default = args.arg(0, "default").unwrap_or(Value::None);
            args.check(1)?;
            let mut d = Dict::new();
            for (i, n) in m.names.iter().enumerate() {
                if let Some(n) = n {
                    let v = match m.group(i) {
                        Value::None => default.clone(),
                        v => v,
                    };
                    d.insert(Value::str(n), v);
                }
            }
            Ok(Value::dict(d))
        }
        "start" | "end" | "span" => {
            let index = group_arg(&mut args)?;
            args.check(1)?;
            let (start, end) = m.char_span(index);
            Ok(match name {
                "start" => Value::Int(start),
                "end" => Value::Int(end),
                _ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
            })
        }
        other => Err(SandboxError::raised(
            "AttributeError",
            format!("'re.Match' object has no attribute '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ResourceLimits;
    use crate::parser::parse;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn eval(source: &str) -> SandboxResult<Value> {
        let module = parse(&format!("result = {source}\n"))?;
        let mut interp = Interpreter::new(ResourceLimits::default(), Arc::new(AtomicBool::new(false)));
        interp.exec_module(&module)?;
        Ok(interp.global("result").unwrap_or(Value::None))
    }

    fn repr(source: &str) -> String {
        py_repr(&eval(source).unwrap())
    }

    fn eval_within(source: &str, max_memory_bytes: u64) -> SandboxResult<Value> {
        let module = parse(&format!("result = {source}\n"))?;
        let limits = ResourceLimits {
            max_memory_bytes,
            ..ResourceLimits::default()
        };
        let mut interp = Interpreter::new(limits, Arc::new(AtomicBool::new(false)));
        interp.exec_module(&module)?;
        Ok(interp.global("result").unwrap_or(Value::None))
    }

    #[test]
    fn test_growing_string_methods_are_charged_before_allocation() {
        for source in [
            "'x'.ljust(400000000)",
            "'x'.rjust(400000000, '*')",
            "'x'.center(400000000)",
            "'7'.zfill(400000000)",
            "'ab'.replace('', 'y' * 900)",
            "('z' * 600).join(['a', 'b', 'c'])",
            "'{:>400000000}'.format('x')",
            "f'{1.5:.400000000f}'",
            "'%400000000s' % 'x'",
            "re.sub('a', 'b' * 800, 'aaaa')",
        ] {
            let err = eval_within(source, 1024).unwrap_err();
            assert!(matches!(err, SandboxError::ResourceLimit(_)), "{source}: {err:?}");
        }
        assert_eq!(py_repr(&eval_within("'ab'.ljust(6, '-')", 1024).unwrap()), "'ab----'");
        assert_eq!(py_repr(&eval_within("'a-b'.replace('-', '+')", 1024).unwrap()), "'a+b'");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(repr("int(' 42 ')"), "42");
        assert_eq!(repr("int('ff', 16)"), "255");
        assert_eq!(repr("int(3.9)"), "3");
        assert_eq!(repr("float('1.5')"), "1.5");
        assert_eq!(repr("str(None)"), "'None'");
        assert_eq!(repr("bool([])"), "False");
        assert_eq!(eval("int('test_value')").unwrap_err(), SandboxError::value_error(
            "invalid literal for int() with base 10: 'test_value'"
        ));
        assert_eq!(eval("float('x')").unwrap_err().kind(), Some("ValueError"));
        assert_eq!(eval("int(None)").unwrap_err().kind(), Some("TypeError"));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(repr("len('héllo')"), "5");
        assert_eq!(repr("sum([1, 2, 3], 10)"), "16");
        assert_eq!(repr("max([3, 7, 2])"), "7");
        assert_eq!(repr("min(4, 2, 8)"), "2");
        assert_eq!(repr("max(['aa', 'b', 'ccc'], key=len)"), "'ccc'");
        assert_eq!(repr("max([], default=0)"), "0");
        assert_eq!(repr("set([1, 2, 1, 3])"), "[1, 2, 3]");
        assert_eq!(repr("dict([('a', 1)], b=2)"), "{'a': 1, 'b': 2}");
        assert_eq!(eval("min([])").unwrap_err().kind(), Some("ValueError"));
        assert_eq!(eval("len(5)").unwrap_err().kind(), Some("TypeError"));
    }

    #[test]
    fn test_missing_builtins_are_name_errors() {
        for name in ["range(3)", "print('x')", "isinstance(1, int)", "open('f')"] {
            assert_eq!(eval(name).unwrap_err().kind(), Some("NameError"), "{name}");
        }
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(repr("'  a b  c '.split()"), "['a', 'b', 'c']");
        assert_eq!(repr("'a,b,,c'.split(',')"), "['a', 'b', '', 'c']");
        assert_eq!(repr("'a b c'.rsplit(' ', 1)"), "['a b', 'c']");
        assert_eq!(repr("'-'.join(['x', 'y'])"), "'x-y'");
        assert_eq!(repr("'xxhixx'.strip('x')"), "'hi'");
        assert_eq!(repr("'hello world'.title()"), "'Hello World'");
        assert_eq!(repr("'héllo'.find('l')"), "2");
        assert_eq!(repr("'ab'.center(5, '*')"), "'**ab*'");
        assert_eq!(repr("'-7'.zfill(4)"), "'-007'");
        assert_eq!(repr("'a=b=c'.partition('=')"), "('a', '=', 'b=c')");
        assert_eq!(repr("'line1\\nline2\\r\\n'.splitlines()"), "['line1', 'line2']");
        assert_eq!(repr("'report.txt'.endswith(('.md', '.txt'))"), "True");
        assert_eq!(
            repr("'{0} has {n:>3} items, {0!r}'.format('cart', n=5)"),
            "\"cart has   5 items, 'cart'\""
        );
        assert_eq!(eval("'{} {0}'.format('a')").unwrap_err().kind(), Some("ValueError"));
        assert_eq!(repr("'ABC'.isupper()"), "True");
        assert_eq!(eval("'x'.index('y')").unwrap_err().kind(), Some("ValueError"));
        assert_eq!(eval("'x'.nope()").unwrap_err().kind(), Some("AttributeError"));
    }

    #[test]
    fn test_list_and_dict_methods() {
        let module = parse(
            "\
items = [3, 1, 2]
items.append(5)
items.sort(reverse=True)
last = items.pop()
words = ['bb', 'a', 'ccc']
words.sort(key=len)
d = {'a': 1}
d.update({'b': 2}, c=3)
missing = d.get('z', 'none')
popped = d.pop('a')
d.setdefault('e', [])
result = (items, last, words, d, missing, popped, list(d.items())[0])
",
        )
        .unwrap();
        let mut interp = Interpreter::new(ResourceLimits::default(), Arc::new(AtomicBool::new(false)));
        interp.exec_module(&module).unwrap();
        assert_eq!(
            py_repr(&interp.global("result").unwrap()),
            "([5, 3, 2], 1, ['a', 'bb', 'ccc'], {'b': 2, 'c': 3, 'e': []}, 'none', 1, ('b', 2))"
        );
        assert_eq!(eval("[].pop()").unwrap_err().kind(), Some("IndexError"));
        assert_eq!(eval("{}.pop('k')").unwrap_err().kind(), Some("KeyError"));
        assert_eq!(eval("[1, 'a'].sort()").unwrap_err().kind(), Some("TypeError"));
    }

    #[test]
    fn test_regex_functions() {
        assert_eq!(repr("re.match(r'(\\w+)@(\\w+)', 'bob@site x').group(2)"), "'site'");
        assert_eq!(repr("re.match('b', 'ab')"), "None");
        assert_eq!(repr("re.search('b', 'ab').span()"), "(1, 2)");
        assert_eq!(repr("re.fullmatch(r'\\d+', '123') is not None"), "True");
        assert_eq!(repr("re.fullmatch(r'\\d+', '123a')"), "None");
        assert_eq!(repr("re.findall(r'\\d+', 'a1b22c333')"), "['1', '22', '333']");
        assert_eq!(repr("re.findall(r'(\\w)=(\\d)', 'a=1 b=2')"), "[('a', '1'), ('b', '2')]");
        assert_eq!(repr("re.sub(r'(\\w+)@', r'<\\1>', 'me@ you@')"), "'<me> <you> '");
        assert_eq!(repr("re.sub('a', 'b', 'aaa', 2)"), "'bba'");
        assert_eq!(repr("re.split(r'[,;]\\s*', 'a, b;c')"), "['a', 'b', 'c']");
        assert_eq!(repr("re.match('HELLO', 'hello', re.IGNORECASE) is not None"), "True");
        assert_eq!(repr("re.search(r'(?P<year>\\d{4})', 'in 2024').groupdict()"), "{'year': '2024'}");
        assert_eq!(eval("re.compile('x')").unwrap_err().kind(), Some("AttributeError"));
        assert_eq!(eval("re.match('(', 'x')").unwrap_err().kind(), Some("re.error"));
        assert!(matches!(
            eval("re.match('a(?=b)', 'ab')").unwrap_err(),
            SandboxError::Unsupported(_)
        ));
    }

    #[test]
    fn test_math_module() {
        assert_eq!(repr("math.sqrt(16)"), "4.0");
        assert_eq!(repr("math.floor(-2.5)"), "-3");
        assert_eq!(repr("math.ceil(2.1)"), "3");
        assert_eq!(repr("math.log(8, 2)"), "3.0");
        assert_eq!(repr("math.pi > 3.14"), "True");
        assert_eq!(eval("math.sqrt(-1)").unwrap_err(), SandboxError::value_error("math domain error"));
        assert_eq!(eval("math.sqrt('x')").unwrap_err().kind(), Some("TypeError"));
    }
}
