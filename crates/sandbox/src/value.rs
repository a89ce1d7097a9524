//! Runtime values.
//!
//! Values live on the interpreter thread only. Lists and dicts are shared
//! by reference like their Python counterparts; everything crossing the
//! sandbox boundary goes through [`from_json`] and [`to_json`].

use crate::ast::FunctionDef;
use crate::error::{SandboxError, SandboxResult};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

/// Nesting depth at which rendering and JSON conversion give up, which
/// also stops self-referencing lists from recursing forever.
const MAX_NESTING: usize = 64;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Function(Rc<Function>),
    /// Builtin or module function, by qualified name (`len`, `re.sub`).
    Builtin(&'static str),
    Module(&'static str),
    Method(Rc<BoundMethod>),
    ExceptionType(Rc<str>),
    Exception(Rc<ExceptionValue>),
    Match(Rc<MatchData>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&py_repr(self))
    }
}

pub struct Function {
    pub def: Arc<FunctionDef>,
    /// Default values evaluated when the `def` statement ran.
    pub defaults: Vec<Option<Value>>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    pub kind: String,
    pub message: String,
}

/// A successful `re` match. Spans are byte offsets into `text`.
pub struct MatchData {
    pub text: Rc<str>,
    pub spans: Vec<Option<(usize, usize)>>,
    pub names: Vec<Option<String>>,
}

impl MatchData {
    pub fn group_index(&self, key: &Value) -> SandboxResult<usize> {
        match key {
            Value::Int(i) if *i >= 0 && (*i as usize) < self.spans.len() => Ok(*i as usize),
            Value::Str(name) => self
                .names
                .iter()
                .position(|n| n.as_deref() == Some(name.as_ref()))
                .ok_or_else(|| SandboxError::raised("IndexError", "no such group")),
            _ => Err(SandboxError::raised("IndexError", "no such group")),
        }
    }

    pub fn group(&self, index: usize) -> Value {
        match self.spans.get(index).copied().flatten() {
            Some((start, end)) => Value::str(&self.text[start..end]),
            None => Value::None,
        }
    }

    /// Character offsets of a group, `(-1, -1)` when it did not take part.
    pub fn char_span(&self, index: usize) -> (i64, i64) {
        match self.spans.get(index).copied().flatten() {
            Some((start, end)) => (
                self.text[..start].chars().count() as i64,
                self.text[..end].chars().count() as i64,
            ),
            None => (-1, -1),
        }
    }
}

/// Insertion-ordered mapping with Python key equality.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| py_eq(k, key))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries[i].1.clone())
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn exception(kind: &str, message: impl Into<String>) -> Self {
        Value::Exception(Rc::new(ExceptionValue {
            kind: kind.to_string(),
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Function(_) => "function".into(),
            Value::Builtin(_) | Value::Method(_) => "builtin_function_or_method".into(),
            Value::Module(_) => "module".into(),
            Value::ExceptionType(_) => "type".into(),
            Value::Exception(e) => e.kind.clone(),
            Value::Match(_) => "re.Match".into(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::ExceptionType(_)
        )
    }

    /// Ints and bools as `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Any real number as `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn check_hashable(&self) -> SandboxResult<()> {
        match self {
            Value::List(_) | Value::Dict(_) => Err(SandboxError::type_error(format!(
                "unhashable type: '{}'",
                self.type_name()
            ))),
            Value::Tuple(items) => items.iter().try_for_each(Value::check_hashable),
            _ => Ok(()),
        }
    }
}

pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.entries()
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| py_eq(v, &other)))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Match(x), Value::Match(y)) => Rc::ptr_eq(x, y),
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        },
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
}

/// Ordering for `<`, `sorted` and `min`/`max`.
pub fn py_cmp(a: &Value, b: &Value) -> SandboxResult<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => seq_cmp(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Ok(x.cmp(&y)),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
                _ => Err(SandboxError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        },
    }
}

fn seq_cmp(a: &[Value], b: &[Value]) -> SandboxResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match py_cmp(x, y)? {
            Ordering::Equal => {}
            other => return Ok(other),
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.into();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return python_exponent(&format!("{f:e}"));
    }
    if f.fract() == 0.0 {
        return format!("{f:.1}");
    }
    format!("{f}")
}

/// Rewrite Rust's `1.5e-7` exponent form as Python's `1.5e-07`.
pub fn python_exponent(formatted: &str) -> String {
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp.trim_start_matches('+')),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted.to_string(),
    }
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// `str(value)`.
pub fn py_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::Exception(e) => e.message.clone(),
        other => render(other, 0),
    }
}

/// `repr(value)`.
pub fn py_repr(value: &Value) -> String {
    render(value, 0)
}

fn render(value: &Value, depth: usize) -> String {
    if depth > MAX_NESTING {
        return "...".into();
    }
    let join = |items: &[Value]| {
        items
            .iter()
            .map(|v| render(v, depth + 1))
            .collect::<Vec<_>>()
            .join(", ")
    };
    match value {
        Value::None => "None".into(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Str(s) => repr_str(s),
        Value::List(items) => format!("[{}]", join(&items.borrow())),
        Value::Tuple(items) if items.len() == 1 => format!("({},)", render(&items[0], depth + 1)),
        Value::Tuple(items) => format!("({})", join(items)),
        Value::Dict(d) => {
            let d = d.borrow();
            let body = d
                .entries()
                .iter()
                .map(|(k, v)| format!("{}: {}", render(k, depth + 1), render(v, depth + 1)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{body}}}")
        }
        Value::Function(f) => format!("<function {}>", f.def.name),
        Value::Builtin(name) => format!("<built-in function {name}>"),
        Value::Module(name) => format!("<module '{name}'>"),
        Value::Method(m) => format!(
            "<built-in method {} of {} object>",
            m.name,
            m.receiver.type_name()
        ),
        Value::ExceptionType(kind) => format!("<class '{kind}'>"),
        Value::Exception(e) => format!("{}({})", e.kind, repr_str(&e.message)),
        Value::Match(m) => {
            let (start, end) = m.char_span(0);
            format!(
                "<re.Match object; span=({start}, {end}), match={}>",
                render(&m.group(0), depth + 1)
            )
        }
    }
}

pub fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (k, v) in map {
                dict.insert(Value::str(k), from_json(v));
            }
            Value::dict(dict)
        }
    }
}

pub fn to_json(value: &Value) -> SandboxResult<serde_json::Value> {
    to_json_at(value, 0)
}

fn to_json_at(value: &Value, depth: usize) -> SandboxResult<serde_json::Value> {
    if depth > MAX_NESTING {
        return Err(SandboxError::value_error("Circular reference detected"));
    }
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                SandboxError::value_error("Out of range float values are not JSON compliant")
            })?,
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) => serde_json::Value::Array(
            items
                .borrow()
                .iter()
                .map(|v| to_json_at(v, depth + 1))
                .collect::<SandboxResult<_>>()?,
        ),
        Value::Tuple(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| to_json_at(v, depth + 1))
                .collect::<SandboxResult<_>>()?,
        ),
        Value::Dict(d) => {
            let mut map = serde_json::Map::new();
            for (k, v) in d.borrow().entries() {
                let key = match k {
                    Value::Str(s) => s.to_string(),
                    Value::None => "null".into(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(_) | Value::Float(_) => py_str(k),
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "keys must be str, int, float, bool or None, not {}",
                            other.type_name()
                        )));
                    }
                };
                map.insert(key, to_json_at(v, depth + 1)?);
            }
            serde_json::Value::Object(map)
        }
        other => {
            return Err(SandboxError::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_rendering_matches_python() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e-7), "1e-07");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_repr_and_str() {
        let v = Value::list(vec![Value::Int(1), Value::str("a'b"), Value::None]);
        assert_eq!(py_repr(&v), "[1, \"a'b\", None]");
        assert_eq!(py_str(&Value::str("x")), "x");
        assert_eq!(py_repr(&Value::tuple(vec![Value::Int(1)])), "(1,)");
        assert_eq!(py_str(&Value::exception("ValueError", "bad")), "bad");
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::str("1"), &Value::Int(1)));
        assert!(!py_eq(&Value::None, &Value::Bool(false)));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(
            py_cmp(&Value::str("a"), &Value::str("b")).unwrap(),
            Ordering::Less
        );
        assert!(py_cmp(&Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_json_roundtrip_and_rejections() {
        let input = json!({"name": "x", "n": 2, "ratio": 0.5, "tags": ["a", null]});
        let value = from_json(&input);
        assert_eq!(to_json(&value).unwrap(), input);

        assert!(to_json(&Value::Builtin("len")).is_err());
        assert!(to_json(&Value::Float(f64::NAN)).is_err());

        let cyclic = Value::list(Vec::new());
        if let Value::List(items) = &cyclic {
            items.borrow_mut().push(cyclic.clone());
        }
        assert!(to_json(&cyclic).is_err());
        if let Value::List(items) = &cyclic {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_dict_preserves_insertion_order() {
        let mut d = Dict::new();
        d.insert(Value::str("b"), Value::Int(1));
        d.insert(Value::str("a"), Value::Int(2));
        d.insert(Value::str("b"), Value::Int(3));
        assert_eq!(d.len(), 2);
        assert_eq!(py_repr(&Value::dict(d)), "{'b': 3, 'a': 2}");
    }

    #[test]
    fn test_unhashable_keys() {
        assert!(Value::list(vec![]).check_hashable().is_err());
        assert!(Value::tuple(vec![Value::Int(1)]).check_hashable().is_ok());
    }
}
