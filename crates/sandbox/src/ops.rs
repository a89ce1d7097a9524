//! Operators, indexing and iteration.

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::error::{SandboxError, SandboxResult};
use crate::format::percent_format;
use crate::limits::Budget;
use crate::value::{Value, py_cmp, py_eq, py_repr};
use std::cmp::Ordering;
use std::rc::Rc;

/// Rough per-element cost charged for collection allocations.
pub(crate) const VALUE_SIZE: usize = 16;

fn overflow() -> SandboxError {
    SandboxError::raised("OverflowError", "integer overflow")
}

fn zero_division(message: &str) -> SandboxError {
    SandboxError::raised("ZeroDivisionError", message)
}

fn unsupported_operands(op: BinOp, a: &Value, b: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn repeat(budget: &mut Budget, seq: &Value, count: i64) -> SandboxResult<Value> {
    let n = count.max(0) as usize;
    match seq {
        Value::Str(s) => {
            budget.charge(s.len().saturating_mul(n))?;
            Ok(Value::str(&s.repeat(n)))
        }
        Value::List(items) => {
            let items = items.borrow();
            budget.charge(items.len().saturating_mul(n).saturating_mul(VALUE_SIZE))?;
            Ok(Value::list(repeat_items(&items, n)))
        }
        Value::Tuple(items) => {
            budget.charge(items.len().saturating_mul(n).saturating_mul(VALUE_SIZE))?;
            Ok(Value::tuple(repeat_items(items, n)))
        }
        _ => Err(SandboxError::type_error("can't multiply sequence")),
    }
}

fn repeat_items(items: &[Value], n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    out
}

pub(crate) fn binop(budget: &mut Budget, op: BinOp, a: &Value, b: &Value) -> SandboxResult<Value> {
    if let (Some(x), Some(y)) = (int_operand(a), int_operand(b)) {
        return int_binop(op, x, y, a, b);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            budget.charge(x.len() + y.len())?;
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::Str(Rc::from(s)))
        }
        (BinOp::Add, Value::Str(_), other) => Err(SandboxError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            budget.charge(items.len() * VALUE_SIZE)?;
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::List(_), other) => Err(SandboxError::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        ))),
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.as_ref().clone();
            items.extend(y.iter().cloned());
            budget.charge(items.len() * VALUE_SIZE)?;
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, seq @ (Value::Str(_) | Value::List(_) | Value::Tuple(_)), n)
        | (BinOp::Mul, n, seq @ (Value::Str(_) | Value::List(_) | Value::Tuple(_))) => {
            match n.as_int() {
                Some(count) => repeat(budget, seq, count),
                None => Err(SandboxError::type_error(format!(
                    "can't multiply sequence by non-int of type '{}'",
                    n.type_name()
                ))),
            }
        }
        (BinOp::Mod, Value::Str(template), args) => {
            let out = percent_format(budget, template, args)?;
            budget.charge(out.len())?;
            Ok(Value::str(&out))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut merged = x.borrow().clone();
            for (k, v) in y.borrow().entries() {
                merged.insert(k.clone(), v.clone());
            }
            Ok(Value::dict(merged))
        }
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => float_binop(op, x, y).map_err(|e| match e {
                SandboxError::Unsupported(_) => unsupported_operands(op, a, b),
                other => other,
            }),
            _ => Err(unsupported_operands(op, a, b)),
        },
    }
}

fn int_operand(v: &Value) -> Option<i64> {
    match v {
        Value::Int(_) | Value::Bool(_) => v.as_int(),
        _ => None,
    }
}

fn int_binop(op: BinOp, x: i64, y: i64, a: &Value, b: &Value) -> SandboxResult<Value> {
    let both_bool = matches!((a, b), (Value::Bool(_), Value::Bool(_)));
    let result = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            floor_div(x, y).ok_or_else(overflow)?
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            floor_mod(x, y).ok_or_else(overflow)?
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::BitAnd if both_bool => return Ok(Value::Bool(x & y != 0)),
        BinOp::BitOr if both_bool => return Ok(Value::Bool((x | y) != 0)),
        BinOp::BitXor if both_bool => return Ok(Value::Bool((x ^ y) != 0)),
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::LShift => {
            if y < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            if x == 0 {
                0
            } else if y >= 63 {
                return Err(overflow());
            } else {
                let shifted = x << y;
                if shifted >> y != x {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            if y >= 64 {
                if x < 0 { -1 } else { 0 }
            } else {
                x >> y
            }
        }
    };
    Ok(Value::Int(result))
}

fn float_binop(op: BinOp, x: f64, y: f64) -> SandboxResult<Value> {
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo by zero"));
            }
            float_mod(x, y)
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(SandboxError::value_error(
                    "complex results are not supported",
                ));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(SandboxError::raised(
                    "OverflowError",
                    "(34, 'Numerical result out of range')",
                ));
            }
            r
        }
        _ => return Err(SandboxError::Unsupported(op.symbol().into())),
    };
    Ok(Value::Float(result))
}

pub(crate) fn unary(op: UnaryOp, v: &Value) -> SandboxResult<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(SandboxError::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                v.type_name()
            )))
        }
    }
}

fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Float(_), Value::Float(_)) => false,
        _ => py_eq(a, b) && a.type_name() == b.type_name() && !matches!(a, Value::Float(_)),
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> SandboxResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(SandboxError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(d) => {
            item.check_hashable()?;
            Ok(d.borrow().contains(item))
        }
        other => Err(SandboxError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn compare(op: CmpOp, a: &Value, b: &Value) -> SandboxResult<bool> {
    let ordered = |wanted: fn(Ordering) -> bool, symbol: &str| -> SandboxResult<bool> {
        py_cmp(a, b).map(wanted).map_err(|_| {
            SandboxError::type_error(format!(
                "'{symbol}' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))
        })
    };
    match op {
        CmpOp::Eq => Ok(py_eq(a, b)),
        CmpOp::NotEq => Ok(!py_eq(a, b)),
        CmpOp::Lt => ordered(Ordering::is_lt, "<"),
        CmpOp::LtE => ordered(Ordering::is_le, "<="),
        CmpOp::Gt => ordered(Ordering::is_gt, ">"),
        CmpOp::GtE => ordered(Ordering::is_ge, ">="),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(is_same(a, b)),
        CmpOp::IsNot => Ok(!is_same(a, b)),
    }
}

/// Snapshot of the items `for` would visit.
pub(crate) fn iterate(value: &Value) -> SandboxResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()),
        Value::Dict(d) => Ok(d.borrow().keys()),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize, what: &str) -> SandboxResult<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    if i < 0 || i >= len {
        return Err(SandboxError::raised(
            "IndexError",
            format!("{what} index out of range"),
        ));
    }
    Ok(i as usize)
}

fn index_operand(container: &str, index: &Value) -> SandboxResult<i64> {
    index.as_int().ok_or_else(|| {
        SandboxError::type_error(format!(
            "{container} indices must be integers or slices, not {}",
            index.type_name()
        ))
    })
}

pub(crate) fn get_item(value: &Value, index: &Value) -> SandboxResult<Value> {
    match value {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index_operand("list", index)?, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index_operand("tuple", index)?, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let n = index.as_int().ok_or_else(|| {
                SandboxError::type_error(format!(
                    "string indices must be integers, not '{}'",
                    index.type_name()
                ))
            })?;
            let len = s.chars().count();
            let i = normalize_index(n, len, "string")?;
            Ok(s.chars().nth(i).map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).unwrap_or(Value::None))
        }
        Value::Dict(d) => {
            index.check_hashable()?;
            d.borrow()
                .get(index)
                .ok_or_else(|| SandboxError::raised("KeyError", py_repr(index)))
        }
        Value::Match(m) => Ok(m.group(m.group_index(index)?)),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_item(target: &Value, index: &Value, item: Value) -> SandboxResult<()> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let i = normalize_index(index_operand("list", index)?, len, "list assignment")?;
            items[i] = item;
            Ok(())
        }
        Value::Dict(d) => {
            index.check_hashable()?;
            d.borrow_mut().insert(index.clone(), item);
            Ok(())
        }
        other => Err(SandboxError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn del_item(target: &Value, index: &Value) -> SandboxResult<()> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let i = normalize_index(index_operand("list", index)?, len, "list assignment")?;
            items.remove(i);
            Ok(())
        }
        Value::Dict(d) => {
            index.check_hashable()?;
            d.borrow_mut()
                .remove(index)
                .map(|_| ())
                .ok_or_else(|| SandboxError::raised("KeyError", py_repr(index)))
        }
        other => Err(SandboxError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Positions visited by `seq[lower:upper:step]`.
pub(crate) fn slice_positions(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> SandboxResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(SandboxError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |x: i64| -> i64 {
        if x < 0 {
            let x = x + len;
            if x < 0 {
                if step < 0 { -1 } else { 0 }
            } else {
                x
            }
        } else if x >= len {
            if step < 0 { len - 1 } else { len }
        } else {
            x
        }
    };
    let (start, stop) = if step > 0 {
        (lower.map(clamp).unwrap_or(0), upper.map(clamp).unwrap_or(len))
    } else {
        (lower.map(clamp).unwrap_or(len - 1), upper.map(clamp).unwrap_or(-1))
    };
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

pub(crate) fn get_slice(
    value: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> SandboxResult<Value> {
    match value {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(Value::str(&picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ResourceLimits;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn budget() -> Budget {
        Budget::new(ResourceLimits::default(), Arc::new(AtomicBool::new(false)))
    }

    fn int(v: Value) -> i64 {
        v.as_int().unwrap()
    }

    #[test]
    fn test_python_division_semantics() {
        let mut b = budget();
        assert_eq!(int(binop(&mut b, BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap()), -4);
        assert_eq!(int(binop(&mut b, BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap()), 1);
        assert_eq!(int(binop(&mut b, BinOp::Mod, &Value::Int(7), &Value::Int(-2)).unwrap()), -1);
        let Value::Float(f) = binop(&mut b, BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap() else {
            panic!("expected float");
        };
        assert_eq!(f, 3.5);
        let err = binop(&mut b, BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind(), Some("ZeroDivisionError"));
    }

    #[test]
    fn test_overflow_is_raised() {
        let mut b = budget();
        let err = binop(&mut b, BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap_err();
        assert_eq!(err.kind(), Some("OverflowError"));
        let err = binop(&mut b, BinOp::Pow, &Value::Int(10), &Value::Int(40)).unwrap_err();
        assert_eq!(err.kind(), Some("OverflowError"));
    }

    #[test]
    fn test_sequence_ops() {
        let mut b = budget();
        let s = binop(&mut b, BinOp::Add, &Value::str("ab"), &Value::str("cd")).unwrap();
        assert_eq!(py_repr(&s), "'abcd'");
        let r = binop(&mut b, BinOp::Mul, &Value::Int(3), &Value::str("x")).unwrap();
        assert_eq!(py_repr(&r), "'xxx'");
        let err = binop(&mut b, BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), Some("TypeError"));
        let l = binop(
            &mut b,
            BinOp::Add,
            &Value::list(vec![Value::Int(1)]),
            &Value::list(vec![Value::Int(2)]),
        )
        .unwrap();
        assert_eq!(py_repr(&l), "[1, 2]");
    }

    #[test]
    fn test_repetition_is_charged_before_allocation() {
        let mut b = Budget::new(
            ResourceLimits {
                max_memory_bytes: 1024,
                ..Default::default()
            },
            Arc::new(AtomicBool::new(false)),
        );
        let err = binop(&mut b, BinOp::Mul, &Value::str("x"), &Value::Int(1 << 40)).unwrap_err();
        assert!(err.is_resource_limit());
    }

    #[test]
    fn test_indexing_and_slicing() {
        let list = Value::list((0..5).map(Value::Int).collect());
        assert_eq!(int(get_item(&list, &Value::Int(-1)).unwrap()), 4);
        let err = get_item(&list, &Value::Int(5)).unwrap_err();
        assert_eq!(err.kind(), Some("IndexError"));
        assert_eq!(py_repr(&get_slice(&list, Some(1), Some(3), None).unwrap()), "[1, 2]");
        assert_eq!(py_repr(&get_slice(&list, None, None, Some(-1)).unwrap()), "[4, 3, 2, 1, 0]");
        assert_eq!(py_repr(&get_slice(&list, Some(-2), None, None).unwrap()), "[3, 4]");
        assert_eq!(py_repr(&get_slice(&Value::str("hello"), None, Some(-1), Some(2)).unwrap()), "'hl'");
        assert!(get_slice(&list, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_dict_item_errors() {
        let d = Value::dict(Default::default());
        set_item(&d, &Value::str("a"), Value::Int(1)).unwrap();
        assert_eq!(int(get_item(&d, &Value::str("a")).unwrap()), 1);
        let err = get_item(&d, &Value::str("missing")).unwrap_err();
        assert_eq!(err, SandboxError::raised("KeyError", "'missing'"));
        let err = set_item(&d, &Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.kind(), Some("TypeError"));
        del_item(&d, &Value::str("a")).unwrap();
        assert!(del_item(&d, &Value::str("a")).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap());
        let err = compare(CmpOp::Gt, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            err,
            SandboxError::type_error("'>' not supported between instances of 'str' and 'int'")
        );
        assert!(contains(&Value::Int(3), &Value::Int(3)).is_err());
    }
}
