//! Format-spec mini-language (`f"{x:>8.2f}"`, `str.format`) and
//! printf-style `%` formatting.

use crate::error::{SandboxError, SandboxResult};
use crate::limits::Budget;
use crate::value::{Dict, Value, format_float, py_repr, py_str, python_exponent};

#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

impl Spec {
    /// Upper bound on the bytes padding and float digits add to a field.
    fn footprint(&self, numeric: bool) -> usize {
        let digits = if numeric { self.precision.unwrap_or(0) } else { 0 };
        self.width
            .saturating_mul(self.fill.len_utf8().max(1))
            .saturating_add(digits)
    }
}

fn parse_spec(spec: &str) -> SandboxResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i).filter(|c| matches!(c, '+' | '-' | ' ')) {
        out.sign = c;
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
    }
    if let Some(&c) = chars.get(i).filter(|c| matches!(c, ',' | '_')) {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(SandboxError::value_error("Format specifier missing precision"));
        }
        out.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if let Some(&c) = chars.get(i) {
        out.ty = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(SandboxError::value_error("Invalid format specifier"));
    }
    Ok(out)
}

/// `format(value, spec)`. Padding and precision are charged to `budget`
/// before the field is built.
pub(crate) fn format_value(budget: &mut Budget, value: &Value, spec: &str) -> SandboxResult<String> {
    if spec.is_empty() {
        return Ok(py_str(value));
    }
    let spec = parse_spec(spec)?;
    budget.charge(spec.footprint(!matches!(value, Value::Str(_))))?;
    match value {
        Value::Str(s) => format_str(s, &spec),
        Value::Int(_) | Value::Bool(_) => {
            let i = value.as_int().unwrap_or_default();
            match spec.ty {
                Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => format_float_spec(i as f64, &spec),
                _ => format_int(i, &spec),
            }
        }
        Value::Float(f) => format_float_spec(*f, &spec),
        other => Err(SandboxError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn unknown_code(ty: char, value_type: &str) -> SandboxError {
    SandboxError::value_error(format!(
        "Unknown format code '{ty}' for object of type '{value_type}'"
    ))
}

fn format_str(s: &str, spec: &Spec) -> SandboxResult<String> {
    if let Some(ty) = spec.ty.filter(|t| *t != 's') {
        return Err(unknown_code(ty, "str"));
    }
    if spec.sign != '-' {
        return Err(SandboxError::value_error(
            "Sign not allowed in string format specifier",
        ));
    }
    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad(String::new(), body, spec, '<'))
}

fn format_int(i: i64, spec: &Spec) -> SandboxResult<String> {
    let magnitude = i.unsigned_abs();
    let digits = match spec.ty {
        None | Some('d') | Some('n') => group(&magnitude.to_string(), spec.grouping, 3),
        Some('x') => group(&format!("{magnitude:x}"), spec.grouping, 4),
        Some('X') => group(&format!("{magnitude:X}"), spec.grouping, 4),
        Some('o') => group(&format!("{magnitude:o}"), spec.grouping, 4),
        Some('b') => group(&format!("{magnitude:b}"), spec.grouping, 4),
        Some('c') => char::from_u32(magnitude as u32)
            .map(String::from)
            .ok_or_else(|| SandboxError::raised("OverflowError", "%c arg not in range(0x110000)"))?,
        Some(ty) => return Err(unknown_code(ty, "int")),
    };
    if spec.precision.is_some() {
        return Err(SandboxError::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let mut prefix = sign_prefix(i < 0, spec.sign);
    if spec.alternate {
        match spec.ty {
            Some('x') => prefix.push_str("0x"),
            Some('X') => prefix.push_str("0X"),
            Some('o') => prefix.push_str("0o"),
            Some('b') => prefix.push_str("0b"),
            _ => {}
        }
    }
    Ok(pad(prefix, digits, spec, '>'))
}

fn format_float_spec(f: f64, spec: &Spec) -> SandboxResult<String> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let magnitude = f.abs();
    let upper = spec.ty.is_some_and(|t| t.is_ascii_uppercase());
    let mut body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        match spec.ty {
            Some('%') => format!("{text}%"),
            _ => text,
        }
    } else {
        match spec.ty {
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec),
            Some('e' | 'E') => {
                let s = python_exponent(&format!("{:.*e}", spec.precision.unwrap_or(6), magnitude));
                if upper { s.to_uppercase() } else { s }
            }
            Some('g' | 'G') => {
                let s = general(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if upper { s.to_uppercase() } else { s }
            }
            Some('%') => format!("{}%", fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec)),
            None => match spec.precision {
                Some(p) => general(magnitude, p, spec.alternate),
                None => format_float(magnitude),
            },
            Some(ty) => return Err(unknown_code(ty, "float")),
        }
    };
    if matches!(spec.ty, Some('g' | 'G') | None) && spec.grouping.is_some() {
        body = group_integer_part(&body, spec.grouping);
    }
    Ok(pad(sign_prefix(negative, spec.sign), body, spec, '>'))
}

fn fixed(magnitude: f64, precision: usize, spec: &Spec) -> String {
    let s = format!("{magnitude:.precision$}");
    let s = if spec.alternate && precision == 0 { format!("{s}.") } else { s };
    group_integer_part(&s, spec.grouping)
}

/// `g` presentation: fixed or scientific depending on the exponent, with
/// insignificant trailing zeros removed.
fn general(magnitude: f64, precision: usize, alternate: bool) -> String {
    let p = precision.max(1);
    let exp = if magnitude == 0.0 {
        0
    } else {
        let sci = format!("{:.*e}", p - 1, magnitude);
        sci.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };
    if exp >= -4 && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let s = format!("{magnitude:.decimals$}");
        if alternate { s } else { strip_zeros(&s) }
    } else {
        let s = format!("{:.*e}", p - 1, magnitude);
        let s = match s.split_once('e') {
            Some((mantissa, e)) if !alternate => format!("{}e{e}", strip_zeros(mantissa)),
            _ => s,
        };
        python_exponent(&s)
    }
}

fn strip_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn sign_prefix(negative: bool, sign: char) -> String {
    match (negative, sign) {
        (true, _) => "-".into(),
        (false, '+') => "+".into(),
        (false, ' ') => " ".into(),
        _ => String::new(),
    }
}

fn group(digits: &str, separator: Option<char>, every: usize) -> String {
    let Some(sep) = separator else {
        return digits.to_string();
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(digits.len() + digits.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn group_integer_part(s: &str, separator: Option<char>) -> String {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    format!("{}{}", group(&s[..split], separator, 3), &s[split..])
}

fn pad(prefix: String, body: String, spec: &Spec, default_align: char) -> String {
    let (fill, align) = match (spec.align, spec.zero) {
        (None, true) => ('0', '='),
        (Some(a), _) => (spec.fill, a),
        (None, false) => (spec.fill, default_align),
    };
    let len = prefix.chars().count() + body.chars().count();
    if len >= spec.width {
        return prefix + &body;
    }
    let gap = spec.width - len;
    let fill_n = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    match align {
        '<' => format!("{prefix}{body}{}", fill_n(gap)),
        '^' => format!("{}{prefix}{body}{}", fill_n(gap / 2), fill_n(gap - gap / 2)),
        '=' => format!("{prefix}{}{body}", fill_n(gap)),
        _ => format!("{}{prefix}{body}", fill_n(gap)),
    }
}

/// `template % args`.
pub(crate) fn percent_format(
    budget: &mut Budget,
    template: &str,
    args: &Value,
) -> SandboxResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mapping: Option<Dict> = match args {
        Value::Dict(d) => Some(d.borrow().clone()),
        _ => None,
    };
    let mut next = 0usize;
    let mut used_mapping = false;
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut key = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|c| *c == ')')
                .ok_or_else(|| SandboxError::value_error("incomplete format key"))?;
            key = Some(chars[i + 1..i + close].iter().collect::<String>());
            i += close + 1;
        }
        let mut spec = Spec {
            align: Some('>'),
            ..Spec::default()
        };
        while let Some(&c) = chars.get(i).filter(|c| matches!(c, '-' | '+' | ' ' | '0' | '#')) {
            match c {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                '0' => spec.zero = true,
                '#' => spec.alternate = true,
                _ => {}
            }
            i += 1;
        }
        if spec.zero && spec.align == Some('>') {
            spec.align = None;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        spec.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
        if chars.get(i) == Some(&'*') {
            return Err(SandboxError::Unsupported("'*' width in % formatting".into()));
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            spec.precision = Some(chars[start..i].iter().collect::<String>().parse().unwrap_or(0));
        }
        let ty = *chars
            .get(i)
            .ok_or_else(|| SandboxError::value_error("incomplete format"))?;
        i += 1;
        if ty == '%' {
            out.push('%');
            continue;
        }
        budget.charge(spec.footprint(ty != 's' && ty != 'r' && ty != 'a'))?;

        let arg = match &key {
            Some(k) => {
                used_mapping = true;
                let map = mapping
                    .as_ref()
                    .ok_or_else(|| SandboxError::type_error("format requires a mapping"))?;
                map.get(&Value::str(k))
                    .ok_or_else(|| SandboxError::raised("KeyError", py_repr(&Value::str(k))))?
            }
            None => {
                let arg = positional.get(next).cloned().ok_or_else(|| {
                    SandboxError::type_error("not enough arguments for format string")
                })?;
                next += 1;
                arg
            }
        };

        let text = match ty {
            's' => {
                spec.zero = false;
                spec.align.get_or_insert('>');
                format_str(&py_str(&arg), &Spec { sign: '-', ..spec })?
            }
            'r' | 'a' => {
                spec.zero = false;
                spec.align.get_or_insert('>');
                format_str(&py_repr(&arg), &Spec { sign: '-', ..spec })?
            }
            'd' | 'i' | 'u' => {
                let n = match &arg {
                    Value::Float(f) => f.trunc() as i64,
                    other => other.as_int().ok_or_else(|| {
                        SandboxError::type_error(format!(
                            "%{ty} format: a real number is required, not {}",
                            other.type_name()
                        ))
                    })?,
                };
                let min_digits = spec.precision.take();
                let mut s = format_int(n, &Spec { ty: Some('d'), ..spec.clone() })?;
                if let Some(p) = min_digits {
                    let digits = n.unsigned_abs().to_string();
                    if digits.len() < p {
                        s = s.replacen(&digits, &format!("{digits:0>p$}"), 1);
                    }
                }
                s
            }
            'x' | 'X' | 'o' => {
                let n = arg.as_int().ok_or_else(|| {
                    SandboxError::type_error(format!(
                        "%{ty} format: an integer is required, not {}",
                        arg.type_name()
                    ))
                })?;
                spec.precision = None;
                format_int(n, &Spec { ty: Some(ty), ..spec })?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let f = arg.as_float().ok_or_else(|| {
                    SandboxError::type_error(format!(
                        "must be real number, not {}",
                        arg.type_name()
                    ))
                })?;
                format_float_spec(f, &Spec { ty: Some(ty), ..spec })?
            }
            'c' => match &arg {
                Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                other => {
                    let n = other.as_int().ok_or_else(|| {
                        SandboxError::type_error("%c requires int or char")
                    })?;
                    format_int(n, &Spec { ty: Some('c'), ..spec })?
                }
            },
            other => {
                return Err(SandboxError::value_error(format!(
                    "unsupported format character '{other}'"
                )));
            }
        };
        out.push_str(&text);
    }

    if !used_mapping && next < positional.len() && !matches!(args, Value::Dict(_)) {
        return Err(SandboxError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ResourceLimits;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn budget(max_memory_bytes: u64) -> Budget {
        let limits = ResourceLimits {
            max_memory_bytes,
            ..ResourceLimits::default()
        };
        Budget::new(limits, Arc::new(AtomicBool::new(false)))
    }

    fn format_value(value: &Value, spec: &str) -> SandboxResult<String> {
        super::format_value(&mut budget(1 << 20), value, spec)
    }

    fn percent_format(template: &str, args: &Value) -> SandboxResult<String> {
        super::percent_format(&mut budget(1 << 20), template, args)
    }

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn test_alignment_and_fill() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::str("abcdef"), ".3"), "abc");
        assert_eq!(fmt(Value::Int(42), "5"), "   42");
        assert_eq!(fmt(Value::Int(-42), "06"), "-00042");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
    }

    #[test]
    fn test_numeric_presentations() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(1234.5), ",.1f"), "1,234.5");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(5), "b"), "101");
        assert_eq!(fmt(Value::Float(12345.678), "e"), "1.234568e+04");
        assert_eq!(fmt(Value::Float(0.0001234), "g"), "0.0001234");
        assert_eq!(fmt(Value::Float(123456789.0), "g"), "1.23457e+08");
        assert_eq!(fmt(Value::Float(2.5), "+"), "+2.5");
    }

    #[test]
    fn test_invalid_specs() {
        assert!(format_value(&Value::Float(1.0), "d").is_err());
        assert!(format_value(&Value::str("x"), "d").is_err());
        assert!(format_value(&Value::None, ">4").is_err());
        assert_eq!(format_value(&Value::None, "").unwrap(), "None");
    }

    #[test]
    fn test_percent_formatting() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(0.5)]);
        assert_eq!(
            percent_format("%s=%d (%.2f) 100%%", &args).unwrap(),
            "x=3 (0.50) 100%"
        );
        assert_eq!(percent_format("%5s|%-4d|", &Value::tuple(vec![Value::str("a"), Value::Int(7)])).unwrap(), "    a|7   |");
        assert_eq!(percent_format("%r", &Value::str("q")).unwrap(), "'q'");
        assert_eq!(percent_format("%03d", &Value::Int(7)).unwrap(), "007");

        let mut d = Dict::new();
        d.insert(Value::str("name"), Value::str("bob"));
        assert_eq!(percent_format("hi %(name)s", &Value::dict(d)).unwrap(), "hi bob");

        assert!(percent_format("%s %s", &Value::str("a")).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
        assert!(percent_format("%d", &Value::str("a")).is_err());
    }

    #[test]
    fn test_wide_fields_are_charged_before_padding() {
        let mut small = budget(1024);
        let err = super::format_value(&mut small, &Value::str("x"), ">400000000").unwrap_err();
        assert!(matches!(err, SandboxError::ResourceLimit(_)));

        let mut small = budget(1024);
        let err = super::format_value(&mut small, &Value::Float(1.0), ".400000000f").unwrap_err();
        assert!(matches!(err, SandboxError::ResourceLimit(_)));

        let mut small = budget(1024);
        let err = super::percent_format(&mut small, "%400000000d", &Value::Int(1)).unwrap_err();
        assert!(matches!(err, SandboxError::ResourceLimit(_)));

        let mut small = budget(1024);
        assert_eq!(super::format_value(&mut small, &Value::str("ab"), "*^6").unwrap(), "**ab**");
    }
}
