//! Loose value coercions with the semantics grading scripts rely on.

use std::sync::OnceLock;

use fieldrunner_stats::format_number;
use regex::Regex;
use serde_json::Value;

use crate::marshal;

fn float_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:Infinity|(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)")
            .expect("float prefix pattern is a valid regex")
    })
}

/// `parseFloat`: the longest numeric prefix after leading whitespace, or NaN.
pub fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let Some(m) = float_prefix().find(s) else {
        return f64::NAN;
    };
    let text = m.as_str();
    match text.trim_start_matches(['+', '-']) {
        "Infinity" if text.starts_with('-') => f64::NEG_INFINITY,
        "Infinity" => f64::INFINITY,
        _ => text.parse().unwrap_or(f64::NAN),
    }
}

/// `parseInt(s, 10)`: optional sign and leading decimal digits, or NaN.
pub fn parse_int(s: &str) -> f64 {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    if digits.is_empty() {
        return f64::NAN;
    }
    let v: f64 = digits.parse().unwrap_or(f64::NAN);
    if negative {
        -v
    } else {
        v
    }
}

/// Number parsing for field contents: first comma becomes the decimal point.
pub fn parse_decimal(s: &str) -> f64 {
    parse_float(&s.replacen(',', ".", 1))
}

/// `Number.isInteger`.
pub fn is_integer(v: f64) -> bool {
    v.is_finite() && v.fract() == 0.0
}

/// `typeof` of a value as it would appear inside the sandbox.
pub fn js_type(v: &Value) -> &'static str {
    match v {
        Value::Null | Value::Array(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Object(_) if marshal::as_number(v).is_some() => "number",
        Value::Object(_) => "object",
    }
}

/// `typeof` of an optional argument; absent is `undefined`.
pub fn js_type_of(v: Option<&Value>) -> &'static str {
    v.map(js_type).unwrap_or("undefined")
}

/// String conversion as in template literals.
pub fn js_to_string(v: &Value) -> String {
    if let Some(n) = marshal::as_number(v) {
        return format_number(n);
    }
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_to_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Number(_) | Value::Object(_) => "[object Object]".to_string(),
    }
}
