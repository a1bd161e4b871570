//! Number marshalling across the isolate boundary.
//!
//! JSON has no NaN or Infinity, so those travel as `{"$num": "NaN"}` and the
//! prelude revives them. Integral values are emitted as JSON integers.

use serde_json::{json, Value};

const NUM_TAG: &str = "$num";

// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Encode a number for the script side.
pub fn number(v: f64) -> Value {
    if v.is_nan() {
        json!({ NUM_TAG: "NaN" })
    } else if v.is_infinite() {
        json!({ NUM_TAG: if v > 0.0 { "Infinity" } else { "-Infinity" } })
    } else {
        finite(v)
    }
}

/// Encode a number for storage or a response; non-finite values become
/// `null`, as `JSON.stringify` would write them.
pub fn persisted(v: f64) -> Value {
    if v.is_finite() {
        finite(v)
    } else {
        Value::Null
    }
}

fn finite(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() <= MAX_SAFE_INTEGER {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

/// Decode a number, including tagged non-finite values.
pub fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) if map.len() == 1 => match map.get(NUM_TAG)?.as_str()? {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

/// Replace tagged numbers with their persisted form, recursively.
pub fn to_persisted(v: Value) -> Value {
    if let Some(n) = as_number(&v) {
        return persisted(n);
    }
    match v {
        Value::Array(items) => Value::Array(items.into_iter().map(to_persisted).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, to_persisted(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Approximate heap bytes of a value, nested buffers included.
pub fn approx_bytes(v: &Value) -> usize {
    let nested = match v {
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(approx_bytes).sum(),
        Value::Object(map) => map.iter().map(|(k, v)| k.len() + approx_bytes(v)).sum(),
        _ => 0,
    };
    std::mem::size_of::<Value>() + nested
}

/// Approximate bytes of one `key → value` map entry.
pub fn entry_bytes(key: &str, value: &Value) -> usize {
    std::mem::size_of::<String>() + key.len() + approx_bytes(value)
}
