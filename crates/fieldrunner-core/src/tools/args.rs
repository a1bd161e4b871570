//! Positional arguments of one facade call.
//!
//! The prelude sends arguments as a JSON array. `undefined` inside the array
//! arrives as `null`, so optional parameters treat `null` as absent.

use fieldrunner_stats::FieldList;
use serde_json::Value;

use crate::coerce::{is_integer, js_type_of};
use crate::error::{ToolError, ToolResult};
use crate::marshal;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn parse(json: &str) -> ToolResult<Self> {
        match serde_json::from_str(json) {
            Ok(Value::Array(values)) => Ok(Self(values)),
            Ok(_) => Err(ToolError::MalformedArgs("expected an array".into())),
            Err(e) => Err(ToolError::MalformedArgs(e.to_string())),
        }
    }

    pub fn raw(&self, i: usize) -> Option<&Value> {
        self.0.get(i)
    }

    fn present(&self, i: usize) -> Option<&Value> {
        self.0.get(i).filter(|v| !v.is_null())
    }

    pub fn rest(&self, from: usize) -> &[Value] {
        self.0.get(from..).unwrap_or_default()
    }

    pub fn field_name(&self, i: usize) -> ToolResult<&str> {
        match self.raw(i) {
            Some(Value::String(s)) => Ok(s),
            other => Err(ToolError::FieldNameType(js_type_of(other))),
        }
    }

    /// Any string argument; other types are a value error.
    pub fn string(&self, i: usize) -> ToolResult<&str> {
        match self.raw(i) {
            Some(Value::String(s)) => Ok(s),
            other => Err(ToolError::ValueType(js_type_of(other))),
        }
    }

    pub fn number_default(&self, i: usize, default: f64) -> ToolResult<f64> {
        match self.present(i) {
            None => Ok(default),
            Some(v) => marshal::as_number(v).ok_or(ToolError::DefaultType(js_type_of(Some(v)))),
        }
    }

    pub fn int_default(&self, i: usize, default: f64) -> ToolResult<f64> {
        let v = self.number_default(i, default)?;
        if is_integer(v) {
            Ok(v)
        } else {
            Err(ToolError::DefaultType("number"))
        }
    }

    pub fn string_default(&self, i: usize, default: &str) -> ToolResult<String> {
        match self.present(i) {
            None => Ok(default.to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(v) => Err(ToolError::DefaultType(js_type_of(Some(v)))),
        }
    }

    /// A numeric argument; anything else (or nothing) is NaN.
    pub fn number_or_nan(&self, i: usize) -> f64 {
        self.raw(i).and_then(marshal::as_number).unwrap_or(f64::NAN)
    }

    /// A number that must be present and finite-or-not, as `start`/`end` bounds.
    pub fn number(&self, i: usize) -> Option<f64> {
        self.raw(i).and_then(marshal::as_number)
    }

    /// Rounding precision; absent or NaN means no rounding.
    pub fn decimals(&self, i: usize) -> Option<i32> {
        self.present(i)
            .and_then(marshal::as_number)
            .filter(|d| d.is_finite())
            .map(|d| d as i32)
    }

    /// Like [`Args::decimals`], but absent means `default`.
    pub fn decimals_or(&self, i: usize, default: i32) -> Option<i32> {
        match self.present(i) {
            None => Some(default),
            Some(_) => self.decimals(i),
        }
    }

    /// JS truthiness, with `default` when absent.
    pub fn flag(&self, i: usize, default: bool) -> bool {
        match self.present(i) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(v) => match marshal::as_number(v) {
                Some(n) => n != 0.0 && !n.is_nan(),
                None => true,
            },
        }
    }

    pub fn handle(&self, i: usize) -> ToolResult<u64> {
        self.raw(i)
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::MalformedArgs(format!("argument {i} is not a handle")))
    }

    /// A `;`-separated string or an array of strings; absent is empty.
    pub fn field_list(&self, i: usize) -> ToolResult<FieldList> {
        match self.present(i) {
            None => Ok(FieldList::Joined(String::new())),
            Some(v) => to_field_list(v),
        }
    }

    /// Every argument from `from` on, each a string or array of strings.
    pub fn field_specs(&self, from: usize) -> ToolResult<FieldList> {
        let mut specs = Vec::new();
        for v in self.rest(from) {
            match to_field_list(v)? {
                FieldList::Joined(s) => specs.push(s),
                FieldList::List(items) => specs.extend(items),
            }
        }
        Ok(FieldList::List(specs))
    }
}

fn to_field_list(v: &Value) -> ToolResult<FieldList> {
    match v {
        Value::String(s) => Ok(FieldList::Joined(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ToolError::FieldNameType(js_type_of(Some(other)))),
            })
            .collect::<ToolResult<Vec<_>>>()
            .map(FieldList::List),
        other => Err(ToolError::FieldNameType(js_type_of(Some(other)))),
    }
}
