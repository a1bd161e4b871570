//! The per-student facade (`tools` in the main phase).

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use fieldrunner_stats::{format_number, integral_range, widen_fields, FieldSource, NO_LIMIT};
use serde_json::Value;

use crate::coerce::{is_integer, js_to_string, js_type, parse_decimal, parse_int};
use crate::envelope::{FieldDelta, FieldMap, Markup, StudentRecord};
use crate::error::{ToolError, ToolResult};
use crate::fields::FieldResolver;
use crate::marshal;

use super::common::{self, report_and_default};
use super::{Args, FacadeState, FieldAccess, OutputSink, SET_DOUBLE_FLOOR, SET_INT_FLOOR};

/// State of the facade bound to one record.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentState {
    index: usize,
    pub facade: FacadeState,
    result: FieldMap,
    // Net bytes written into the result and the record.
    written: usize,
}

/// Insert into `map` and return `total` adjusted by the entry's size change.
fn insert_weighed(map: &mut FieldMap, total: usize, key: String, value: Value) -> usize {
    let added = marshal::entry_bytes(&key, &value);
    let removed = map
        .get(&key)
        .map_or(0, |old| marshal::entry_bytes(&key, old));
    map.insert(key, value);
    (total + added).saturating_sub(removed)
}

impl StudentState {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            facade: FacadeState::new(),
            result: FieldMap::new(),
            written: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes this student's output, diagnostics and writes added to the run.
    pub fn footprint(&self) -> usize {
        self.facade.footprint() + self.written
    }

    fn put_result(&mut self, key: String, value: Value) {
        self.written = insert_weighed(&mut self.result, self.written, key, value);
    }

    pub fn into_delta(self, user: i64) -> FieldDelta {
        FieldDelta {
            user,
            fields: self.result,
        }
    }
}

/// A student facade borrowed together with its record.
pub struct StudentView<'a> {
    pub record: &'a mut StudentRecord,
    pub resolver: &'a FieldResolver,
    pub markup: &'a Markup,
    pub state: &'a mut StudentState,
}

/// Field source used when no record is bound; every read yields the default.
pub struct NoRecord;

impl FieldSource for NoRecord {
    fn get_double(&mut self, _name: &str, default: f64) -> f64 {
        default
    }
}

/// A number or numeric string (comma decimals allowed); anything else errors.
fn number_like(content: &Value) -> ToolResult<f64> {
    if let Some(n) = marshal::as_number(content) {
        return Ok(n);
    }
    match content {
        Value::String(s) => {
            let v = parse_decimal(s);
            if v.is_nan() {
                Err(ToolError::ValueType("string"))
            } else {
                Ok(v)
            }
        }
        other => Err(ToolError::ValueType(js_type(other))),
    }
}

/// Parse a timestamp to epoch seconds; times without a zone are UTC.
pub fn define_time(text: &str) -> f64 {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return dt.timestamp_millis() as f64 / 1000.0;
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return naive.and_utc().timestamp_millis() as f64 / 1000.0;
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp() as f64)
        .unwrap_or(f64::NAN)
}

impl StudentView<'_> {
    fn read(&self, field: &str) -> Option<&Value> {
        self.record
            .fields
            .get(&self.resolver.resolve_for_read(field))
            .filter(|v| !v.is_null())
    }

    fn write(&mut self, key: String, value: Value) {
        self.state.put_result(key.clone(), value.clone());
        self.put_record(key, value);
    }

    fn put_record(&mut self, key: String, value: Value) {
        self.state.written =
            insert_weighed(&mut self.record.fields, self.state.written, key, value);
    }

    fn clear(&mut self, field: &str, key: String) {
        let empty = Value::String(String::new());
        if self.get_value(field).is_some_and(|v| v != empty) {
            self.write(key, empty);
        } else {
            self.put_record(key, empty);
        }
    }

    pub fn user_name(&self) -> &str {
        &self.record.user.name
    }

    pub fn real_name(&self) -> &str {
        &self.record.user.real_name
    }

    pub fn default_points(&self) -> ToolResult<f64> {
        match self.markup.default_points {
            Some(p) if p != 0.0 && !p.is_nan() => Ok(p),
            _ => Err(ToolError::DefaultPointsUnset),
        }
    }

    /// The best grade whose threshold `points` reaches, else the fail grade.
    pub fn grade(&self, points: f64) -> ToolResult<String> {
        let scale = self
            .markup
            .grading_scale
            .as_ref()
            .ok_or(ToolError::GradingScaleUnset)?;
        // Stable, so tied thresholds keep scale order.
        let mut thresholds: Vec<(&str, f64)> = scale.iter().collect();
        thresholds.sort_by(|a, b| b.1.total_cmp(&a.1));
        let grade = thresholds
            .into_iter()
            .find(|(_, required)| points >= *required)
            .map(|(g, _)| g.to_string())
            .unwrap_or_else(|| self.markup.fail_grade.clone().unwrap_or_default());
        Ok(grade)
    }

    /// Write the grade and the integral credit points into the result only.
    pub fn save_grade(&mut self, grade: Value, points: Option<&Value>) -> ToolResult<()> {
        let grade_key = self.resolver.resolve_for_write(self.markup.grade_field());
        self.state
            .put_result(grade_key, marshal::to_persisted(grade));

        let credit_key = self.resolver.resolve_for_write(self.markup.credit_field());
        let credit = match points {
            Some(p) => Some(number_like(p)?),
            None => self.markup.default_points,
        };
        let credit = match credit {
            Some(p) if !is_integer(p) => return Err(ToolError::PointsNotInteger),
            Some(p) => p,
            None => 0.0,
        };
        self.state.put_result(credit_key, marshal::persisted(credit));
        Ok(())
    }

    /// Sum `field{start}` … `field{end}`, each capped at `max`.
    pub fn sum_range(
        &mut self,
        field: &str,
        start: f64,
        end: f64,
        default: f64,
        max: f64,
    ) -> ToolResult<f64> {
        let (start, end) = integral_range(start, end)?;
        let mut sum = 0.0;
        for i in start..=end {
            sum += FieldAccess::get_double(self, &format!("{field}{i}"), default).min(max);
        }
        Ok(sum)
    }

    /// Sum every field the specs widen to. Display aliases are dropped.
    pub fn sum_of(&mut self, specs: &fieldrunner_stats::FieldList) -> ToolResult<f64> {
        let mut sum = 0.0;
        for spec in widen_fields(specs)? {
            let name = spec.split('=').next().unwrap_or_default().trim().to_string();
            sum += FieldAccess::get_double(self, &name, 0.0).min(NO_LIMIT);
        }
        Ok(sum)
    }

    /// Dispatch a `tools.*` call.
    pub fn call(&mut self, name: &str, args: &Args) -> ToolResult<Value> {
        if let Some(result) = common::call(&mut self.state.facade, name, args) {
            return result;
        }
        match name {
            "getRealName" => Ok(Value::String(self.real_name().to_string())),
            "getUserName" => Ok(Value::String(self.user_name().to_string())),
            "getDouble" | "getDateTime" => {
                let field = args.field_name(0)?;
                let fallback = if name == "getDouble" { 0.0 } else { f64::NAN };
                let default = args.number_default(1, fallback)?;
                Ok(marshal::number(FieldAccess::get_double(self, field, default)))
            }
            "getInt" => {
                let field = args.field_name(0)?;
                let default = args.int_default(1, 0.0)?;
                Ok(marshal::number(self.get_int(field, default)))
            }
            "getString" => {
                let field = args.field_name(0)?;
                let default = args.string_default(1, "")?;
                Ok(Value::String(self.get_string(field, &default)))
            }
            "getValue" => {
                let field = args.field_name(0)?;
                let default = args.raw(1).cloned().unwrap_or(Value::String(String::new()));
                Ok(self.get_value(field).unwrap_or(default))
            }
            "getSum" => {
                let field = args.field_name(0)?;
                let default = args.number_default(3, 0.0)?;
                let max = args.number_default(4, NO_LIMIT)?;
                let (start, end) = (args.number_or_nan(1), args.number_or_nan(2));
                self.sum_range(field, start, end, default, max).map(marshal::number)
            }
            "getSumOf" => {
                let specs = args.field_specs(0)?;
                self.sum_of(&specs).map(marshal::number)
            }
            "setString" => {
                let field = args.field_name(0)?;
                self.set_string(field, args.raw(1).unwrap_or(&Value::Null))?;
                Ok(Value::Null)
            }
            "setInt" | "setDouble" => {
                let field = args.field_name(0)?;
                let content = args.raw(1).unwrap_or(&Value::Null);
                if name == "setInt" {
                    let floor = args.number_default(2, SET_INT_FLOOR)?;
                    self.set_int(field, content, floor)?;
                } else {
                    let floor = args.number_default(2, SET_DOUBLE_FLOOR)?;
                    self.set_double(field, content, floor)?;
                }
                Ok(Value::Null)
            }
            "getDefaultPoints" => self.default_points().map(marshal::number),
            "getGrade" => {
                let points = args
                    .raw(0)
                    .and_then(marshal::as_number)
                    .ok_or(ToolError::PointsNotNumber)?;
                self.grade(points).map(Value::String)
            }
            "saveGrade" => {
                let grade = args.raw(0).cloned().unwrap_or(Value::Null);
                self.save_grade(grade, args.raw(1).filter(|v| !v.is_null()))?;
                Ok(Value::Null)
            }
            "defineTime" => {
                let text = args.string(0)?;
                Ok(marshal::number(define_time(text)))
            }
            _ => Err(ToolError::UnknownOp(format!("tools.{name}"))),
        }
    }
}

impl FieldAccess for StudentView<'_> {
    fn get_double(&mut self, field: &str, default: f64) -> f64 {
        let Some(raw) = self.read(field).cloned() else {
            return default;
        };
        let shown = format_number(default);
        match &raw {
            Value::Number(n) => n.as_f64().unwrap_or(default),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return default;
                }
                let v = parse_decimal(trimmed);
                if v.is_nan() {
                    report_and_default(&mut self.state.facade, &raw, default, &shown)
                } else {
                    v
                }
            }
            other => report_and_default(&mut self.state.facade, other, default, &shown),
        }
    }

    fn get_int(&mut self, field: &str, default: f64) -> f64 {
        let Some(raw) = self.read(field).cloned() else {
            return default;
        };
        let shown = format_number(default);
        match &raw {
            Value::Number(n) => match n.as_f64() {
                Some(v) if is_integer(v) => v,
                _ => report_and_default(&mut self.state.facade, &raw, default, &shown),
            },
            Value::String(s) if s.trim().is_empty() => default,
            Value::String(s) => {
                let v = parse_int(s);
                if v.is_nan() {
                    report_and_default(&mut self.state.facade, &raw, default, &shown)
                } else {
                    v
                }
            }
            other => report_and_default(&mut self.state.facade, other, default, &shown),
        }
    }

    fn get_string(&mut self, field: &str, default: &str) -> String {
        match self.read(field) {
            Some(v) => js_to_string(v),
            None => default.to_string(),
        }
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.read(field).cloned()
    }

    fn set_string(&mut self, field: &str, content: &Value) -> ToolResult<()> {
        let text = match content {
            Value::String(s) => s.clone(),
            other => match marshal::as_number(other) {
                Some(n) => format_number(n),
                None => return Err(ToolError::ValueType(js_type(other))),
            },
        };
        let key = self.resolver.resolve_for_write(field);
        self.write(key, Value::String(text));
        Ok(())
    }

    fn set_int(&mut self, field: &str, content: &Value, floor: f64) -> ToolResult<()> {
        let v = number_like(content)?;
        let key = self.resolver.resolve_for_write(field);
        if !is_integer(v) {
            return Err(ToolError::ValueType(js_type(content)));
        }
        if v <= floor {
            self.clear(field, key);
            return Ok(());
        }
        self.write(key, marshal::persisted(v));
        Ok(())
    }

    fn set_double(&mut self, field: &str, content: &Value, floor: f64) -> ToolResult<()> {
        let v = number_like(content)?;
        let key = self.resolver.resolve_for_write(field);
        if v <= floor {
            self.clear(field, key);
            return Ok(());
        }
        self.write(key, marshal::persisted(v));
        Ok(())
    }
}

impl FieldSource for StudentView<'_> {
    fn get_double(&mut self, name: &str, default: f64) -> f64 {
        FieldAccess::get_double(self, name, default)
    }
}
