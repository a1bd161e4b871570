//! Calls available on both `tools` and `gtools`.

use fieldrunner_stats::{js_round, widen_fields};
use serde_json::{json, Value};

use crate::coerce::{is_integer, js_to_string, js_type, js_type_of, parse_float};
use crate::error::{ToolError, ToolResult};
use crate::marshal;

use super::{Args, FacadeState, OutputSink};

/// Record the standard "unusable value" diagnostic and return `default`.
pub fn report_and_default<T>(sink: &mut dyn OutputSink, found: &Value, default: T, shown: &str) -> T {
    sink.report_error(format!(
        "Found value '{}' of type {}, using default value {}",
        js_to_string(found),
        js_type(found),
        shown
    ));
    default
}

/// `getNumber`: `parseFloat`, reporting and returning 0 on failure.
pub fn get_number(sink: &mut dyn OutputSink, text: &Value) -> f64 {
    let r = parse_float(&js_to_string(text));
    if r.is_nan() {
        return report_and_default(sink, text, 0.0, "0");
    }
    r
}

/// Parse `limit,value` lines into pairs. A line without a comma invalidates
/// the whole table.
pub fn create_limit_array(sink: &mut dyn OutputSink, table: &Value) -> Vec<[f64; 2]> {
    let lines: Vec<String> = match table {
        Value::Array(items) => items.iter().map(js_to_string).collect(),
        other => js_to_string(other).split('\n').map(str::to_string).collect(),
    };
    let mut res = Vec::with_capacity(lines.len());
    for line in &lines {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 2 {
            return report_and_default(sink, table, Vec::new(), "");
        }
        let limit = get_number(sink, &Value::String(parts[0].to_string()));
        let value = get_number(sink, &Value::String(parts[1].to_string()));
        res.push([limit, value]);
    }
    res
}

/// Value of the last row whose limit `c` reaches.
pub fn find_last_of(limits: &[[f64; 2]], c: f64, default: f64) -> f64 {
    let mut res = default;
    for [limit, value] in limits {
        if c >= *limit {
            res = *value;
        }
    }
    res
}

/// `r(value, decim)`: round with an integral precision.
pub fn round_value(args: &Args) -> ToolResult<f64> {
    let decimals = args
        .number(1)
        .filter(|d| is_integer(*d))
        .ok_or(ToolError::DecimalsNotInteger)?;
    let value = args
        .number(0)
        .ok_or(ToolError::DefaultType(js_type_of(args.raw(0))))?;
    let mul = 10f64.powf(decimals);
    Ok(js_round(value * mul) / mul)
}

fn limits_from(value: Option<&Value>) -> Vec<[f64; 2]> {
    let Some(Value::Array(rows)) = value else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            let cell = |i: usize| row.get(i).and_then(marshal::as_number).unwrap_or(f64::NAN);
            [cell(0), cell(1)]
        })
        .collect()
}

fn print_parts(args: &Args) -> Vec<String> {
    args.rest(0).iter().map(js_to_string).collect()
}

/// Dispatch a call shared by both facades; `None` if `name` is not one.
pub fn call(state: &mut FacadeState, name: &str, args: &Args) -> Option<ToolResult<Value>> {
    let undefined = Value::String("undefined".into());
    let result = match name {
        "getNumber" => Ok(marshal::number(get_number(
            state,
            args.raw(0).unwrap_or(&undefined),
        ))),
        "createLimitArray" => {
            let rows = create_limit_array(state, args.raw(0).unwrap_or(&undefined));
            Ok(limits_json(&rows))
        }
        "findLastOf" => {
            let limits = limits_from(args.raw(0));
            let c = args.number_or_nan(1);
            args.number_default(2, 0.0)
                .map(|def| marshal::number(find_last_of(&limits, c, def)))
        }
        "findLast" => {
            let limits = create_limit_array(state, args.raw(0).unwrap_or(&undefined));
            let c = args.number_or_nan(1);
            args.number_default(2, 0.0)
                .map(|def| marshal::number(find_last_of(&limits, c, def)))
        }
        "r" | "round" => round_value(args).map(marshal::number),
        "wf" => args
            .field_list(0)
            .and_then(|list| Ok(widen_fields(&list)?))
            .map(|fields| json!(fields)),
        "print" => {
            state.print(&print_parts(args));
            Ok(Value::Null)
        }
        "println" => {
            state.println(&print_parts(args));
            Ok(Value::Null)
        }
        "getOutput" => Ok(Value::String(state.output().to_string())),
        "clearOutput" => {
            state.clear_output();
            Ok(Value::Null)
        }
        "getErrors" => serde_json::to_value(state.errors())
            .map_err(|e| ToolError::MalformedArgs(e.to_string())),
        "reportError" => {
            let msg = args.raw(0).map(js_to_string).unwrap_or_else(|| "undefined".into());
            state.report_error(msg);
            Ok(Value::Null)
        }
        _ => return None,
    };
    Some(result)
}

fn limits_json(rows: &[[f64; 2]]) -> Value {
    Value::Array(
        rows.iter()
            .map(|[l, v]| json!([marshal::number(*l), marshal::number(*v)]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_ok(state: &mut FacadeState, name: &str, args: Value) -> Value {
        let args = Args::parse(&args.to_string()).unwrap();
        call(state, name, &args).unwrap().unwrap()
    }

    #[test]
    fn test_round_requires_integral_decimals() {
        let args = Args::parse("[2.346, 2]").unwrap();
        assert_eq!(round_value(&args), Ok(2.35));
        let args = Args::parse("[2.345, 1.5]").unwrap();
        assert_eq!(round_value(&args), Err(ToolError::DecimalsNotInteger));
        let args = Args::parse("[\"x\", 1]").unwrap();
        assert_eq!(round_value(&args), Err(ToolError::DefaultType("string")));
    }

    #[test]
    fn test_get_number_reports_bad_input() {
        let mut state = FacadeState::new();
        assert_eq!(call_ok(&mut state, "getNumber", json!(["4.5kg"])), json!(4.5));
        assert_eq!(call_ok(&mut state, "getNumber", json!(["abc"])), json!(0));
        assert_eq!(
            state.errors()[0].msg,
            "Found value 'abc' of type string, using default value 0"
        );
    }

    #[test]
    fn test_limit_table_lookup() {
        let mut state = FacadeState::new();
        let table = json!("0,1\n10,2\n20,3");
        assert_eq!(call_ok(&mut state, "findLast", json!([table.clone(), 15])), json!(2));
        assert_eq!(call_ok(&mut state, "findLast", json!([table, -5, 9])), json!(9));
        assert_eq!(
            call_ok(&mut state, "createLimitArray", json!([["5,1", "8,2"]])),
            json!([[5, 1], [8, 2]])
        );
        assert_eq!(call_ok(&mut state, "findLastOf", json!([[[5, 1], [8, 2]], 8])), json!(2));
        assert!(state.errors().is_empty());

        assert_eq!(call_ok(&mut state, "createLimitArray", json!(["nocomma"])), json!([]));
        assert_eq!(state.errors().len(), 1);
    }

    #[test]
    fn test_output_calls() {
        let mut state = FacadeState::new();
        call_ok(&mut state, "print", json!(["a", "{\"b\":1}"]));
        assert_eq!(call_ok(&mut state, "getOutput", json!([])), json!("a {\"b\":1}\n"));
        call_ok(&mut state, "reportError", json!(["bad"]));
        assert_eq!(call_ok(&mut state, "getErrors", json!([])), json!([{"msg": "bad"}]));
        assert_eq!(call_ok(&mut state, "wf", json!(["q(1,2)"])), json!(["q1", "q2"]));
        assert!(call(&mut state, "nope", &Args::default()).is_none());
    }
}
