//! The run-wide facade (`gtools`).

use fieldrunner_stats::{FieldSource, NO_LIMIT};
use serde_json::{json, Value};

use crate::error::{ToolError, ToolResult};
use crate::marshal;

use super::arena::{counters_call, counters_data};
use super::{common, Aggregation, AggregatorArena, Args, FacadeState};

/// Output, diagnostics and out-of-band payload of the shared facade.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalState {
    pub facade: FacadeState,
    outdata: Value,
    outdata_bytes: usize,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self {
            facade: FacadeState::new(),
            outdata: json!({}),
            outdata_bytes: 0,
        }
    }

    pub fn outdata(&self) -> &Value {
        &self.outdata
    }

    pub fn footprint(&self) -> usize {
        self.facade.footprint() + self.outdata_bytes
    }

    /// Dispatch a `gtools.*` call. Aggregator factories return the new handle.
    pub fn call(
        &mut self,
        name: &str,
        args: &Args,
        arena: &mut AggregatorArena,
        source: &mut dyn FieldSource,
    ) -> ToolResult<Value> {
        if let Some(result) = common::call(&mut self.facade, name, args) {
            return result;
        }
        match name {
            "createFitter" | "createXY" => {
                let x = args.field_name(0)?;
                let y = args.field_name(1)?;
                let autoadd = args.flag(2, true);
                let handle = if name == "createFitter" {
                    arena.create_fitter(x, y, autoadd)
                } else {
                    arena.create_xy(x, y, autoadd)
                };
                Ok(json!(handle))
            }
            "createDistribution" => {
                let field = args.string_default(0, "")?;
                let step = args.number_default(3, 1.0)?;
                let handle = arena.create_distribution(
                    &field,
                    args.number_or_nan(1),
                    args.number_or_nan(2),
                    step,
                    args.flag(4, true),
                )?;
                Ok(json!(handle))
            }
            "createStatCounter" => {
                let counter = args.string_default(0, "")?;
                let fields = args.field_list(1)?;
                let handle = arena.create_stat_counter(&counter, &fields, args.flag(2, true))?;
                Ok(json!(handle))
            }
            "addStatDataValue" => {
                let field = args.field_name(0)?;
                arena.with_global_counters(|set| {
                    set.add_value(field, args.number_or_nan(1), NO_LIMIT);
                    Ok(Value::Null)
                })
            }
            "addStatData" => {
                arena.with_global_counters(|set| counters_call(set, "addData", args, source))
            }
            "addStatDataOf" => {
                arena.with_global_counters(|set| counters_call(set, "addOf", args, source))
            }
            "getStatData" => arena.with_global_counters(|set| Ok(counters_data(set))),
            "setOutdata" => {
                let value = args.raw(0).cloned().unwrap_or_else(|| json!({}));
                self.outdata = marshal::to_persisted(value);
                self.outdata_bytes = marshal::approx_bytes(&self.outdata);
                Ok(Value::Null)
            }
            _ => Err(ToolError::UnknownOp(format!("gtools.{name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{NoRecord, OutputSink};

    fn call(state: &mut GlobalState, arena: &mut AggregatorArena, name: &str, args: Value) -> ToolResult<Value> {
        let args = Args::parse(&args.to_string()).unwrap();
        state.call(name, &args, arena, &mut NoRecord)
    }

    #[test]
    fn test_factories_return_fresh_handles() {
        let mut state = GlobalState::new();
        let mut arena = AggregatorArena::new();
        let a = call(&mut state, &mut arena, "createFitter", json!(["x", "y"])).unwrap();
        let b = call(&mut state, &mut arena, "createDistribution", json!(["x", 0, 10, 2])).unwrap();
        let c = call(&mut state, &mut arena, "createStatCounter", json!(["s", "a;b", false])).unwrap();
        assert_eq!((a, b, c), (json!(1), json!(2), json!(3)));
        assert_eq!(
            call(&mut state, &mut arena, "createDistribution", json!(["x", 0, 10, -1])),
            Err(ToolError::Stats(fieldrunner_stats::StatsError::InvalidStep(-1.0)))
        );
    }

    struct Ones;

    impl FieldSource for Ones {
        fn get_double(&mut self, _name: &str, _default: f64) -> f64 {
            1.0
        }
    }

    #[test]
    fn test_unset_autoadd_argument_defaults_to_true() {
        let mut state = GlobalState::new();
        let mut arena = AggregatorArena::new();
        let f = call(&mut state, &mut arena, "createFitter", json!(["x", "y", null])).unwrap();
        let d = call(&mut state, &mut arena, "createDistribution", json!(["x", 0, 2, 1, null])).unwrap();
        arena.add_to_datas(&mut Ones).unwrap();
        let f = Args::new(vec![f]);
        let limits = arena.call("fitter", "limits", &f, &mut NoRecord).unwrap();
        assert_eq!(limits["n"], json!(1));
        let d = Args::new(vec![d]);
        let got = arena.call("dist", "get", &d, &mut NoRecord).unwrap();
        assert_eq!(got["n"], json!(1));
    }

    #[test]
    fn test_global_counter_helpers() {
        let mut state = GlobalState::new();
        let mut arena = AggregatorArena::new();
        call(&mut state, &mut arena, "addStatDataValue", json!(["q", 4])).unwrap();
        call(&mut state, &mut arena, "addStatDataValue", json!(["q", 6])).unwrap();
        let data = call(&mut state, &mut arena, "getStatData", json!([])).unwrap();
        assert_eq!(data["q"]["avg"], json!(5));
        assert_eq!(
            call(&mut state, &mut arena, "addStatData", json!(["q", 1, 2.5])),
            Err(ToolError::Stats(fieldrunner_stats::StatsError::NonIntegerRange))
        );
    }

    #[test]
    fn test_outdata_is_persisted_form() {
        let mut state = GlobalState::new();
        let mut arena = AggregatorArena::new();
        assert_eq!(state.outdata(), &json!({}));
        call(
            &mut state,
            &mut arena,
            "setOutdata",
            json!([{"k": [1, {"$num": "NaN"}]}]),
        )
        .unwrap();
        assert_eq!(state.outdata(), &json!({"k": [1, null]}));
        assert_eq!(state.footprint(), marshal::approx_bytes(&json!({"k": [1, null]})));
    }

    #[test]
    fn test_shared_calls_use_global_output() {
        let mut state = GlobalState::new();
        let mut arena = AggregatorArena::new();
        call(&mut state, &mut arena, "println", json!(["hi"])).unwrap();
        assert_eq!(state.facade.output(), "hi\n");
        assert!(matches!(
            call(&mut state, &mut arena, "getDouble", json!(["x"])),
            Err(ToolError::UnknownOp(_))
        ));
    }
}
