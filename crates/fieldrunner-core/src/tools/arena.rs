//! Aggregators created by scripts, owned by the host and addressed by handle.

use fieldrunner_stats::{
    Aggregator, Distribution, FieldList, FieldSource, LineFitter, NamedCounterSet, PairedSeries,
    Point, StatTable, NO_LIMIT,
};
use serde_json::{json, Map, Value};

use crate::error::{ToolError, ToolResult};
use crate::marshal::{self, number};

use super::{Aggregation, Args};

/// Index of an aggregator in its run's arena.
pub type Handle = u64;

/// Name of the counter set every run starts with.
pub const GLOBAL_COUNTERS: &str = "GLOBAL";

#[derive(Debug)]
enum Slot {
    Fitter(LineFitter),
    Distribution(Distribution),
    Series(PairedSeries),
    Counters(NamedCounterSet),
}

impl Slot {
    fn footprint(&self) -> usize {
        match self {
            Slot::Fitter(a) => a.footprint(),
            Slot::Distribution(a) => a.footprint(),
            Slot::Series(a) => a.footprint(),
            Slot::Counters(a) => a.footprint(),
        }
    }

    fn aggregator(&mut self) -> &mut dyn Aggregator {
        match self {
            Slot::Fitter(a) => a,
            Slot::Distribution(a) => a,
            Slot::Series(a) => a,
            Slot::Counters(a) => a,
        }
    }
}

/// Registry of one aggregator kind. Registering an existing key replaces the
/// entry in place, so iteration order is first-registration order.
#[derive(Debug, Default)]
struct Registry(Vec<(String, Handle)>);

impl Registry {
    /// Returns the bytes a new entry added.
    fn register(&mut self, key: String, handle: Handle) -> usize {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => {
                entry.1 = handle;
                0
            }
            None => {
                let added = key.len() + std::mem::size_of::<(String, Handle)>();
                self.0.push((key, handle));
                added
            }
        }
    }

    fn get(&self, key: &str) -> Option<Handle> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, h)| *h)
    }

    fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.0.iter().map(|(_, h)| *h)
    }
}

#[derive(Debug)]
pub struct AggregatorArena {
    slots: Vec<Slot>,
    fitters: Registry,
    dists: Registry,
    xys: Registry,
    stats: Registry,
    bytes: usize,
}

impl Default for AggregatorArena {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorArena {
    pub fn new() -> Self {
        let mut arena = Self {
            slots: Vec::new(),
            fitters: Registry::default(),
            dists: Registry::default(),
            xys: Registry::default(),
            stats: Registry::default(),
            bytes: 0,
        };
        let handle = arena.insert(Slot::Counters(NamedCounterSet::empty(false)));
        arena.bytes += arena.stats.register(GLOBAL_COUNTERS.to_string(), handle);
        arena
    }

    fn insert(&mut self, slot: Slot) -> Handle {
        self.bytes += slot.footprint();
        self.slots.push(slot);
        (self.slots.len() - 1) as Handle
    }

    /// Approximate bytes held by every aggregator of the run.
    pub fn footprint(&self) -> usize {
        self.bytes
    }

    fn slot_footprint(&self, id: Handle) -> usize {
        self.slots.get(id as usize).map_or(0, Slot::footprint)
    }

    /// Run `f`, which may only grow or shrink slot `id`, and keep the byte
    /// count current.
    fn measured<R>(&mut self, id: Handle, f: impl FnOnce(&mut Self) -> R) -> R {
        let before = self.slot_footprint(id);
        let out = f(self);
        self.bytes = (self.bytes + self.slot_footprint(id)).saturating_sub(before);
        out
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&mut self, kind: &'static str, id: Handle) -> ToolResult<&mut Slot> {
        self.slots
            .get_mut(id as usize)
            .ok_or(ToolError::UnknownHandle { kind, id })
    }

    fn fitter(&mut self, id: Handle) -> ToolResult<&mut LineFitter> {
        match self.slot("fitter", id)? {
            Slot::Fitter(f) => Ok(f),
            Slot::Series(s) => Ok(s.fitter_mut()),
            _ => Err(ToolError::UnknownHandle { kind: "fitter", id }),
        }
    }

    fn distribution(&mut self, id: Handle) -> ToolResult<&mut Distribution> {
        match self.slot("dist", id)? {
            Slot::Distribution(d) => Ok(d),
            _ => Err(ToolError::UnknownHandle { kind: "dist", id }),
        }
    }

    fn series(&mut self, id: Handle) -> ToolResult<&mut PairedSeries> {
        match self.slot("xy", id)? {
            Slot::Series(s) => Ok(s),
            _ => Err(ToolError::UnknownHandle { kind: "xy", id }),
        }
    }

    fn counters(&mut self, id: Handle) -> ToolResult<&mut NamedCounterSet> {
        match self.slot("stats", id)? {
            Slot::Counters(c) => Ok(c),
            _ => Err(ToolError::UnknownHandle { kind: "stats", id }),
        }
    }

    fn global_id(&self) -> ToolResult<Handle> {
        self.stats.get(GLOBAL_COUNTERS).ok_or(ToolError::UnknownHandle {
            kind: "stats",
            id: 0,
        })
    }

    /// Apply `f` to the counter set currently registered as `GLOBAL`.
    pub fn with_global_counters<R>(
        &mut self,
        f: impl FnOnce(&mut NamedCounterSet) -> ToolResult<R>,
    ) -> ToolResult<R> {
        let id = self.global_id()?;
        self.measured(id, |arena| f(arena.counters(id)?))
    }

    /// Dispatch `<kind>.<method>`; `args[0]` is the handle.
    pub fn call(
        &mut self,
        kind: &str,
        method: &str,
        args: &Args,
        source: &mut dyn FieldSource,
    ) -> ToolResult<Value> {
        let id = args.handle(0)?;
        let args = Args::new(args.rest(1).to_vec());
        self.measured(id, |arena| arena.call_slot(kind, method, id, &args, source))
    }

    fn call_slot(
        &mut self,
        kind: &str,
        method: &str,
        id: Handle,
        args: &Args,
        source: &mut dyn FieldSource,
    ) -> ToolResult<Value> {
        match kind {
            "fitter" => fitter_call(self.fitter(id)?, method, args, source),
            "dist" => {
                let dist = self.distribution(id)?;
                match method {
                    "add" => Ok(number(dist.add(args.number_or_nan(0)))),
                    "addField" => Ok(number(dist.pull(source)?)),
                    "get" => {
                        let snapshot = dist.get();
                        Ok(json!({
                            "labels": snapshot.labels.iter().map(|l| number(*l)).collect::<Vec<_>>(),
                            "data": snapshot.data,
                            "n": snapshot.n,
                        }))
                    }
                    _ => Err(ToolError::UnknownOp(format!("dist.{method}"))),
                }
            }
            "xy" => {
                let series = self.series(id)?;
                match method {
                    "add" => Ok(point_json(
                        series.add(args.number_or_nan(0), args.number_or_nan(1)),
                    )),
                    "addField" => Ok(point_json(series.pull(source)?)),
                    "data" => Ok(Value::Array(
                        series.points().iter().copied().map(point_json).collect(),
                    )),
                    _ => Err(ToolError::UnknownOp(format!("xy.{method}"))),
                }
            }
            "stats" => counters_call(self.counters(id)?, method, args, source),
            _ => Err(ToolError::UnknownOp(format!("{kind}.{method}"))),
        }
    }
}

fn point_json(p: Point) -> Value {
    json!({ "x": number(p.x), "y": number(p.y) })
}

fn fitter_call(
    fitter: &mut LineFitter,
    method: &str,
    args: &Args,
    source: &mut dyn FieldSource,
) -> ToolResult<Value> {
    match method {
        "add" => Ok(point_json(
            fitter.add(args.number_or_nan(0), args.number_or_nan(1)),
        )),
        "addxy" => {
            let xy = args.raw(0).cloned().unwrap_or(Value::Null);
            let coord = |k: &str| xy.get(k).and_then(marshal::as_number).unwrap_or(f64::NAN);
            fitter.add(coord("x"), coord("y"));
            Ok(xy)
        }
        "addField" => Ok(point_json(fitter.pull(source)?)),
        "ab" => {
            let ab = fitter.ab(args.decimals(0), args.decimals(1));
            Ok(json!({ "a": number(ab.a), "b": number(ab.b) }))
        }
        "f" => Ok(number(fitter.f(args.number_or_nan(0)))),
        "limits" => {
            let l = fitter.limits();
            Ok(json!({
                "minX": number(l.min_x),
                "maxX": number(l.max_x),
                "minY": number(l.min_y),
                "maxY": number(l.max_y),
                "n": l.n,
            }))
        }
        "r2" => Ok(number(fitter.r2())),
        "r" => Ok(number(fitter.r())),
        "r2string" => Ok(Value::String(fitter.r2_string(args.decimals(0)))),
        "rstring" => Ok(Value::String(fitter.r_string(args.decimals(0)))),
        "line" => {
            let [p1, p2] = fitter.line(args.decimals(0), args.decimals(1));
            Ok(json!([point_json(p1), point_json(p2)]))
        }
        _ => Err(ToolError::UnknownOp(format!("fitter.{method}"))),
    }
}

/// Name → stat object, in counter creation order.
pub fn counters_data(set: &NamedCounterSet) -> Value {
    let mut out = Map::new();
    for (name, s) in set.data() {
        out.insert(
            name,
            json!({
                "n": number(s.n),
                "sum": number(s.sum),
                "avg": number(s.avg),
                "min": number(s.min),
                "max": number(s.max),
                "sd": number(s.sd),
            }),
        );
    }
    Value::Object(out)
}

fn table_json(table: StatTable) -> Value {
    let matrix: Vec<Value> = table
        .matrix
        .into_iter()
        .map(|row| {
            let mut cells = vec![Value::String(row.label)];
            cells.extend(row.values.into_iter().map(number));
            Value::Array(cells)
        })
        .collect();
    json!({ "headers": table.headers, "matrix": matrix })
}

/// Calls shared by `stats.*` handles and the `gtools` GLOBAL helpers.
pub fn counters_call(
    set: &mut NamedCounterSet,
    method: &str,
    args: &Args,
    source: &mut dyn FieldSource,
) -> ToolResult<Value> {
    match method {
        "addField" => {
            set.add_field(source)?;
            Ok(Value::Null)
        }
        "addValue" => {
            let name = args.field_name(0)?;
            let max = args.number_default(2, NO_LIMIT)?;
            set.add_value(name, args.number_or_nan(1), max);
            Ok(Value::Null)
        }
        "addData" => {
            let name = args.field_name(0)?;
            let max = args.number_default(3, NO_LIMIT)?;
            set.add_data(source, name, args.number_or_nan(1), args.number_or_nan(2), max)?;
            Ok(Value::Null)
        }
        "addOf" => {
            let specs = args.field_specs(0)?;
            set.add_of(source, &specs)?;
            Ok(Value::Null)
        }
        "getData" => Ok(counters_data(set)),
        "getForTable" => {
            let headers = args.field_list(0)?;
            Ok(table_json(set.table(&headers, args.decimals_or(1, 2))))
        }
        "getForGraph" => {
            let fields = args.field_list(0)?;
            let item = args.string_default(1, "avg")?;
            let series = set.series(Some(&fields), &item, args.decimals_or(2, 2))?;
            Ok(json!({
                "labels": series.labels,
                "data": series.data.into_iter().map(number).collect::<Vec<_>>(),
            }))
        }
        _ => Err(ToolError::UnknownOp(format!("stats.{method}"))),
    }
}

impl Aggregation for AggregatorArena {
    fn create_fitter(&mut self, x_name: &str, y_name: &str, autoadd: bool) -> Handle {
        let fitter = LineFitter::new(x_name, y_name, autoadd);
        let key = fitter.key();
        let handle = self.insert(Slot::Fitter(fitter));
        self.bytes += self.fitters.register(key, handle);
        handle
    }

    fn create_distribution(
        &mut self,
        field: &str,
        start: f64,
        end: f64,
        step: f64,
        autoadd: bool,
    ) -> ToolResult<Handle> {
        let dist = Distribution::new(field, start, end, step, autoadd)?;
        let handle = self.insert(Slot::Distribution(dist));
        if !field.is_empty() {
            self.bytes += self.dists.register(field.to_string(), handle);
        }
        Ok(handle)
    }

    fn create_xy(&mut self, x_name: &str, y_name: &str, autoadd: bool) -> Handle {
        let series = PairedSeries::new(x_name, y_name, autoadd);
        let key = series.key();
        let handle = self.insert(Slot::Series(series));
        self.bytes += self.xys.register(key, handle);
        handle
    }

    fn create_stat_counter(
        &mut self,
        name: &str,
        fields: &FieldList,
        autoadd: bool,
    ) -> ToolResult<Handle> {
        let set = NamedCounterSet::new(fields, autoadd)?;
        let handle = self.insert(Slot::Counters(set));
        self.bytes += self.stats.register(name.to_string(), handle);
        Ok(handle)
    }

    fn add_to_datas(&mut self, source: &mut dyn FieldSource) -> ToolResult<()> {
        let order: Vec<Handle> = [&self.dists, &self.xys, &self.fitters, &self.stats]
            .into_iter()
            .flat_map(Registry::handles)
            .collect();
        for id in order {
            self.measured(id, |arena| {
                let aggregator = arena.slot("aggregator", id)?.aggregator();
                if aggregator.autoadd() {
                    aggregator.add_field(source)?;
                }
                Ok::<_, ToolError>(())
            })?;
        }
        Ok(())
    }

    fn detach_all(&mut self) {
        for slot in &mut self.slots {
            slot.aggregator().detach();
        }
    }
}
