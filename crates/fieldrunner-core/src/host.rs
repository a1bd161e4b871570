//! Host side of the facade: owns every piece of run state the scripts touch.
//!
//! The prelude forwards each call as `(op, args_json)` and gets back a JSON
//! envelope: `{"ok": value}` or `{"err": message}`, plus `"warn": true` when
//! the call recorded a new diagnostic so the prelude can attach a location.
//!
//! Run state kept here lives outside the isolate heap, so the host enforces
//! its own byte budget. Exceeding it faults the run as a heap-limit failure.

use std::fmt;

use serde_json::{json, Value};

use crate::envelope::{Diagnostic, FieldDelta, Markup, RunnerInput, StudentRecord};
use crate::error::{ToolError, ToolResult};
use crate::fields::FieldResolver;
use crate::runner::{locate, EngineFault};
use crate::tools::{
    Aggregation, AggregatorArena, Args, GlobalState, NoRecord, StudentState, StudentView,
};

/// What one finished student contributes to the run result.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentOutcome {
    pub delta: FieldDelta,
    pub user_name: String,
    pub output: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Callback run once when the host budget is exceeded.
struct ExhaustionHook(Box<dyn Fn()>);

impl fmt::Debug for ExhaustionHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExhaustionHook")
    }
}

#[derive(Debug)]
pub struct ToolHost {
    records: Vec<StudentRecord>,
    resolver: FieldResolver,
    markup: Markup,
    global: GlobalState,
    student: Option<StudentState>,
    arena: AggregatorArena,
    fault: Option<EngineFault>,
    memory_budget: usize,
    // Bytes already handed to the run result (finished output, deltas, diagnostics).
    retired: usize,
    exhausted: bool,
    on_exhausted: Option<ExhaustionHook>,
}

impl ToolHost {
    pub fn new(input: RunnerInput) -> Self {
        Self {
            records: input.records,
            resolver: FieldResolver::new(input.current_document_id, input.aliases),
            markup: input.markup,
            global: GlobalState::new(),
            student: None,
            arena: AggregatorArena::new(),
            fault: None,
            memory_budget: usize::MAX,
            retired: 0,
            exhausted: false,
            on_exhausted: None,
        }
    }

    /// Cap the bytes of run state scripts can make the host hold.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Run `hook` once when the budget is first exceeded.
    pub fn on_memory_exhausted(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_exhausted = Some(ExhaustionHook(Box::new(hook)));
        self
    }

    /// Approximate bytes of run state held on behalf of scripts.
    pub fn footprint(&self) -> usize {
        self.retired
            + self.global.footprint()
            + self.student.as_ref().map_or(0, StudentState::footprint)
            + self.arena.footprint()
    }

    /// Run `f`, counting whatever it moves out of the host as retired.
    fn retiring<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let before = self.footprint();
        let out = f(self);
        self.retired += before.saturating_sub(self.footprint());
        out
    }

    fn check_budget(&mut self) {
        if self.exhausted || self.footprint() <= self.memory_budget {
            return;
        }
        self.exhausted = true;
        tracing::debug!(
            footprint = self.footprint(),
            budget = self.memory_budget,
            "host memory budget exceeded"
        );
        self.record_fault(EngineFault::HeapLimit);
        if let Some(hook) = &self.on_exhausted {
            (hook.0)();
        }
    }

    pub fn markup(&self) -> &Markup {
        &self.markup
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    /// User name of the first record, which global diagnostics are filed under.
    pub fn first_user_name(&self) -> Option<&str> {
        self.records.first().map(|r| r.user.name.as_str())
    }

    /// Bind the facade for a pre/post phase: `tools` there is the global
    /// facade and the first record, if any, is the bound student.
    pub fn begin_global(&mut self) {
        self.student = (!self.records.is_empty()).then(|| StudentState::new(0));
    }

    /// Unbind after a pre/post phase and return the phase's output.
    pub fn end_global(&mut self) -> String {
        self.retiring(|host| {
            let mut output = host.global.facade.take_output();
            if let Some(mut bound) = host.student.take() {
                output.push_str(&bound.facade.take_output());
                host.global
                    .facade
                    .extend_diagnostics(bound.facade.take_diagnostics());
            }
            output
        })
    }

    pub fn begin_student(&mut self, index: usize) {
        self.student = Some(StudentState::new(index));
    }

    /// Feed the bound student into every autoadd aggregator.
    pub fn autoadd(&mut self) -> ToolResult<()> {
        let Self {
            records,
            resolver,
            markup,
            student,
            arena,
            ..
        } = self;
        let state = student.as_mut().ok_or(ToolError::NoStudent)?;
        let record = records
            .get_mut(state.index())
            .ok_or(ToolError::NoStudent)?;
        let mut view = StudentView {
            record,
            resolver,
            markup,
            state,
        };
        arena.add_to_datas(&mut view)
    }

    pub fn finish_student(&mut self) -> Option<StudentOutcome> {
        self.retiring(|host| {
            let mut state = host.student.take()?;
            let user = &host.records.get(state.index())?.user;
            let output = state.facade.take_output();
            let diagnostics = state.facade.take_diagnostics();
            Some(StudentOutcome {
                user_name: user.name.clone(),
                delta: state.into_delta(user.id),
                output,
                diagnostics,
            })
        })
    }

    pub fn take_global_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.retiring(|host| host.global.facade.take_diagnostics())
    }

    pub fn record_fault(&mut self, fault: EngineFault) {
        self.fault.get_or_insert(fault);
    }

    pub fn take_fault(&mut self) -> Option<EngineFault> {
        self.fault.take()
    }

    /// End the run for every aggregator; later field pulls fail.
    pub fn detach_all(&mut self) {
        self.arena.detach_all();
    }

    pub fn outdata(&self) -> &Value {
        self.global.outdata()
    }

    fn diagnostic_count(&self) -> usize {
        self.global.facade.diagnostic_count()
            + self
                .student
                .as_ref()
                .map_or(0, |s| s.facade.diagnostic_count())
    }

    /// Handle one call from the prelude and encode the reply envelope.
    pub fn dispatch(&mut self, op: &str, args_json: &str) -> String {
        if self.exhausted {
            return json!({ "err": ToolError::MemoryExhausted.to_string() }).to_string();
        }
        let before = self.diagnostic_count();
        let result = Args::parse(args_json).and_then(|args| self.call(op, &args));
        self.check_budget();
        let result = if self.exhausted {
            Err(ToolError::MemoryExhausted)
        } else {
            result
        };
        let mut reply = match result {
            Ok(value) => json!({ "ok": value }),
            Err(e) => json!({ "err": e.to_string() }),
        };
        if self.diagnostic_count() > before {
            reply["warn"] = Value::Bool(true);
        }
        tracing::trace!(op, ok = reply.get("ok").is_some(), "tool call");
        reply.to_string()
    }

    fn call(&mut self, op: &str, args: &Args) -> ToolResult<Value> {
        let (namespace, name) = op
            .split_once('.')
            .ok_or_else(|| ToolError::UnknownOp(op.to_string()))?;
        match (namespace, name) {
            ("runner", "fault") => {
                let message = args.raw(0).map(crate::coerce::js_to_string).unwrap_or_default();
                let (line, col) = args
                    .raw(1)
                    .and_then(Value::as_str)
                    .and_then(locate)
                    .map_or((None, None), |(l, c)| (Some(l), Some(c)));
                self.record_fault(EngineFault::Thrown {
                    message,
                    line,
                    col,
                    syntax: false,
                });
                Ok(Value::Null)
            }
            ("diag", "stack") => {
                if let Some((line, col)) = args.raw(0).and_then(Value::as_str).and_then(locate) {
                    let stack = format!("Index ({line}:{col})");
                    self.global.facade.attach_stack(&stack);
                    if let Some(state) = self.student.as_mut() {
                        state.facade.attach_stack(&stack);
                    }
                }
                Ok(Value::Null)
            }
            _ => self.facade_call(namespace, name, args),
        }
    }

    fn facade_call(&mut self, namespace: &str, name: &str, args: &Args) -> ToolResult<Value> {
        let Self {
            records,
            resolver,
            markup,
            global,
            student,
            arena,
            ..
        } = self;
        let mut view = match student.as_mut() {
            Some(state) => records.get_mut(state.index()).map(|record| StudentView {
                record,
                resolver,
                markup,
                state,
            }),
            None => None,
        };
        let mut none = NoRecord;

        match namespace {
            "tools" => match view.as_mut() {
                Some(view) => view.call(name, args),
                None => Err(ToolError::NoStudent),
            },
            "gtools" => match view.as_mut() {
                Some(view) => global.call(name, args, arena, view),
                None => global.call(name, args, arena, &mut none),
            },
            "fitter" | "dist" | "xy" | "stats" => match view.as_mut() {
                Some(view) => arena.call(namespace, name, args, view),
                None => arena.call(namespace, name, args, &mut none),
            },
            _ => Err(ToolError::UnknownOp(format!("{namespace}.{name}"))),
        }
    }
}
