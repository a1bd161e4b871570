//! The phase state machine of one grading run.
//!
//! [`run`] drives pre, main and post phases against any [`ScriptEngine`];
//! the V8-backed engine lives in [`crate::sandbox`].

use std::sync::OnceLock;

use regex::Regex;

use crate::envelope::{Diagnostic, FatalError, Markup, RunOutcome, RunResult, UserErrors};
use crate::host::ToolHost;

/// Lines the phase wrapper puts before the script's first line.
pub const WRAPPER_LINES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Main,
    Post,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Pre => "preprogram",
            Phase::Main => "program",
            Phase::Post => "postprogram",
        }
    }

    /// Resource name the engine compiles this phase under.
    pub fn script_name(self) -> &'static str {
        match self {
            Phase::Pre => "[grader:preprogram]",
            Phase::Main => "[grader:program]",
            Phase::Post => "[grader:postprogram]",
        }
    }

    /// Source of this phase, if present and non-blank.
    pub fn source(self, markup: &Markup) -> Option<&str> {
        let source = match self {
            Phase::Pre => markup.preprogram.as_deref(),
            Phase::Main => markup.program.as_deref(),
            Phase::Post => markup.postprogram.as_deref(),
        };
        source.filter(|s| !s.trim().is_empty())
    }
}

/// Why a phase stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFault {
    /// The script threw, or failed to compile when `syntax` is set. The
    /// location is relative to the phase source.
    Thrown {
        message: String,
        line: Option<u32>,
        col: Option<u32>,
        syntax: bool,
    },
    /// The watchdog terminated execution.
    Terminated,
    HeapLimit,
    Engine(String),
}

impl EngineFault {
    pub fn thrown(message: impl Into<String>) -> Self {
        EngineFault::Thrown {
            message: message.into(),
            line: None,
            col: None,
            syntax: false,
        }
    }
}

/// What the runner needs from a script engine.
pub trait ScriptEngine {
    /// Compile `source` as the body of `phase`.
    fn prepare(&mut self, phase: Phase, source: &str) -> Result<(), EngineFault>;

    /// Run a prepared phase once. Script exceptions are reported through
    /// [`ToolHost::record_fault`], not as an `Err`.
    fn invoke(&mut self, phase: Phase) -> Result<(), EngineFault>;

    /// Hand script-side end-of-run state (such as `outdata`) to the host.
    fn finish(&mut self) -> Result<(), EngineFault>;

    fn with_host<R>(&mut self, f: impl FnOnce(&mut ToolHost) -> R) -> R;
}

fn stack_location() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[grader:\w+\]:(\d+):(\d+)").expect("stack location pattern is a valid regex")
    })
}

/// First script location in an engine stack trace, as (line, column) of the
/// phase source.
pub fn locate(stack: &str) -> Option<(u32, u32)> {
    let caps = stack_location().captures(stack)?;
    let line: u32 = caps[1].parse().ok()?;
    let col: u32 = caps[2].parse().ok()?;
    Some((line.saturating_sub(WRAPPER_LINES).max(1), col))
}

/// Render `source` with numbered lines starting at `first`: `01: …`.
pub fn number_lines(source: &str, first: usize) -> String {
    let mut out = String::new();
    for (i, line) in source.split('\n').enumerate() {
        let n = i + first;
        let pad = if n < 10 { "0" } else { "" };
        out.push_str(&format!("{pad}{n}: {line}\n"));
    }
    out
}

fn fatal_error(phase: Phase, markup: &Markup, fault: &EngineFault) -> Option<FatalError> {
    let EngineFault::Thrown {
        message,
        line,
        col,
        syntax,
    } = fault
    else {
        return None;
    };
    let excerpt = format!(
        "{}:\n{}",
        phase.label(),
        number_lines(phase.source(markup).unwrap_or_default(), 1)
    );
    let location = match (line, col) {
        (Some(l), Some(c)) => Some(format!("({l}:{c})")),
        _ => None,
    };
    let stack_trace = match (syntax, location) {
        (true, Some(location)) => format!("{message} {location}\n{excerpt}"),
        (true, None) => format!("{message}\n{excerpt}"),
        (false, Some(location)) => format!("Index {location}\n{excerpt}"),
        (false, None) => excerpt,
    };
    Some(FatalError {
        msg: message.clone(),
        stack_trace: Some(stack_trace),
    })
}

struct PhaseFailure {
    phase: Phase,
    fault: EngineFault,
}

fn fail(phase: Phase) -> impl FnOnce(EngineFault) -> PhaseFailure {
    move |fault| PhaseFailure { phase, fault }
}

fn invoke<E: ScriptEngine>(engine: &mut E, phase: Phase) -> Result<(), PhaseFailure> {
    engine.invoke(phase).map_err(fail(phase))?;
    match engine.with_host(ToolHost::take_fault) {
        Some(fault) => Err(PhaseFailure { phase, fault }),
        None => Ok(()),
    }
}

fn global_phase<E: ScriptEngine>(
    engine: &mut E,
    markup: &Markup,
    phase: Phase,
    output: &mut String,
) -> Result<(), PhaseFailure> {
    engine.with_host(ToolHost::begin_global);
    let ran = match phase.source(markup) {
        Some(source) => engine
            .prepare(phase, source)
            .map_err(fail(phase))
            .and_then(|()| invoke(engine, phase)),
        None => Ok(()),
    };
    output.push_str(&engine.with_host(ToolHost::end_global));
    ran
}

fn run_phases<E: ScriptEngine>(
    engine: &mut E,
    markup: &Markup,
    output: &mut String,
) -> Result<RunResult, PhaseFailure> {
    global_phase(engine, markup, Phase::Pre, output)?;

    let mut result = RunResult::default();
    let students = engine.with_host(|h| h.record_count());
    let program = Phase::Main.source(markup);
    if let (Some(source), true) = (program, students > 0) {
        engine.prepare(Phase::Main, source).map_err(fail(Phase::Main))?;
    }

    for index in 0..students {
        engine.with_host(|h| h.begin_student(index));
        if markup.autoadd() {
            engine
                .with_host(ToolHost::autoadd)
                .map_err(|e| fail(Phase::Main)(EngineFault::thrown(e.to_string())))?;
        }
        if program.is_some() {
            invoke(engine, Phase::Main)?;
        }
        if let Some(done) = engine.with_host(ToolHost::finish_student) {
            output.push_str(&done.output);
            if !done.diagnostics.is_empty() {
                result.errors.push(UserErrors {
                    user: done.user_name,
                    errors: done.diagnostics,
                });
            }
            result.res.push(done.delta);
        }
    }

    global_phase(engine, markup, Phase::Post, output)?;

    let (global_errors, first_user) = engine.with_host(|h| {
        (
            h.take_global_diagnostics(),
            h.first_user_name().unwrap_or_default().to_string(),
        )
    });
    if !global_errors.is_empty() {
        result.errors.push(UserErrors {
            user: first_user,
            errors: global_errors,
        });
    }
    if !result.errors.is_empty() {
        result.errors.push(UserErrors {
            user: "program".into(),
            errors: vec![Diagnostic {
                msg: "See program".into(),
                stack_trace: Some(format!(
                    "\nprogram:\n{}",
                    number_lines(program.unwrap_or_default(), 1)
                )),
            }],
        });
    }

    engine.finish().map_err(fail(Phase::Post))?;
    engine.with_host(ToolHost::detach_all);
    result.outdata = engine.with_host(|h| h.outdata().clone());
    Ok(result)
}

/// Run every phase of the host's markup.
///
/// Script exceptions become [`RunOutcome::Fatal`]; termination, heap and
/// engine faults are returned as `Err` since they carry nothing a script
/// author should see.
pub fn run<E: ScriptEngine>(engine: &mut E) -> Result<RunOutcome, EngineFault> {
    let markup = engine.with_host(|h| h.markup().clone());
    let mut output = String::new();
    match run_phases(engine, &markup, &mut output) {
        Ok(mut result) => {
            result.output = output;
            Ok(RunOutcome::Completed(result))
        }
        Err(PhaseFailure { phase, fault }) => match fatal_error(phase, &markup, &fault) {
            Some(fatal) => {
                engine.with_host(ToolHost::detach_all);
                Ok(RunOutcome::Fatal { fatal, output })
            }
            None => Err(fault),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::envelope::{AliasTable, RunnerInput, StudentRecord, User, ENVELOPE_VERSION};
    use serde_json::{json, Value};

    type Script = Box<dyn FnMut(&mut ToolHost) -> Result<(), EngineFault>>;

    /// Engine whose phases are Rust closures calling the host like the
    /// prelude would.
    struct FakeEngine {
        host: ToolHost,
        scripts: HashMap<Phase, Script>,
        syntax_error: Option<Phase>,
        prepared: Vec<Phase>,
    }

    impl FakeEngine {
        fn new(records: Vec<StudentRecord>, markup: Markup) -> Self {
            Self::with_budget(records, markup, usize::MAX)
        }

        fn with_budget(records: Vec<StudentRecord>, markup: Markup, bytes: usize) -> Self {
            Self {
                host: ToolHost::new(RunnerInput {
                    version: ENVELOPE_VERSION,
                    records,
                    current_document_id: "4.".into(),
                    markup,
                    aliases: AliasTable::new(),
                })
                .with_memory_budget(bytes),
                scripts: HashMap::new(),
                syntax_error: None,
                prepared: Vec::new(),
            }
        }

        fn script(
            mut self,
            phase: Phase,
            f: impl FnMut(&mut ToolHost) -> Result<(), EngineFault> + 'static,
        ) -> Self {
            self.scripts.insert(phase, Box::new(f));
            self
        }
    }

    impl ScriptEngine for FakeEngine {
        fn prepare(&mut self, phase: Phase, _source: &str) -> Result<(), EngineFault> {
            if self.syntax_error == Some(phase) {
                return Err(EngineFault::Thrown {
                    message: "Unexpected token ')'".into(),
                    line: Some(2),
                    col: Some(5),
                    syntax: true,
                });
            }
            self.prepared.push(phase);
            Ok(())
        }

        fn invoke(&mut self, phase: Phase) -> Result<(), EngineFault> {
            match self.scripts.get_mut(&phase) {
                Some(script) => script(&mut self.host),
                None => Ok(()),
            }
        }

        fn finish(&mut self) -> Result<(), EngineFault> {
            Ok(())
        }

        fn with_host<R>(&mut self, f: impl FnOnce(&mut ToolHost) -> R) -> R {
            f(&mut self.host)
        }
    }

    fn student(id: i64, name: &str, fields: Value) -> StudentRecord {
        StudentRecord {
            user: User {
                id,
                name: name.into(),
                real_name: name.into(),
            },
            fields: serde_json::from_value(fields).unwrap(),
        }
    }

    fn call(host: &mut ToolHost, op: &str, args: Value) -> Value {
        serde_json::from_str(&host.dispatch(op, &args.to_string())).unwrap()
    }

    fn markup(program: &str) -> Markup {
        Markup {
            program: Some(program.into()),
            ..Default::default()
        }
    }

    fn completed(outcome: RunOutcome) -> RunResult {
        match outcome {
            RunOutcome::Completed(result) => result,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_number_lines_pads_below_ten() {
        assert_eq!(number_lines("a\nb", 1), "01: a\n02: b\n");
        assert_eq!(number_lines("x", 10), "10: x\n");
    }

    #[test]
    fn test_locate_skips_prelude_frames_and_wrapper_line() {
        let stack = "Error: x\n    at call ([fieldrunner:prelude]:5:9)\n    at [grader:program]:3:14";
        assert_eq!(locate(stack), Some((2, 14)));
        assert_eq!(locate("no location"), None);
    }

    #[test]
    fn test_doubling_program_with_one_bad_value() {
        let records = vec![
            student(1, "alice", json!({"4.raw": 3})),
            student(2, "bob", json!({"4.raw": "bad"})),
        ];
        let mut engine = FakeEngine::new(records, markup("tools.setDouble('score', 2 * tools.getDouble('raw', NaN))"))
            .script(Phase::Main, |host| {
                let raw = call(host, "tools.getDouble", json!(["raw", {"$num": "NaN"}]));
                let raw = crate::marshal::as_number(&raw["ok"]).unwrap();
                if !raw.is_nan() {
                    call(host, "tools.setDouble", json!(["score", raw * 2.0]));
                }
                Ok(())
            });
        let result = completed(run(&mut engine).unwrap());

        assert_eq!(result.res.len(), 2);
        assert_eq!(result.res[0].fields["4.score"], json!(6));
        assert!(result.res[1].fields.is_empty());
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].user, "bob");
        assert_eq!(result.errors[0].errors.len(), 1);
        assert_eq!(result.errors[1].user, "program");
        assert_eq!(result.errors[1].errors[0].msg, "See program");
        assert!(result.errors[1].errors[0]
            .stack_trace
            .as_deref()
            .unwrap()
            .starts_with("\nprogram:\n01: tools.setDouble"));
    }

    #[test]
    fn test_empty_program_yields_empty_deltas() {
        let records = vec![student(1, "a", json!({})), student(2, "b", json!({}))];
        let mut engine = FakeEngine::new(records, markup(""));
        let result = completed(run(&mut engine).unwrap());
        assert_eq!(result.res.len(), 2);
        assert!(result.res.iter().all(|d| d.fields.is_empty()));
        assert_eq!(result.output, "");
        assert!(result.errors.is_empty());
        assert!(engine.prepared.is_empty());
    }

    #[test]
    fn test_runtime_fault_stops_batch() {
        let records = vec![student(1, "a", json!({})), student(2, "b", json!({}))];
        let mut seen = 0;
        let mut engine = FakeEngine::new(records, markup("print(1)\nthrow new Error('x')"))
            .script(Phase::Main, move |host| {
                seen += 1;
                call(host, "tools.print", json!([seen]));
                if seen == 2 {
                    host.record_fault(EngineFault::Thrown {
                        message: "x".into(),
                        line: Some(2),
                        col: Some(1),
                        syntax: false,
                    });
                }
                Ok(())
            });
        match run(&mut engine).unwrap() {
            RunOutcome::Fatal { fatal, output } => {
                assert_eq!(fatal.msg, "x");
                assert_eq!(
                    fatal.stack_trace.as_deref(),
                    Some("Index (2:1)\nprogram:\n01: print(1)\n02: throw new Error('x')\n")
                );
                assert_eq!(output, "1\n");
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error_prefixes_parse_message() {
        let mut m = markup("");
        m.preprogram = Some("let x = ;\nfoo())".into());
        let mut engine = FakeEngine::new(vec![student(1, "a", json!({}))], m);
        engine.syntax_error = Some(Phase::Pre);
        match run(&mut engine).unwrap() {
            RunOutcome::Fatal { fatal, output } => {
                assert_eq!(fatal.msg, "Unexpected token ')'");
                assert_eq!(
                    fatal.stack_trace.as_deref(),
                    Some("Unexpected token ')' (2:5)\npreprogram:\n01: let x = ;\n02: foo())\n")
                );
                assert_eq!(output, "");
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn test_termination_is_not_a_script_fatal() {
        let mut engine = FakeEngine::new(vec![student(1, "a", json!({}))], markup("for(;;){}"))
            .script(Phase::Main, |_| Err(EngineFault::Terminated));
        assert_eq!(run(&mut engine), Err(EngineFault::Terminated));
    }

    #[test]
    fn test_host_budget_overrun_is_heap_limit() {
        let records = vec![student(1, "a", json!({})), student(2, "b", json!({}))];
        let mut engine = FakeEngine::with_budget(records, markup("flood"), 64 * 1024)
            .script(Phase::Main, |host| {
                let chunk = "x".repeat(16 * 1024);
                for _ in 0..10 {
                    let reply = call(host, "tools.print", json!([chunk]));
                    if reply.get("err").is_some() {
                        break;
                    }
                }
                Ok(())
            });
        assert_eq!(run(&mut engine), Err(EngineFault::HeapLimit));
    }

    #[test]
    fn test_global_phases_share_output_and_errors() {
        let mut m = markup("x");
        m.preprogram = Some("pre".into());
        m.postprogram = Some("post".into());
        let records = vec![student(1, "first", json!({"4.p": 1})), student(2, "b", json!({"4.p": 2}))];
        let mut engine = FakeEngine::new(records, m)
            .script(Phase::Pre, |host| {
                call(host, "gtools.print", json!(["pre"]));
                call(host, "gtools.createStatCounter", json!(["s", "p"]));
                Ok(())
            })
            .script(Phase::Main, |host| {
                call(host, "tools.setInt", json!(["q", 1]));
                Ok(())
            })
            .script(Phase::Post, |host| {
                let data = call(host, "gtools.getStatData", json!([]));
                assert_eq!(data["ok"], json!({}));
                call(host, "gtools.reportError", json!(["post problem"]));
                let q = call(host, "tools.getInt", json!(["q"]));
                assert_eq!(q["ok"], json!(1));
                Ok(())
            });
        let result = completed(run(&mut engine).unwrap());
        assert_eq!(result.output, "pre\n");
        assert_eq!(result.errors[0].user, "first");
        assert_eq!(result.errors[0].errors[0].msg, "post problem");
        assert_eq!(result.errors[1].user, "program");
        assert_eq!(result.outdata, json!({}));
    }
}
