//! V8 isolate backing [`ScriptEngine`].
//!
//! One isolate per run, with a heap ceiling and a watchdog thread that
//! terminates execution once the run's time budget is spent. The host's own
//! byte budget terminates the isolate the same way the heap ceiling does.
//! The prelude is the only code with access to the host op; it removes `Deno`
//! before any script runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use deno_core::{extension, op2, v8, JsRuntime, OpState, RuntimeOptions};

use crate::envelope::RunnerInput;
use crate::host::ToolHost;
use crate::runner::{locate, EngineFault, Phase, ScriptEngine};

const PRELUDE: &str = include_str!("../../js/prelude.js");

#[op2]
#[string]
fn op_fieldrunner_call(state: &mut OpState, #[string] op: String, #[string] args: String) -> String {
    state.borrow_mut::<ToolHost>().dispatch(&op, &args)
}

extension!(fieldrunner_ext, ops = [op_fieldrunner_call]);

/// Resource ceilings of one isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolateLimits {
    pub budget: Duration,
    pub heap_limit_bytes: usize,
}

/// Terminates the isolate when the budget runs out. Dropping it cancels the
/// timer and joins the thread, so it must drop before the runtime does.
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(handle: v8::IsolateHandle, budget: Duration) -> std::io::Result<Self> {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("fieldrunner-watchdog".into())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = cancelled.recv_timeout(budget) {
                    flag.store(true, Ordering::SeqCst);
                    handle.terminate_execution();
                }
            })?;
        Ok(Self {
            cancel: Some(cancel),
            thread: Some(thread),
            fired,
        })
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct IsolateEngine {
    // Declared first so it is dropped (and joined) before the runtime.
    watchdog: Watchdog,
    heap_exhausted: Arc<AtomicBool>,
    runtime: JsRuntime,
}

impl IsolateEngine {
    /// Create the isolate, install the host and run the prelude. The time
    /// budget starts now.
    pub fn new(input: RunnerInput, limits: IsolateLimits) -> Result<Self, EngineFault> {
        let create_params = v8::CreateParams::default().heap_limits(0, limits.heap_limit_bytes);
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![fieldrunner_ext::init()],
            create_params: Some(create_params),
            ..Default::default()
        });
        let heap_exhausted = Arc::new(AtomicBool::new(false));

        // Host-side run state counts against the same ceiling as the heap.
        let flag = heap_exhausted.clone();
        let handle = runtime.v8_isolate().thread_safe_handle();
        let host = ToolHost::new(input)
            .with_memory_budget(limits.heap_limit_bytes)
            .on_memory_exhausted(move || {
                flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            });
        runtime.op_state().borrow_mut().put(host);

        let flag = heap_exhausted.clone();
        let handle = runtime.v8_isolate().thread_safe_handle();
        runtime.add_near_heap_limit_callback(move |current, _initial| {
            if !flag.swap(true, Ordering::SeqCst) {
                handle.terminate_execution();
            }
            // Headroom for the termination to unwind; large allocations may
            // still be in flight when it is requested.
            current * 2
        });

        let watchdog = Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), limits.budget)
            .map_err(|e| EngineFault::Engine(format!("failed to start watchdog: {e}")))?;

        let mut engine = Self {
            watchdog,
            heap_exhausted,
            runtime,
        };
        engine.execute("[fieldrunner:prelude]", PRELUDE.to_string())?;
        Ok(engine)
    }

    fn execute(&mut self, name: &'static str, code: String) -> Result<(), EngineFault> {
        match self.runtime.execute_script(name, code) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify(&e.to_string())),
        }
    }

    /// Map an engine error to a fault. Resource faults win over whatever
    /// exception the termination surfaced as.
    fn classify(&self, error: &str) -> EngineFault {
        if self.heap_exhausted.load(Ordering::SeqCst) {
            return EngineFault::HeapLimit;
        }
        if self.watchdog.fired() {
            return EngineFault::Terminated;
        }
        if error.contains("SyntaxError") {
            let first = error.lines().next().unwrap_or_default();
            let message = first
                .trim_start_matches("Uncaught ")
                .trim_start_matches("SyntaxError: ")
                .to_string();
            let location = locate(error);
            return EngineFault::Thrown {
                message,
                line: location.map(|(l, _)| l),
                col: location.map(|(_, c)| c),
                syntax: true,
            };
        }
        EngineFault::Engine(error.to_string())
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl ScriptEngine for IsolateEngine {
    fn prepare(&mut self, phase: Phase, source: &str) -> Result<(), EngineFault> {
        let wrapper = format!(
            "__grader.define({}, function (tools, gtools) {{\n{}\n}});",
            js_string(phase.label()),
            source
        );
        self.execute(phase.script_name(), wrapper)
    }

    fn invoke(&mut self, phase: Phase) -> Result<(), EngineFault> {
        self.execute(
            "[fieldrunner:invoke]",
            format!("__grader.invoke({});", js_string(phase.label())),
        )
    }

    fn finish(&mut self) -> Result<(), EngineFault> {
        self.execute("[fieldrunner:finish]", "__grader.finish();".to_string())
    }

    fn with_host<R>(&mut self, f: impl FnOnce(&mut ToolHost) -> R) -> R {
        let state = self.runtime.op_state();
        let mut state = state.borrow_mut();
        f(state.borrow_mut::<ToolHost>())
    }
}
