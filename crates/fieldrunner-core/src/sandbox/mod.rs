//! Sandboxed grading sessions.
//!
//! A [`Sandbox`] validates an [`AnswerRequest`], then runs the whole batch in
//! a fresh V8 isolate on a dedicated thread. Only serialized envelopes cross
//! the thread boundary.

mod engine;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, Instrument};

use crate::config::SandboxConfig;
use crate::envelope::{
    AnswerRequest, AnswerResponse, FatalError, RunOutcome, RunResult, RunnerInput, RunnerOutput,
    ENVELOPE_VERSION,
};
use crate::error::{SessionError, SessionResult};
use crate::fields::document_prefix;
use crate::metrics::METRICS;
use crate::obs;
use crate::runner::{self, EngineFault};

pub use engine::{IsolateEngine, IsolateLimits};

/// Returned when the body is not a well-formed answer request.
pub const MALFORMED_REQUEST: &str = "Invalid input to fieldrunner answer route.";

/// Returned when the task id carries no document id.
pub const MISSING_TASK_ID: &str = "Taskid missing or incorrect format.";

/// Run one serialized [`RunnerInput`] to a serialized [`RunnerOutput`] on the
/// current thread. Blocks until the batch ends or the budget runs out.
pub fn run_isolated(payload: &str, limits: IsolateLimits) -> SessionResult<String> {
    let input: RunnerInput = serde_json::from_str(payload)?;
    if input.version != ENVELOPE_VERSION {
        return Err(SessionError::Engine(format!(
            "runner input version {} (expected {ENVELOPE_VERSION})",
            input.version
        )));
    }
    let fault = |fault: EngineFault| match fault {
        EngineFault::Terminated => SessionError::Timeout {
            timeout_ms: limits.budget.as_millis() as u64,
        },
        EngineFault::HeapLimit => SessionError::HeapLimitExceeded {
            limit_mb: limits.heap_limit_bytes / (1024 * 1024),
        },
        EngineFault::Engine(msg) => SessionError::Engine(msg),
        EngineFault::Thrown { message, .. } => SessionError::Engine(message),
    };
    let mut engine = IsolateEngine::new(input, limits).map_err(fault)?;
    let outcome = runner::run(&mut engine).map_err(fault)?;
    Ok(serde_json::to_string(&RunnerOutput {
        version: ENVELOPE_VERSION,
        outcome,
    })?)
}

/// Entry point for answer requests. Cheap to clone; clones share the
/// concurrency limit.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    permits: Arc<Semaphore>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> SessionResult<Self> {
        config.validate()?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Isolate slots not held by a live sandbox thread.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a request's batch. Waits for a free isolate slot first.
    pub async fn run(&self, request: &AnswerRequest) -> SessionResult<RunResult> {
        let Some(doc_prefix) = document_prefix(&request.task_id) else {
            METRICS.inc_requests_rejected();
            obs::emit_request_rejected("task id without document id");
            return Err(SessionError::InvalidRequest(MISSING_TASK_ID.into()));
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_batch(request, doc_prefix, run_id)
            .instrument(span)
            .await
    }

    async fn run_batch(
        &self,
        request: &AnswerRequest,
        doc_prefix: String,
        run_id: String,
    ) -> SessionResult<RunResult> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SessionError::Engine(e.to_string()))?;

        let timeout_ms = request
            .markup
            .timeout_ms()
            .unwrap_or(self.config.default_timeout_ms);
        let students = request.input.data.len();
        obs::emit_run_started(
            &run_id,
            students,
            timeout_ms,
            &obs::script_digest(&request.markup),
        );
        METRICS.inc_runs_started();
        let started = Instant::now();

        let payload = serde_json::to_string(&RunnerInput {
            version: ENVELOPE_VERSION,
            records: request.input.data.clone(),
            current_document_id: doc_prefix,
            markup: request.markup.clone(),
            aliases: request.input.aliases.clone(),
        })?;
        let limits = IsolateLimits {
            budget: Duration::from_millis(timeout_ms),
            heap_limit_bytes: self.config.heap_limit_bytes(),
        };

        let result = self
            .spawn_isolate(run_id.clone(), payload, limits, permit)
            .await;
        let result = result.and_then(|text| decode_output(&text));
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(RunOutcome::Completed(result)) => {
                METRICS.inc_runs_completed();
                METRICS.add_students_processed(students as u64);
                let diagnostics = result.errors.iter().map(|e| e.errors.len()).sum();
                obs::emit_run_finished(&run_id, duration_ms, "completed", diagnostics);
                Ok(result)
            }
            Ok(RunOutcome::Fatal { fatal, output }) => {
                METRICS.inc_runs_fatal();
                obs::emit_run_finished(&run_id, duration_ms, "fatal", 0);
                Err(SessionError::ScriptFatal { fatal, output })
            }
            Err(e) => {
                match &e {
                    SessionError::Timeout { .. } => METRICS.inc_runs_timed_out(),
                    SessionError::HeapLimitExceeded { .. } => METRICS.inc_heap_exceeded(),
                    _ => {}
                }
                obs::emit_sandbox_failure(&run_id, &e);
                Err(e)
            }
        }
    }

    /// Run the batch on its own OS thread and wait for it, with a backstop
    /// in case the isolate never yields. The thread owns `permit` and releases
    /// it only after the isolate is gone, even if the backstop fired first.
    async fn spawn_isolate(
        &self,
        run_id: String,
        payload: String,
        limits: IsolateLimits,
        permit: OwnedSemaphorePermit,
    ) -> SessionResult<String> {
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name(format!("fieldrunner-{}", &run_id[..8]))
            .spawn(move || {
                let _span = obs::RunSpan::enter(&run_id);
                let result = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(SessionError::from)
                    .and_then(|rt| {
                        let _guard = rt.enter();
                        run_isolated(&payload, limits)
                    });
                drop(permit);
                if tx.send(result).is_err() {
                    debug!("run result dropped: receiver gone");
                }
            })?;

        let backstop = limits.budget + Duration::from_millis(self.config.timeout_grace_ms);
        match tokio::time::timeout(backstop, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Engine("sandbox thread exited without a result".into())),
            Err(_) => Err(SessionError::Timeout {
                timeout_ms: limits.budget.as_millis() as u64,
            }),
        }
    }

    /// Run a request and shape the outcome as a response body.
    pub async fn answer(&self, request: &AnswerRequest) -> AnswerResponse {
        match self.run(request).await {
            Ok(result) => AnswerResponse::saved(result),
            Err(SessionError::InvalidRequest(msg)) => AnswerResponse::rejected(msg),
            Err(SessionError::ScriptFatal { fatal, output }) => AnswerResponse::failed(fatal, output),
            Err(e) => AnswerResponse::failed(FatalError::generic(e.public_message()), String::new()),
        }
    }

    /// [`Sandbox::answer`] for a raw JSON body.
    pub async fn answer_json(&self, body: &str) -> AnswerResponse {
        match serde_json::from_str::<AnswerRequest>(body) {
            Ok(request) => self.answer(&request).await,
            Err(e) => {
                METRICS.inc_requests_rejected();
                obs::emit_request_rejected(&e.to_string());
                AnswerResponse::rejected(MALFORMED_REQUEST)
            }
        }
    }
}

fn decode_output(text: &str) -> SessionResult<RunOutcome> {
    let output: RunnerOutput = serde_json::from_str(text)?;
    if output.version != ENVELOPE_VERSION {
        return Err(SessionError::Engine(format!(
            "runner output version {} (expected {ENVELOPE_VERSION})",
            output.version
        )));
    }
    Ok(output.outcome)
}
