//! fieldrunner core library
//!
//! Runs teacher-authored grading scripts against a batch of student records
//! inside a V8 isolate and collects the field changes, printed output and
//! diagnostics they produce.
//!
//! Entry point is [`Sandbox`]; [`runner::run`] is the engine-independent
//! phase loop it drives.

pub mod coerce;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fields;
pub mod host;
pub mod marshal;
pub mod metrics;
pub mod obs;
pub mod runner;
pub mod sandbox;
pub mod telemetry;
pub mod tools;

pub use config::SandboxConfig;
pub use envelope::{
    AliasTable, AnswerInput, AnswerRequest, AnswerResponse, Diagnostic, FatalError, FieldDelta,
    FieldMap, GradingScale, Markup, RunOutcome, RunResult, RunnerInput, RunnerOutput,
    StudentRecord, User, UserErrors, ENVELOPE_VERSION,
};
pub use error::{SessionError, SessionResult, ToolError, ToolResult};
pub use fields::FieldResolver;
pub use host::ToolHost;
pub use runner::{EngineFault, Phase, ScriptEngine};
pub use sandbox::{run_isolated, IsolateEngine, IsolateLimits, Sandbox};
pub use telemetry::init_tracing;

/// fieldrunner-core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
