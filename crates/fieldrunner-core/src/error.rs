//! Error types for the sandbox session and the tool facade.

use fieldrunner_stats::StatsError;

use crate::envelope::FatalError;

/// Failures of a whole grading run.
///
/// Only [`SessionError::ScriptFatal`] carries script-authored detail; every
/// other variant is reported to callers as a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("script failed: {}", fatal.msg)]
    ScriptFatal { fatal: FatalError, output: String },

    #[error("Script execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Script exceeded the {limit_mb} MB memory limit")]
    HeapLimitExceeded { limit_mb: usize },

    #[error("script engine error: {0}")]
    Engine(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Message safe to show to a script author.
    pub fn public_message(&self) -> String {
        match self {
            SessionError::InvalidRequest(msg) => msg.clone(),
            SessionError::ScriptFatal { fatal, .. } => fatal.msg.clone(),
            SessionError::Timeout { .. } | SessionError::HeapLimitExceeded { .. } => {
                self.to_string()
            }
            _ => "Unknown error occurred.".to_string(),
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors raised by facade calls. Inside the sandbox these become thrown
/// `Error`s whose message is the `Display` text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("fieldName has unexpected type: {0}")]
    FieldNameType(&'static str),

    #[error("default value has unexpected type: {0}")]
    DefaultType(&'static str),

    #[error("value has unexpected type: {0}")]
    ValueType(&'static str),

    #[error("Parameter 'decim' must be integer.")]
    DecimalsNotInteger,

    #[error("defaultPoints have not been set.")]
    DefaultPointsUnset,

    #[error("gradingScale has not been set.")]
    GradingScaleUnset,

    #[error("points must be number.")]
    PointsNotNumber,

    #[error("points is not integer.")]
    PointsNotInteger,

    #[error("no student record is bound")]
    NoStudent,

    #[error("unknown tool operation: {0}")]
    UnknownOp(String),

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    #[error("malformed tool arguments: {0}")]
    MalformedArgs(String),

    #[error("script state exceeded the memory limit")]
    MemoryExhausted,

    #[error(transparent)]
    Stats(#[from] StatsError),
}

/// Result type for facade calls.
pub type ToolResult<T> = std::result::Result<T, ToolError>;
