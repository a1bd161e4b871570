//! Sandbox configuration.

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Resource limits for sandboxed runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Wall-clock budget for a whole batch when the markup sets none (milliseconds).
    pub default_timeout_ms: u64,
    /// Heap ceiling of each isolate (megabytes).
    pub memory_limit_mb: usize,
    /// Maximum number of isolates alive at once.
    pub max_concurrent: usize,
    /// Extra time the host waits for the sandbox thread after the budget.
    pub timeout_grace_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 1000,
            memory_limit_mb: 128,
            max_concurrent: 8,
            timeout_grace_ms: 250,
        }
    }
}

impl SandboxConfig {
    /// Defaults overridden by `FIELDRUNNER_*` environment variables.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("FIELDRUNNER_DEFAULT_TIMEOUT_MS") {
            config.default_timeout_ms = v;
        }
        if let Some(v) = env_parse("FIELDRUNNER_MEMORY_LIMIT_MB") {
            config.memory_limit_mb = v;
        }
        if let Some(v) = env_parse("FIELDRUNNER_MAX_CONCURRENT") {
            config.max_concurrent = v;
        }
        if let Some(v) = env_parse("FIELDRUNNER_TIMEOUT_GRACE_MS") {
            config.timeout_grace_ms = v;
        }
        config
    }

    pub fn with_default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    pub fn with_memory_limit_mb(mut self, mb: usize) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_timeout_grace_ms(mut self, ms: u64) -> Self {
        self.timeout_grace_ms = ms;
        self
    }

    pub fn heap_limit_bytes(&self) -> usize {
        self.memory_limit_mb * 1024 * 1024
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "default_timeout_ms must be positive".into(),
            ));
        }
        if self.memory_limit_mb < 8 {
            return Err(SessionError::InvalidConfig(format!(
                "memory_limit_mb must be at least 8, got {}",
                self.memory_limit_mb
            )));
        }
        if self.max_concurrent == 0 {
            return Err(SessionError::InvalidConfig(
                "max_concurrent must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
