//! Structured lifecycle events for grading runs.
//!
//! - [`run_span`] / [`RunSpan`] tag everything logged during one run
//! - `emit_*` functions log the run lifecycle with an `event` field
//!
//! Script sources are never logged; [`script_digest`] identifies them instead.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::envelope::Markup;

/// Span covering one run. Use with `Instrument` across `.await` points.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("fieldrunner.run", run_id = %run_id)
}

/// RAII guard that enters a run span on the current thread.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// SHA-256 over the three phase sources, hex encoded.
pub fn script_digest(markup: &Markup) -> String {
    let mut hasher = Sha256::new();
    for source in [&markup.preprogram, &markup.program, &markup.postprogram] {
        hasher.update(source.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

pub fn emit_run_started(run_id: &str, students: usize, timeout_ms: u64, digest: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        students = students,
        timeout_ms = timeout_ms,
        script_digest = %digest,
    );
}

/// Emit event: run finished, with `outcome` one of `completed`, `fatal`.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, outcome: &str, diagnostics: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        outcome = %outcome,
        diagnostics = diagnostics,
    );
}

pub fn emit_request_rejected(reason: &str) {
    warn!(event = "request.rejected", reason = %reason);
}

/// Emit event: sandbox-level failure (timeout, heap, engine).
pub fn emit_sandbox_failure(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.sandbox_failure", run_id = %run_id, error = %error);
}
