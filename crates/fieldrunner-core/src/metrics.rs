//! Process-wide run counters.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits them all as
//! one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_fatal: AtomicU64,
    runs_timed_out: AtomicU64,
    heap_exceeded: AtomicU64,
    students_processed: AtomicU64,
    requests_rejected: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_fatal: AtomicU64::new(0),
            runs_timed_out: AtomicU64::new(0),
            heap_exceeded: AtomicU64::new(0),
            students_processed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", "counter incremented");
    }

    /// A run that ended in a script-authored fatal error.
    pub fn inc_runs_fatal(&self) {
        self.runs_fatal.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_fatal", "counter incremented");
    }

    pub fn inc_runs_timed_out(&self) {
        self.runs_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_timed_out", "counter incremented");
    }

    pub fn inc_heap_exceeded(&self) {
        self.heap_exceeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "heap_exceeded", "counter incremented");
    }

    pub fn add_students_processed(&self, n: u64) {
        self.students_processed.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "students_processed", n, "counter incremented");
    }

    pub fn inc_requests_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "requests_rejected", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_completed = self.runs_completed(),
            runs_fatal = self.runs_fatal(),
            runs_timed_out = self.runs_timed_out(),
            heap_exceeded = self.heap_exceeded(),
            students_processed = self.students_processed(),
            requests_rejected = self.requests_rejected(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_fatal(&self) -> u64 {
        self.runs_fatal.load(Ordering::Relaxed)
    }

    pub fn runs_timed_out(&self) -> u64 {
        self.runs_timed_out.load(Ordering::Relaxed)
    }

    pub fn heap_exceeded(&self) -> u64 {
        self.heap_exceeded.load(Ordering::Relaxed)
    }

    pub fn students_processed(&self) -> u64 {
        self.students_processed.load(Ordering::Relaxed)
    }

    pub fn requests_rejected(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_completed,
            &self.runs_fatal,
            &self.runs_timed_out,
            &self.heap_exceeded,
            &self.students_processed,
            &self.requests_rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
