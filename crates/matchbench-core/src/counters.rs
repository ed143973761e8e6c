//! Global atomic counters for matchbench runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Counters::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters singleton.
pub static COUNTERS: Counters = Counters::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Counters {
    invocations_started: AtomicU64,
    invocations_succeeded: AtomicU64,
    invocations_failed: AtomicU64,
    invocations_skipped: AtomicU64,
    results_loaded: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            invocations_started: AtomicU64::new(0),
            invocations_succeeded: AtomicU64::new(0),
            invocations_failed: AtomicU64::new(0),
            invocations_skipped: AtomicU64::new(0),
            results_loaded: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.invocations_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "invocations_started", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.invocations_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "invocations_succeeded", "counter incremented");
    }

    pub fn inc_failed(&self) {
        self.invocations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "invocations_failed", "counter incremented");
    }

    pub fn inc_skipped(&self) {
        self.invocations_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "invocations_skipped", "counter incremented");
    }

    /// Add `n` results loaded from a persisted store.
    pub fn add_loaded(&self, n: u64) {
        self.results_loaded.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "results_loaded", n = n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, end of an evaluation)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            invocations_started = self.started(),
            invocations_succeeded = self.succeeded(),
            invocations_failed = self.failed(),
            invocations_skipped = self.skipped(),
            results_loaded = self.loaded(),
        );
    }

    pub fn started(&self) -> u64 {
        self.invocations_started.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.invocations_succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.invocations_failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.invocations_skipped.load(Ordering::Relaxed)
    }

    pub fn loaded(&self) -> u64 {
        self.results_loaded.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.invocations_started.store(0, Ordering::Relaxed);
        self.invocations_succeeded.store(0, Ordering::Relaxed);
        self.invocations_failed.store(0, Ordering::Relaxed);
        self.invocations_skipped.store(0, Ordering::Relaxed);
        self.results_loaded.store(0, Ordering::Relaxed);
    }
}
