//! Structured observability hooks for the orchestration lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for lifecycle events: run start and finish,
//!   per-invocation outcomes, store duplicates, and written reports
//!
//! Events are emitted at `info!` (failures and duplicates at `warn!`) with an
//! `event` field so they can be filtered in JSON log pipelines.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::{FailureKind, ResultKey};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("5f0c...");
/// // every event logged now carries run_id = "5f0c..."
/// ```
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

/// The run-scoped span itself, for instrumenting futures that cross await
/// points where an entered guard cannot be held.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("matchbench.run", run_id = %run_id)
}

/// Emit event: orchestration run started.
pub fn emit_run_started(run_id: &str, matchers: usize, test_cases: usize, concurrency: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        matchers = matchers,
        test_cases = test_cases,
        concurrency = concurrency,
    );
}

/// Emit event: orchestration run finished.
pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    succeeded: usize,
    failed: usize,
    skipped: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed = failed,
        skipped = skipped,
    );
}

pub fn emit_invocation_succeeded(key: &ResultKey, runtime_ms: u64, correspondences: usize) {
    info!(
        event = "invocation.succeeded",
        matcher = %key.matcher,
        test_case = %key.test_case,
        runtime_ms = runtime_ms,
        correspondences = correspondences,
    );
}

/// Emit event: invocation failed (warning level).
pub fn emit_invocation_failed(key: &ResultKey, kind: &FailureKind, message: &str) {
    warn!(
        event = "invocation.failed",
        matcher = %key.matcher,
        test_case = %key.test_case,
        kind = %kind,
        message = %message,
    );
}

/// Emit event: pair skipped because a prior result exists.
pub fn emit_invocation_skipped(key: &ResultKey) {
    info!(
        event = "invocation.skipped",
        matcher = %key.matcher,
        test_case = %key.test_case,
    );
}

/// Emit event: a key was inserted twice into a result store.
pub fn emit_store_duplicate(key: &ResultKey, overwritten: bool) {
    warn!(
        event = "store.duplicate",
        matcher = %key.matcher,
        test_case = %key.test_case,
        overwritten = overwritten,
    );
}

/// Emit event: a report file was written.
pub fn emit_cube_written(path: &Path, rows: usize) {
    info!(event = "cube.written", path = %path.display(), rows = rows);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TestCaseId;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_invocation_skipped(&ResultKey::new(TestCaseId::new("t", "c"), "m"));
    }
}
