//! Orchestration: every matcher against every test case.

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use matchbench_core::counters::COUNTERS;
use matchbench_core::domain::{
    ExecutionResult, FailureKind, FailureLog, InvocationFailure, MatcherDescriptor, ResultKey,
    TestCase,
};
use matchbench_core::{obs, AlignmentCodec, HarnessConfig, ResultStore, StoreError};

use crate::invoker::{panic_message, MatcherInvoker};
use crate::tempdir::SystemTempDirs;

/// Outcome of [`ExecutionOrchestrator::run_all`].
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub store: Arc<ResultStore>,
    pub failures: Arc<FailureLog>,
    /// Every (test case, matcher) pair that was requested.
    pub requested: Vec<ResultKey>,
    /// Pairs for which a matcher was actually invoked.
    pub invoked: usize,
    /// Pairs skipped because the store already held a result.
    pub skipped: usize,
    /// Results produced in this run and inserted into the store.
    pub succeeded: usize,
    /// Results produced in this run that the store refused because another
    /// writer had stored the same key first. The store's result stands.
    pub rejected: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl RunReport {
    /// Requested pairs with neither a result nor a recorded failure.
    pub fn unaccounted(&self) -> Vec<ResultKey> {
        self.requested
            .iter()
            .filter(|k| !self.store.contains(k) && !self.failures.contains(k))
            .cloned()
            .collect()
    }

    /// Requested pairs with both a result and a recorded failure.
    pub fn conflicting(&self) -> Vec<ResultKey> {
        self.requested
            .iter()
            .filter(|k| self.store.contains(k) && self.failures.contains(k))
            .cloned()
            .collect()
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs the cross product of matchers and test cases on a bounded worker pool.
pub struct ExecutionOrchestrator {
    invoker: Arc<MatcherInvoker>,
    concurrency: usize,
}

impl ExecutionOrchestrator {
    pub fn new(invoker: MatcherInvoker) -> Self {
        Self {
            invoker: Arc::new(invoker),
            concurrency: 1,
        }
    }

    /// Orchestrator wired from a harness configuration.
    pub fn from_config(config: &HarnessConfig, codec: Arc<dyn AlignmentCodec>) -> Self {
        let temp_dirs = Arc::new(SystemTempDirs::new(config.temp_root.clone()));
        let invoker =
            MatcherInvoker::new(temp_dirs, codec).with_stderr_tail_lines(config.stderr_tail_lines);
        Self::new(invoker).with_concurrency(config.concurrency)
    }

    /// Worker pool size; values below 1 are treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Attempt every (matcher, test case) pair not already in `store`.
    ///
    /// Results go into `store`; failures into the returned report. A matcher
    /// whose descriptor does not validate fails all its pending pairs without
    /// being run, and a launch failure stops the remaining pairs of that
    /// matcher from being invoked. Nothing a single pair does aborts the run.
    pub async fn run_all(
        &self,
        test_cases: &[Arc<TestCase>],
        matchers: &[MatcherDescriptor],
        store: Arc<ResultStore>,
    ) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_all_inner(run_id, test_cases, matchers, store)
            .instrument(span)
            .await
    }

    async fn run_all_inner(
        &self,
        run_id: String,
        test_cases: &[Arc<TestCase>],
        matchers: &[MatcherDescriptor],
        store: Arc<ResultStore>,
    ) -> RunReport {
        let start = Instant::now();
        let matchers = unique_by_name(matchers);
        let test_cases = unique_by_id(test_cases);
        obs::emit_run_started(&run_id, matchers.len(), test_cases.len(), self.concurrency);

        let failures = Arc::new(FailureLog::new());
        let broken: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let tally = Arc::new(Tally::default());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut requested = Vec::new();
        let mut skipped = 0;

        for descriptor in matchers {
            let resolved = descriptor.validate();
            for &tc in &test_cases {
                let key = ResultKey::new(tc.id.clone(), descriptor.name.clone());
                requested.push(key.clone());

                if store.contains(&key) {
                    skipped += 1;
                    COUNTERS.inc_skipped();
                    obs::emit_invocation_skipped(&key);
                    continue;
                }
                if let Err(e) = &resolved {
                    let failure = InvocationFailure::new(FailureKind::Unresolved, e.to_string());
                    record_failure(&failures, key, failure);
                    continue;
                }

                let job = Job {
                    key,
                    test_case: Arc::clone(tc),
                    descriptor: descriptor.clone(),
                    invoker: Arc::clone(&self.invoker),
                    store: Arc::clone(&store),
                    failures: Arc::clone(&failures),
                    broken: Arc::clone(&broken),
                    tally: Arc::clone(&tally),
                };
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(
                    async move {
                        // The semaphore is never closed.
                        let _permit = semaphore.acquire_owned().await.ok();
                        job.run().await;
                    }
                    .in_current_span(),
                );
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                // Jobs catch their own panics; only cancellation lands here.
                error!(error = %e, "orchestration task did not complete");
            }
        }

        let requested_set: BTreeSet<&ResultKey> = requested.iter().collect();
        let failed = failures
            .entries()
            .iter()
            .filter(|(k, _)| requested_set.contains(k))
            .count();
        let succeeded = tally.succeeded.load(Ordering::Relaxed);
        let duration = start.elapsed();
        obs::emit_run_finished(
            &run_id,
            duration.as_millis() as u64,
            succeeded,
            failed,
            skipped,
        );

        RunReport {
            run_id,
            store,
            failures,
            invoked: tally.invoked.load(Ordering::Relaxed),
            requested,
            skipped,
            succeeded,
            rejected: tally.rejected.load(Ordering::Relaxed),
            failed,
            duration,
        }
    }
}

/// First descriptor wins when names repeat.
fn unique_by_name(matchers: &[MatcherDescriptor]) -> Vec<&MatcherDescriptor> {
    let mut seen = HashSet::new();
    matchers
        .iter()
        .filter(|d| {
            let fresh = seen.insert(d.name.as_str());
            if !fresh {
                warn!(matcher = %d.name, "ignoring duplicate matcher name");
            }
            fresh
        })
        .collect()
}

/// First test case wins when ids repeat.
fn unique_by_id(test_cases: &[Arc<TestCase>]) -> Vec<&Arc<TestCase>> {
    let mut seen = HashSet::new();
    test_cases
        .iter()
        .filter(|tc| {
            let fresh = seen.insert(&tc.id);
            if !fresh {
                warn!(test_case = %tc.id, "ignoring duplicate test case");
            }
            fresh
        })
        .collect()
}

/// Per-run outcome counts shared by the workers.
#[derive(Debug, Default)]
struct Tally {
    invoked: AtomicUsize,
    succeeded: AtomicUsize,
    rejected: AtomicUsize,
}

fn record_failure(failures: &FailureLog, key: ResultKey, failure: InvocationFailure) {
    COUNTERS.inc_failed();
    obs::emit_invocation_failed(&key, &failure.kind, &failure.message);
    failures.record(key, failure);
}

/// One pending pair and the shared state it reports into.
struct Job {
    key: ResultKey,
    test_case: Arc<TestCase>,
    descriptor: MatcherDescriptor,
    invoker: Arc<MatcherInvoker>,
    store: Arc<ResultStore>,
    failures: Arc<FailureLog>,
    broken: Arc<Mutex<HashSet<String>>>,
    tally: Arc<Tally>,
}

impl Job {
    async fn run(self) {
        let key = self.key.clone();
        let failures = Arc::clone(&self.failures);
        if let Err(panic) = AssertUnwindSafe(self.execute()).catch_unwind().await {
            let failure = InvocationFailure::new(FailureKind::Panicked, panic_message(panic.as_ref()));
            record_failure(&failures, key, failure);
        }
    }

    async fn execute(self) {
        if self.is_broken() {
            let failure = InvocationFailure::new(
                FailureKind::Launch,
                "not invoked: matcher failed to launch earlier in this run",
            );
            record_failure(&self.failures, self.key, failure);
            return;
        }

        COUNTERS.inc_started();
        self.tally.invoked.fetch_add(1, Ordering::Relaxed);

        match self.invoker.invoke(&self.descriptor, &self.test_case).await {
            Ok(produced) => {
                let correspondences = produced.alignment.len();
                let result = ExecutionResult::new(
                    Arc::clone(&self.test_case),
                    self.descriptor.name.clone(),
                    produced.alignment,
                    produced.elapsed,
                    Some(self.descriptor.clone()),
                );
                match self.store.insert(result) {
                    Ok(_) => {
                        self.tally.succeeded.fetch_add(1, Ordering::Relaxed);
                        COUNTERS.inc_succeeded();
                        obs::emit_invocation_succeeded(
                            &self.key,
                            produced.elapsed.as_millis() as u64,
                            correspondences,
                        );
                    }
                    Err(StoreError::DuplicateKey(_)) => {
                        self.tally.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %self.key, correspondences, "store kept an earlier result, new result discarded");
                    }
                    Err(e) => {
                        let failure = InvocationFailure::new(
                            FailureKind::Matcher,
                            format!("result could not be stored: {e}"),
                        )
                        .with_elapsed(produced.elapsed);
                        record_failure(&self.failures, self.key, failure);
                    }
                }
            }
            Err(failure) => {
                if failure.kind.is_fatal_for_matcher() {
                    self.mark_broken();
                }
                record_failure(&self.failures, self.key, failure);
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
            .lock()
            .map(|set| set.contains(&self.descriptor.name))
            .unwrap_or_else(|poisoned| poisoned.into_inner().contains(&self.descriptor.name))
    }

    fn mark_broken(&self) {
        let mut set = self.broken.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.insert(self.descriptor.name.clone());
    }
}
