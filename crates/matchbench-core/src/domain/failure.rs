//! Invocation failures and the per-run failure log.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::result::ResultKey;

/// Why a (matcher, test case) invocation produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The process could not be started. Fatal for the matcher.
    Launch,
    /// The process exceeded its time limit and was terminated.
    Timeout,
    /// The process ended with a non-zero exit code (or a signal: `code = None`).
    NonZeroExit { code: Option<i32> },
    /// The produced artifact could not be interpreted.
    Parse,
    /// An in-process matcher returned an error.
    Matcher,
    /// An in-process matcher or a worker panicked.
    Panicked,
    /// The descriptor cannot be invoked at all.
    Unresolved,
}

impl FailureKind {
    /// Whether this failure disqualifies the matcher for the rest of the run.
    pub fn is_fatal_for_matcher(&self) -> bool {
        matches!(self, FailureKind::Launch | FailureKind::Unresolved)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Launch => "launch",
            FailureKind::Timeout => "timeout",
            FailureKind::NonZeroExit { .. } => "non-zero exit",
            FailureKind::Parse => "parse",
            FailureKind::Matcher => "matcher error",
            FailureKind::Panicked => "panicked",
            FailureKind::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::NonZeroExit { code: Some(code) } => write!(f, "exit code {code}"),
            FailureKind::NonZeroExit { code: None } => write!(f, "killed by signal"),
            other => f.write_str(other.label()),
        }
    }
}

/// A recorded invocation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Last lines the process wrote to stderr.
    #[serde(default)]
    pub stderr_tail: Vec<String>,
    /// Raw artifact text kept for diagnosing parse failures.
    #[serde(default)]
    pub raw_output: Option<String>,
    /// Wall-clock time spent before failing, when it was measured.
    #[serde(default, with = "duration_ms_opt")]
    pub elapsed: Option<Duration>,
}

impl InvocationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stderr_tail: Vec::new(),
            raw_output: None,
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn with_stderr_tail(mut self, tail: Vec<String>) -> Self {
        self.stderr_tail = tail;
        self
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for InvocationFailure {}

mod duration_ms_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Failures recorded during a run, keyed like results. Safe to share
/// between workers.
#[derive(Debug, Default)]
pub struct FailureLog {
    entries: Mutex<BTreeMap<ResultKey, InvocationFailure>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. A later failure for the same key replaces the earlier one.
    pub fn record(&self, key: ResultKey, failure: InvocationFailure) {
        self.lock().insert(key, failure);
    }

    pub fn get(&self, key: &ResultKey) -> Option<InvocationFailure> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &ResultKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy of all entries.
    pub fn entries(&self) -> Vec<(ResultKey, InvocationFailure)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn for_matcher(&self, matcher: &str) -> Vec<(ResultKey, InvocationFailure)> {
        self.lock()
            .iter()
            .filter(|(k, _)| k.matcher == matcher)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ResultKey, InvocationFailure>> {
        // A panicking writer cannot leave a half-inserted entry behind.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_case::TestCaseId;

    fn key(m: &str) -> ResultKey {
        ResultKey::new(TestCaseId::new("t", "c"), m)
    }

    #[test]
    fn fatal_kinds() {
        assert!(FailureKind::Launch.is_fatal_for_matcher());
        assert!(FailureKind::Unresolved.is_fatal_for_matcher());
        assert!(!FailureKind::Timeout.is_fatal_for_matcher());
        assert!(!FailureKind::NonZeroExit { code: Some(1) }.is_fatal_for_matcher());
    }

    #[test]
    fn failure_display() {
        let f = InvocationFailure::new(FailureKind::NonZeroExit { code: Some(3) }, "boom");
        assert_eq!(f.to_string(), "exit code 3: boom");
        assert_eq!(FailureKind::NonZeroExit { code: None }.to_string(), "killed by signal");
    }

    #[test]
    fn failure_serializes_elapsed_as_millis() {
        let f = InvocationFailure::new(FailureKind::Timeout, "too slow")
            .with_elapsed(Duration::from_millis(120));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["elapsed"], serde_json::json!(120));
        assert_eq!(v["kind"]["kind"], serde_json::json!("timeout"));
        let back: InvocationFailure = serde_json::from_value(v).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn log_filters_by_matcher() {
        let log = FailureLog::new();
        log.record(key("a"), InvocationFailure::new(FailureKind::Timeout, "x"));
        log.record(key("b"), InvocationFailure::new(FailureKind::Parse, "y"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.for_matcher("a").len(), 1);
        assert!(log.contains(&key("b")));
        assert_eq!(log.get(&key("b")).unwrap().kind, FailureKind::Parse);
    }
}
