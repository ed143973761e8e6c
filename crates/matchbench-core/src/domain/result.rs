//! Execution results: what one matcher produced for one test case.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::codec::AlignmentCodec;

use super::alignment::Alignment;
use super::error::CodecError;
use super::matcher::MatcherDescriptor;
use super::test_case::{TestCase, TestCaseId};

/// (test case, matcher name). Unique within a result store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey {
    pub test_case: TestCaseId,
    pub matcher: String,
}

impl ResultKey {
    pub fn new(test_case: TestCaseId, matcher: impl Into<String>) -> Self {
        Self {
            test_case,
            matcher: matcher.into(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.matcher, self.test_case)
    }
}

enum Source {
    Produced,
    Artifact {
        path: PathBuf,
        codec: Arc<dyn AlignmentCodec>,
    },
}

/// The alignment a matcher produced for a test case, with its run time.
///
/// Results loaded from disk keep only the artifact path and parse it on first
/// access to [`ExecutionResult::alignment`].
pub struct ExecutionResult {
    test_case: Arc<TestCase>,
    matcher_name: String,
    runtime: Duration,
    matcher: Option<MatcherDescriptor>,
    source: Source,
    alignment: OnceLock<Alignment>,
}

impl ExecutionResult {
    pub fn new(
        test_case: Arc<TestCase>,
        matcher_name: impl Into<String>,
        alignment: Alignment,
        runtime: Duration,
        matcher: Option<MatcherDescriptor>,
    ) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(alignment);
        Self {
            test_case,
            matcher_name: matcher_name.into(),
            runtime,
            matcher,
            source: Source::Produced,
            alignment: cell,
        }
    }

    /// Result backed by a persisted artifact, parsed lazily.
    pub fn from_artifact(
        test_case: Arc<TestCase>,
        matcher_name: impl Into<String>,
        path: PathBuf,
        runtime: Duration,
        codec: Arc<dyn AlignmentCodec>,
    ) -> Self {
        Self {
            test_case,
            matcher_name: matcher_name.into(),
            runtime,
            matcher: None,
            source: Source::Artifact { path, codec },
            alignment: OnceLock::new(),
        }
    }

    pub fn key(&self) -> ResultKey {
        ResultKey::new(self.test_case.id.clone(), self.matcher_name.clone())
    }

    pub fn test_case(&self) -> &Arc<TestCase> {
        &self.test_case
    }

    pub fn matcher_name(&self) -> &str {
        &self.matcher_name
    }

    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    /// The descriptor that produced this result; `None` for loaded results.
    pub fn matcher(&self) -> Option<&MatcherDescriptor> {
        self.matcher.as_ref()
    }

    /// Path of the persisted artifact, if this result was loaded from disk.
    pub fn artifact_path(&self) -> Option<&Path> {
        match &self.source {
            Source::Produced => None,
            Source::Artifact { path, .. } => Some(path),
        }
    }

    /// The produced alignment, parsing the artifact on first access.
    pub fn alignment(&self) -> Result<&Alignment, CodecError> {
        if let Some(alignment) = self.alignment.get() {
            return Ok(alignment);
        }
        let parsed = match &self.source {
            Source::Artifact { path, codec } => codec.read(path)?,
            Source::Produced => Alignment::new(),
        };
        Ok(self.alignment.get_or_init(|| parsed))
    }
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("test_case", &self.test_case.id)
            .field("matcher", &self.matcher_name)
            .field("runtime", &self.runtime)
            .field("artifact", &self.artifact_path())
            .field("parsed", &self.alignment.get().is_some())
            .finish()
    }
}
