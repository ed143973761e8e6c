//! Ground-truth collaborator: the reference alignment for a test case.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::AlignmentCodec;
use crate::domain::{Alignment, CodecError, Completeness, TestCase, TestCaseId};

/// Reference correspondences plus how complete they claim to be.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub alignment: Alignment,
    pub completeness: Completeness,
}

impl GroundTruth {
    pub fn complete(alignment: Alignment) -> Self {
        Self {
            alignment,
            completeness: Completeness::Complete,
        }
    }

    pub fn partial(alignment: Alignment) -> Self {
        Self {
            alignment,
            completeness: Completeness::partial(),
        }
    }
}

/// Supplies ground truth per test case. `Ok(None)` means the test case has no
/// reference and is excluded from scoring.
pub trait GroundTruthProvider: Send + Sync {
    fn ground_truth(&self, test_case: &TestCase) -> Result<Option<GroundTruth>, CodecError>;
}

/// Reads `TestCase::reference` through an artifact codec.
pub struct CodecGroundTruth {
    codec: Arc<dyn AlignmentCodec>,
}

impl CodecGroundTruth {
    pub fn new(codec: Arc<dyn AlignmentCodec>) -> Self {
        Self { codec }
    }
}

impl GroundTruthProvider for CodecGroundTruth {
    fn ground_truth(&self, test_case: &TestCase) -> Result<Option<GroundTruth>, CodecError> {
        let Some(location) = &test_case.reference else {
            return Ok(None);
        };
        let alignment = self.codec.read_location(location)?;
        Ok(Some(GroundTruth {
            alignment,
            completeness: test_case.completeness,
        }))
    }
}

/// Ground truth held in memory, keyed by test case. Mostly for tests and
/// programmatic use.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGroundTruth {
    entries: BTreeMap<TestCaseId, GroundTruth>,
}

impl InMemoryGroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TestCaseId, truth: GroundTruth) {
        self.entries.insert(id, truth);
    }

    pub fn with(mut self, id: TestCaseId, truth: GroundTruth) -> Self {
        self.insert(id, truth);
        self
    }
}

impl GroundTruthProvider for InMemoryGroundTruth {
    fn ground_truth(&self, test_case: &TestCase) -> Result<Option<GroundTruth>, CodecError> {
        Ok(self.entries.get(&test_case.id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::domain::Correspondence;

    #[test]
    fn codec_provider_reads_reference_with_completeness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.json");
        let reference = Alignment::new().with(Correspondence::new("A", "B"));
        JsonCodec.write(&path, &reference).unwrap();

        let case = TestCase::new("t", "c", "s", "t")
            .with_reference(path.display().to_string(), Completeness::partial());
        let provider = CodecGroundTruth::new(Arc::new(JsonCodec));
        let truth = provider.ground_truth(&case).unwrap().unwrap();
        assert_eq!(truth.alignment, reference);
        assert_eq!(truth.completeness, Completeness::partial());
    }

    #[test]
    fn no_reference_means_no_ground_truth() {
        let case = TestCase::new("t", "c", "s", "t");
        let provider = CodecGroundTruth::new(Arc::new(JsonCodec));
        assert!(provider.ground_truth(&case).unwrap().is_none());
    }

    #[test]
    fn in_memory_provider_is_keyed_by_test_case() {
        let case = TestCase::new("t", "c", "s", "t");
        let provider = InMemoryGroundTruth::new().with(
            case.id.clone(),
            GroundTruth::complete(Alignment::new().with(Correspondence::new("A", "B"))),
        );
        assert!(provider.ground_truth(&case).unwrap().is_some());
        let other = TestCase::new("t", "other", "s", "t");
        assert!(provider.ground_truth(&other).unwrap().is_none());
    }
}
