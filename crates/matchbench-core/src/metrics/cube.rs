//! The performance cube: matcher × test case × track.
//!
//! Every requested (test case, matcher) pair gets exactly one [`Cell`].
//! Absent results, failures and missing references are explicit cell states,
//! never zero counts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{CoreError, FailureKind, FailureLog, ResultKey, TestCase, TestCaseId};
use crate::ground_truth::{GroundTruth, GroundTruthProvider};
use crate::store::ResultStore;

use super::confusion::{compare_with, ConfusionCounts};

/// State of one (test case, matcher) pair in the cube.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Cell {
    Scored(ConfusionCounts),
    /// The matcher was never run, or ran without leaving a result or failure.
    NoResult,
    Failed { kind: FailureKind },
    /// The matcher produced `produced` correspondences but there is no
    /// reference to score them against.
    NoGroundTruth { produced: usize },
}

impl Cell {
    pub fn counts(&self) -> Option<&ConfusionCounts> {
        match self {
            Cell::Scored(counts) => Some(counts),
            _ => None,
        }
    }

    /// Text used in place of numbers in reports.
    pub fn marker(&self) -> Option<String> {
        match self {
            Cell::Scored(_) => None,
            Cell::NoResult => Some("No result".to_string()),
            Cell::Failed { kind } => Some(format!("Failed: {}", kind.label())),
            Cell::NoGroundTruth { .. } => Some("No ground truth".to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.marker()) {
            (Cell::Scored(c), _) => write!(
                f,
                "P={:.3} R={:.3} F={:.3}",
                c.precision(),
                c.recall(),
                c.f_measure()
            ),
            (_, Some(marker)) => f.write_str(&marker),
            (_, None) => Ok(()),
        }
    }
}

/// Roll-up of cells for one matcher over a set of test cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Summed counts over scored cells.
    pub micro: ConfusionCounts,
    /// Mean precision over scored cells.
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f_measure: f64,
    pub scored: usize,
    pub no_result: usize,
    pub failed: usize,
    pub no_ground_truth: usize,
}

impl Summary {
    fn from_cells<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Self {
        let mut summary = Summary::default();
        let (mut p, mut r, mut f) = (0.0, 0.0, 0.0);
        for cell in cells {
            match cell {
                Cell::Scored(c) => {
                    summary.micro += *c;
                    summary.scored += 1;
                    p += c.precision();
                    r += c.recall();
                    f += c.f_measure();
                }
                Cell::NoResult => summary.no_result += 1,
                Cell::Failed { .. } => summary.failed += 1,
                Cell::NoGroundTruth { .. } => summary.no_ground_truth += 1,
            }
        }
        if summary.scored > 0 {
            let n = summary.scored as f64;
            summary.macro_precision = p / n;
            summary.macro_recall = r / n;
            summary.macro_f_measure = f / n;
        }
        summary
    }
}

#[derive(Debug, Clone)]
pub struct Cube {
    test_cases: Vec<Arc<TestCase>>,
    matchers: Vec<String>,
    cells: BTreeMap<ResultKey, Cell>,
}

impl Cube {
    /// Score every (test case, matcher) pair.
    ///
    /// Must run over a finished store; it takes no locks beyond the store's
    /// own read access. Each reference is loaded once.
    pub fn build(
        test_cases: &[Arc<TestCase>],
        matchers: &[String],
        store: &ResultStore,
        failures: Option<&FailureLog>,
        truth: &dyn GroundTruthProvider,
    ) -> Result<Self, CoreError> {
        let mut sorted_cases: Vec<Arc<TestCase>> = test_cases.to_vec();
        sorted_cases.sort_by(|a, b| a.id.cmp(&b.id));
        sorted_cases.dedup_by(|a, b| a.id == b.id);
        let matchers: Vec<String> = matchers
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut cells = BTreeMap::new();
        for tc in &sorted_cases {
            let reference: Option<GroundTruth> = truth.ground_truth(tc)?;
            if reference.is_none() {
                debug!(test_case = %tc.id, "no ground truth, excluded from scoring");
            }
            for matcher in &matchers {
                let key = ResultKey::new(tc.id.clone(), matcher.clone());
                let cell = score_pair(&key, store, failures, reference.as_ref());
                cells.insert(key, cell);
            }
        }

        Ok(Self {
            test_cases: sorted_cases,
            matchers,
            cells,
        })
    }

    /// Build over a finished run: the requested test cases plus any the store
    /// holds, crossed with every matcher that has a result or a recorded
    /// failure. A test case on which every matcher failed still gets its row.
    pub fn from_store(
        requested: &[Arc<TestCase>],
        store: &ResultStore,
        failures: Option<&FailureLog>,
        truth: &dyn GroundTruthProvider,
    ) -> Result<Self, CoreError> {
        let mut matchers: BTreeSet<String> = store.matcher_names().into_iter().collect();
        if let Some(log) = failures {
            matchers.extend(log.entries().into_iter().map(|(k, _)| k.matcher));
        }
        let matchers: Vec<String> = matchers.into_iter().collect();
        let mut test_cases = requested.to_vec();
        test_cases.extend(store.test_cases());
        if let Some(log) = failures {
            let known: BTreeSet<&TestCaseId> = test_cases.iter().map(|tc| &tc.id).collect();
            let orphans: BTreeSet<TestCaseId> = log
                .entries()
                .into_iter()
                .map(|(k, _)| k.test_case)
                .filter(|id| !known.contains(id))
                .collect();
            for id in orphans {
                warn!(test_case = %id, "failure recorded for a test case that was not requested");
            }
        }
        Self::build(&test_cases, &matchers, store, failures, truth)
    }

    /// Test cases, sorted by (track, name).
    pub fn test_cases(&self) -> &[Arc<TestCase>] {
        &self.test_cases
    }

    /// Matcher names, sorted.
    pub fn matchers(&self) -> &[String] {
        &self.matchers
    }

    /// Distinct track names, sorted.
    pub fn tracks(&self) -> Vec<String> {
        let tracks: BTreeSet<&str> = self.test_cases.iter().map(|tc| tc.track()).collect();
        tracks.into_iter().map(str::to_string).collect()
    }

    pub fn cell(&self, test_case: &TestCaseId, matcher: &str) -> Option<&Cell> {
        self.cells
            .get(&ResultKey::new(test_case.clone(), matcher.to_string()))
    }

    /// Every cell in (track, test case, matcher) order.
    pub fn cells(&self) -> impl Iterator<Item = (&ResultKey, &Cell)> {
        self.cells.iter()
    }

    /// One matcher over the test cases of one track.
    pub fn track_summary(&self, track: &str, matcher: &str) -> Summary {
        Summary::from_cells(
            self.cells
                .iter()
                .filter(|(k, _)| k.test_case.track == track && k.matcher == matcher)
                .map(|(_, c)| c),
        )
    }

    /// One matcher over every test case in the cube.
    pub fn matcher_summary(&self, matcher: &str) -> Summary {
        Summary::from_cells(
            self.cells
                .iter()
                .filter(|(k, _)| k.matcher == matcher)
                .map(|(_, c)| c),
        )
    }

    /// All matchers over the test cases of one track.
    pub fn track_total(&self, track: &str) -> Summary {
        Summary::from_cells(
            self.cells
                .iter()
                .filter(|(k, _)| k.test_case.track == track)
                .map(|(_, c)| c),
        )
    }

    /// Everything in the cube.
    pub fn overall(&self) -> Summary {
        Summary::from_cells(self.cells.values())
    }
}

fn score_pair(
    key: &ResultKey,
    store: &ResultStore,
    failures: Option<&FailureLog>,
    reference: Option<&GroundTruth>,
) -> Cell {
    let Some(result) = store.get(key) else {
        return match failures.and_then(|log| log.get(key)) {
            Some(failure) => Cell::Failed { kind: failure.kind },
            None => Cell::NoResult,
        };
    };
    let produced = match result.alignment() {
        Ok(alignment) => alignment,
        Err(e) => {
            warn!(matcher = %key.matcher, test_case = %key.test_case, error = %e, "stored result is unreadable");
            return Cell::Failed {
                kind: FailureKind::Parse,
            };
        }
    };
    match reference {
        Some(truth) => Cell::Scored(compare_with(produced, truth)),
        None => Cell::NoGroundTruth {
            produced: produced.len(),
        },
    }
}
