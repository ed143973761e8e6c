//! Confusion-matrix comparison of a produced alignment against a reference.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::domain::{Alignment, Completeness};
use crate::ground_truth::GroundTruth;

/// TP / FP / FN tallies for one or more (test case, matcher) comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Produced correspondences a partial reference can neither confirm nor refute.
    pub unscored: usize,
    /// Correspondences the matcher produced.
    pub produced: usize,
}

impl ConfusionCounts {
    /// TP / (TP + FP), or 0 when nothing was scored.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// TP / (TP + FN), or 0 when the reference is empty.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall, or 0 when both are 0.
    pub fn f_measure(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Size of the reference alignment these counts were compared against.
    pub fn reference_size(&self) -> usize {
        self.true_positives + self.false_negatives
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl AddAssign for ConfusionCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.true_positives += rhs.true_positives;
        self.false_positives += rhs.false_positives;
        self.false_negatives += rhs.false_negatives;
        self.unscored += rhs.unscored;
        self.produced += rhs.produced;
    }
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sum for ConfusionCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Compare `produced` against `reference`.
///
/// A produced correspondence found in the reference is a true positive. One
/// that is absent is a false positive under a complete reference. Under a
/// partial reference it is a false positive only if it touches a reference
/// source (when sources are complete) or a reference target (when targets are
/// complete); otherwise it is unscored. Reference correspondences the matcher
/// missed are always false negatives.
pub fn compare(produced: &Alignment, reference: &Alignment, completeness: Completeness) -> ConfusionCounts {
    let mut counts = ConfusionCounts {
        produced: produced.len(),
        ..Default::default()
    };

    let sources = reference.distinct_sources();
    let targets = reference.distinct_targets();

    for c in produced.iter() {
        if reference.contains(c) {
            counts.true_positives += 1;
            continue;
        }
        let refutable = match completeness {
            Completeness::Complete => true,
            Completeness::Partial {
                source_complete,
                target_complete,
            } => {
                (source_complete && sources.contains(c.entity_one.as_str()))
                    || (target_complete && targets.contains(c.entity_two.as_str()))
            }
        };
        if refutable {
            counts.false_positives += 1;
        } else {
            counts.unscored += 1;
        }
    }

    counts.false_negatives = reference.iter().filter(|c| !produced.contains(c)).count();
    counts
}

/// [`compare`] against a ground truth, using its own completeness flag.
pub fn compare_with(produced: &Alignment, truth: &GroundTruth) -> ConfusionCounts {
    compare(produced, &truth.alignment, truth.completeness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Correspondence, Relation};

    fn reference() -> Alignment {
        Alignment::new()
            .with(Correspondence::new("A", "B"))
            .with(Correspondence::new("E", "F"))
    }

    #[test]
    fn complete_reference_counts_everything() {
        let produced = Alignment::new()
            .with(Correspondence::new("A", "B").with_confidence(0.3))
            .with(Correspondence::new("X", "Y"));
        let c = compare(&produced, &reference(), Completeness::Complete);
        assert_eq!(c.true_positives, 1);
        assert_eq!(c.false_positives, 1);
        assert_eq!(c.false_negatives, 1);
        assert_eq!(c.unscored, 0);
        assert_eq!(c.true_positives + c.false_positives, c.produced);
    }

    #[test]
    fn relation_is_part_of_identity() {
        let produced =
            Alignment::new().with(Correspondence::new("A", "B").with_relation(Relation::Subsumed));
        let c = compare(&produced, &reference(), Completeness::Complete);
        assert_eq!(c.true_positives, 0);
        assert_eq!(c.false_positives, 1);
    }

    #[test]
    fn partial_reference_refutes_only_known_entities() {
        let produced = Alignment::new()
            .with(Correspondence::new("A", "Z")) // known source
            .with(Correspondence::new("Z", "F")) // known target
            .with(Correspondence::new("P", "Q")); // unknown
        let c = compare(&produced, &reference(), Completeness::partial());
        assert_eq!(c.false_positives, 2);
        assert_eq!(c.unscored, 1);
        assert_eq!(c.false_negatives, 2);
    }

    #[test]
    fn partial_reference_respects_side_flags() {
        let produced = Alignment::new()
            .with(Correspondence::new("A", "Z"))
            .with(Correspondence::new("Z", "F"));
        let only_sources = Completeness::Partial {
            source_complete: true,
            target_complete: false,
        };
        let c = compare(&produced, &reference(), only_sources);
        assert_eq!(c.false_positives, 1);
        assert_eq!(c.unscored, 1);
    }

    #[test]
    fn ratios_are_zero_on_empty_denominators() {
        let c = ConfusionCounts::default();
        assert_eq!(c.precision(), 0.0);
        assert_eq!(c.recall(), 0.0);
        assert_eq!(c.f_measure(), 0.0);
    }

    #[test]
    fn f_measure_is_harmonic_mean() {
        let c = ConfusionCounts {
            true_positives: 1,
            false_positives: 1,
            false_negatives: 0,
            unscored: 0,
            produced: 2,
        };
        assert!((c.precision() - 0.5).abs() < 1e-12);
        assert!((c.recall() - 1.0).abs() < 1e-12);
        assert!((c.f_measure() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn counts_sum() {
        let a = ConfusionCounts {
            true_positives: 1,
            produced: 1,
            ..Default::default()
        };
        let total: ConfusionCounts = vec![a, a, a].into_iter().sum();
        assert_eq!(total.true_positives, 3);
        assert_eq!(total.produced, 3);
    }
}
