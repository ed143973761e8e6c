//! Alignment transforms usable on their own or as in-process filter matchers.

use async_trait::async_trait;

use crate::domain::{Alignment, Correspondence, MatchRequest, Matcher, Relation};

/// Rescale confidences linearly onto `[new_min, new_max]`.
///
/// When every confidence is equal the range is undefined; each value is then
/// multiplied by the target width and shifted by `new_min`.
pub fn scale_confidence(alignment: &Alignment, new_min: f64, new_max: f64) -> Alignment {
    let mut out = alignment.clone();
    let mut confidences = alignment.iter().map(|c| c.confidence);
    let Some(first) = confidences.next() else {
        return out;
    };
    let (min, max) = confidences.fold((first, first), |(lo, hi), c| (lo.min(c), hi.max(c)));

    let range = max - min;
    let width = new_max - new_min;
    for c in out.iter_mut() {
        c.confidence = if range == 0.0 {
            width * c.confidence + new_min
        } else {
            width * (c.confidence - min) / range + new_min
        };
    }
    out
}

/// Turn a high-recall alignment into training examples using a reference.
///
/// Keeps every correspondence of `recall` whose source is a reference source
/// or whose target is a reference target. Those contained in the reference
/// become [`Relation::Equivalence`] positives; the rest become
/// [`Relation::Incompat`] negatives. Confidences are kept.
pub fn training_alignment(recall: &Alignment, reference: &Alignment) -> Alignment {
    let sources = reference.distinct_sources();
    let targets = reference.distinct_targets();
    recall
        .iter()
        .filter(|c| sources.contains(c.entity_one.as_str()) || targets.contains(c.entity_two.as_str()))
        .map(|c| {
            let relation = if reference.contains(c) {
                Relation::Equivalence
            } else {
                Relation::Incompat
            };
            Correspondence::new(c.entity_one.clone(), c.entity_two.clone())
                .with_confidence(c.confidence)
                .with_relation(relation)
        })
        .collect()
}

/// Filter matcher: rescales the confidences of the input alignment.
#[derive(Debug, Clone, Copy)]
pub struct ScaleConfidence {
    pub min: f64,
    pub max: f64,
}

impl Default for ScaleConfidence {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

#[async_trait]
impl Matcher for ScaleConfidence {
    async fn align(&self, request: &MatchRequest) -> anyhow::Result<Alignment> {
        Ok(request
            .input_alignment
            .as_ref()
            .map(|a| scale_confidence(a, self.min, self.max))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confidences(a: &Alignment) -> Vec<f64> {
        a.iter().map(|c| c.confidence).collect()
    }

    #[test]
    fn scale_maps_extremes_onto_target_interval() {
        let a = Alignment::new()
            .with(Correspondence::new("A", "1").with_confidence(0.2))
            .with(Correspondence::new("B", "2").with_confidence(0.6))
            .with(Correspondence::new("C", "3").with_confidence(0.4));
        let scaled = scale_confidence(&a, 0.0, 1.0);
        let c = confidences(&scaled);
        assert!((c[0] - 0.0).abs() < 1e-12);
        assert!((c[1] - 1.0).abs() < 1e-12);
        assert!((c[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn scale_constant_range_shifts_by_min() {
        let a = Alignment::new()
            .with(Correspondence::new("A", "1").with_confidence(0.5))
            .with(Correspondence::new("B", "2").with_confidence(0.5));
        let scaled = scale_confidence(&a, 0.5, 1.0);
        for c in confidences(&scaled) {
            assert!((c - 0.75).abs() < 1e-12);
        }
    }

    #[test]
    fn scale_empty_is_empty() {
        assert!(scale_confidence(&Alignment::new(), 0.0, 1.0).is_empty());
    }

    #[test]
    fn training_alignment_labels_positives_and_negatives() {
        let reference = Alignment::new().with(Correspondence::new("A", "B"));
        let recall = Alignment::new()
            .with(Correspondence::new("A", "B").with_confidence(0.9))
            .with(Correspondence::new("A", "C").with_confidence(0.4))
            .with(Correspondence::new("D", "B").with_confidence(0.3))
            .with(Correspondence::new("X", "Y"));
        let training = training_alignment(&recall, &reference);
        assert_eq!(training.len(), 3);

        let relations: Vec<(String, Relation)> = training
            .iter()
            .map(|c| (format!("{}-{}", c.entity_one, c.entity_two), c.relation))
            .collect();
        assert!(relations.contains(&("A-B".to_string(), Relation::Equivalence)));
        assert!(relations.contains(&("A-C".to_string(), Relation::Incompat)));
        assert!(relations.contains(&("D-B".to_string(), Relation::Incompat)));
    }

    #[tokio::test]
    async fn scale_filter_uses_input_alignment() {
        let request = MatchRequest {
            input_alignment: Some(
                Alignment::new()
                    .with(Correspondence::new("A", "1").with_confidence(2.0))
                    .with(Correspondence::new("B", "2").with_confidence(4.0)),
            ),
            ..Default::default()
        };
        let out = ScaleConfidence::default().align(&request).await.unwrap();
        assert_eq!(confidences(&out), vec![0.0, 1.0]);

        let empty = ScaleConfidence::default()
            .align(&MatchRequest::default())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
