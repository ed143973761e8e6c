//! Correspondences and alignments: the artifact every matcher produces.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// The semantic relation a correspondence asserts between two entities.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    Equivalence,
    Subsumed,
    Subsumes,
    Overlap,
    Incompat,
    Unknown,
}

impl Relation {
    /// Conventional one-character symbol used in alignment formats.
    pub fn symbol(&self) -> &'static str {
        match self {
            Relation::Equivalence => "=",
            Relation::Subsumed => "<",
            Relation::Subsumes => ">",
            Relation::Overlap => "~",
            Relation::Incompat => "%",
            Relation::Unknown => "?",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Equivalence => write!(f, "equivalence"),
            Relation::Subsumed => write!(f, "subsumed"),
            Relation::Subsumes => write!(f, "subsumes"),
            Relation::Overlap => write!(f, "overlap"),
            Relation::Incompat => write!(f, "incompat"),
            Relation::Unknown => write!(f, "unknown"),
        }
    }
}

/// A scored, typed link between an entity of the source and one of the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub entity_one: String,
    pub entity_two: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub relation: Relation,
}

fn default_confidence() -> f64 {
    1.0
}

impl Correspondence {
    /// Equivalence correspondence with full confidence.
    pub fn new(entity_one: impl Into<String>, entity_two: impl Into<String>) -> Self {
        Self {
            entity_one: entity_one.into(),
            entity_two: entity_two.into(),
            confidence: 1.0,
            relation: Relation::Equivalence,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = relation;
        self
    }

    /// Identity used for scoring. Confidence does not participate.
    pub fn key(&self) -> CorrespondenceKey {
        CorrespondenceKey {
            entity_one: self.entity_one.clone(),
            entity_two: self.entity_two.clone(),
            relation: self.relation,
        }
    }
}

/// (entity_one, entity_two, relation): what two correspondences must share
/// to be considered the same.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrespondenceKey {
    pub entity_one: String,
    pub entity_two: String,
    pub relation: Relation,
}

/// A set of correspondences, deduplicated by [`CorrespondenceKey`].
///
/// Iteration order is the key order, so two alignments with the same content
/// always iterate (and serialize) identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alignment {
    cells: BTreeMap<CorrespondenceKey, Correspondence>,
}

impl Alignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a correspondence. Re-adding an existing identity replaces the
    /// stored one (and thus its confidence). Returns `true` if it was new.
    pub fn add(&mut self, correspondence: Correspondence) -> bool {
        self.cells
            .insert(correspondence.key(), correspondence)
            .is_none()
    }

    /// Builder-style [`Alignment::add`].
    pub fn with(mut self, correspondence: Correspondence) -> Self {
        self.add(correspondence);
        self
    }

    pub fn contains(&self, correspondence: &Correspondence) -> bool {
        self.cells.contains_key(&correspondence.key())
    }

    pub fn contains_key(&self, key: &CorrespondenceKey) -> bool {
        self.cells.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Correspondence> {
        self.cells.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Correspondence> {
        self.cells.values_mut()
    }

    /// All distinct `entity_one` values.
    pub fn distinct_sources(&self) -> BTreeSet<&str> {
        self.cells.keys().map(|k| k.entity_one.as_str()).collect()
    }

    /// All distinct `entity_two` values.
    pub fn distinct_targets(&self) -> BTreeSet<&str> {
        self.cells.keys().map(|k| k.entity_two.as_str()).collect()
    }
}

impl FromIterator<Correspondence> for Alignment {
    fn from_iter<I: IntoIterator<Item = Correspondence>>(iter: I) -> Self {
        let mut alignment = Alignment::new();
        for c in iter {
            alignment.add(c);
        }
        alignment
    }
}

impl IntoIterator for Alignment {
    type Item = Correspondence;
    type IntoIter = std::collections::btree_map::IntoValues<CorrespondenceKey, Correspondence>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.into_values()
    }
}

impl<'a> IntoIterator for &'a Alignment {
    type Item = &'a Correspondence;
    type IntoIter = std::collections::btree_map::Values<'a, CorrespondenceKey, Correspondence>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.values()
    }
}

impl Serialize for Alignment {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.cells.values())
    }
}

impl<'de> Deserialize<'de> for Alignment {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cells = Vec::<Correspondence>::deserialize(deserializer)?;
        Ok(cells.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_not_part_of_identity() {
        let a = Correspondence::new("A", "B").with_confidence(0.2);
        let b = Correspondence::new("A", "B").with_confidence(0.9);
        assert_eq!(a.key(), b.key());

        let mut alignment = Alignment::new();
        assert!(alignment.add(a));
        assert!(!alignment.add(b));
        assert_eq!(alignment.len(), 1);
        assert_eq!(alignment.iter().next().unwrap().confidence, 0.9);
    }

    #[test]
    fn relation_is_part_of_identity() {
        let alignment = Alignment::new()
            .with(Correspondence::new("A", "B"))
            .with(Correspondence::new("A", "B").with_relation(Relation::Subsumed));
        assert_eq!(alignment.len(), 2);
    }

    #[test]
    fn distinct_entities() {
        let alignment = Alignment::new()
            .with(Correspondence::new("A", "B"))
            .with(Correspondence::new("A", "C"))
            .with(Correspondence::new("D", "C"));
        assert_eq!(alignment.distinct_sources().len(), 2);
        assert_eq!(alignment.distinct_targets().len(), 2);
    }

    #[test]
    fn relation_symbols() {
        assert_eq!(Relation::Equivalence.symbol(), "=");
        assert_eq!(Relation::Incompat.symbol(), "%");
        assert_eq!(Relation::Unknown.to_string(), "unknown");
    }

    #[test]
    fn deserialize_applies_defaults() {
        let json = r#"[{"entity_one":"A","entity_two":"B"}]"#;
        let alignment: Alignment = serde_json::from_str(json).unwrap();
        let c = alignment.iter().next().unwrap();
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.relation, Relation::Equivalence);
    }
}
