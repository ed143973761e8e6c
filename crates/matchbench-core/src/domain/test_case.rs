//! Test cases, tracks and reference completeness.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How much of the truth a reference alignment claims to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completeness {
    /// Every correspondence absent from the reference is wrong.
    #[default]
    Complete,
    /// The reference is only locally correct. A produced correspondence that
    /// is not in the reference counts as wrong only when it touches an entity
    /// the reference covers on a side declared complete.
    Partial {
        #[serde(default = "yes")]
        source_complete: bool,
        #[serde(default = "yes")]
        target_complete: bool,
    },
}

fn yes() -> bool {
    true
}

impl Completeness {
    /// Partial reference, complete for both its sources and its targets.
    pub fn partial() -> Self {
        Completeness::Partial {
            source_complete: true,
            target_complete: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

/// (track, test case) identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestCaseId {
    pub track: String,
    pub name: String,
}

impl TestCaseId {
    pub fn new(track: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.track, self.name)
    }
}

/// One (source, target, optional reference) triple to run matchers against.
///
/// Locations are URLs or filesystem paths; they are handed to matchers as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub source: String,
    pub target: String,
    /// Optional alignment handed to matchers as a starting point.
    #[serde(default)]
    pub input_alignment: Option<String>,
    /// Location of the reference alignment, if the track publishes one.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub completeness: Completeness,
}

impl TestCase {
    pub fn new(
        track: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: TestCaseId::new(track, name),
            source: source.into(),
            target: target.into(),
            input_alignment: None,
            reference: None,
            completeness: Completeness::Complete,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>, completeness: Completeness) -> Self {
        self.reference = Some(reference.into());
        self.completeness = completeness;
        self
    }

    pub fn with_input_alignment(mut self, input: impl Into<String>) -> Self {
        self.input_alignment = Some(input.into());
        self
    }

    pub fn track(&self) -> &str {
        &self.id.track
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }
}

/// A named collection of test cases sharing a theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub test_cases: Vec<TestCase>,
}

/// Resolve a location string to a local path. `file://` URLs are stripped of
/// their scheme; anything else with a `scheme://` prefix is not local.
pub fn location_to_path(location: &str) -> Option<PathBuf> {
    if let Some(rest) = location.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if location.contains("://") {
        return None;
    }
    Some(PathBuf::from(location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_id_display() {
        assert_eq!(TestCaseId::new("anatomy", "mouse-human").to_string(), "anatomy/mouse-human");
    }

    #[test]
    fn test_case_ids_order_by_track_then_name() {
        let mut ids = vec![
            TestCaseId::new("b", "a"),
            TestCaseId::new("a", "z"),
            TestCaseId::new("a", "b"),
        ];
        ids.sort();
        assert_eq!(ids[0], TestCaseId::new("a", "b"));
        assert_eq!(ids[2], TestCaseId::new("b", "a"));
    }

    #[test]
    fn location_to_path_handles_schemes() {
        assert_eq!(
            location_to_path("file:///tmp/x.json"),
            Some(PathBuf::from("/tmp/x.json"))
        );
        assert_eq!(location_to_path("rel/x.json"), Some(PathBuf::from("rel/x.json")));
        assert_eq!(location_to_path("http://example.org/x"), None);
    }

    #[test]
    fn completeness_defaults_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            completeness: Completeness,
        }
        let w: Wrapper = toml::from_str("completeness = { kind = \"partial\" }").unwrap();
        assert_eq!(w.completeness, Completeness::partial());

        let w: Wrapper = toml::from_str(
            "completeness = { kind = \"partial\", target_complete = false }",
        )
        .unwrap();
        assert_eq!(
            w.completeness,
            Completeness::Partial {
                source_complete: true,
                target_complete: false
            }
        );
    }
}
