//! Descriptive statistics over produced alignments.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::domain::{Alignment, Relation, ResultKey, TestCase};
use crate::obs;
use crate::store::ResultStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignmentAnalysis {
    pub correspondences: usize,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub relations: BTreeMap<Relation, usize>,
    pub distinct_sources: usize,
    pub distinct_targets: usize,
    /// Source entities mapped to more than one target.
    pub duplicate_sources: usize,
    /// Target entities mapped from more than one source.
    pub duplicate_targets: usize,
}

impl AlignmentAnalysis {
    pub fn is_one_to_one(&self) -> bool {
        self.duplicate_sources == 0 && self.duplicate_targets == 0
    }
}

pub fn analyze(alignment: &Alignment) -> AlignmentAnalysis {
    let mut analysis = AlignmentAnalysis {
        correspondences: alignment.len(),
        ..Default::default()
    };
    let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
    let mut per_target: BTreeMap<&str, usize> = BTreeMap::new();

    for c in alignment.iter() {
        let conf = c.confidence;
        analysis.min_confidence = Some(analysis.min_confidence.map_or(conf, |m| m.min(conf)));
        analysis.max_confidence = Some(analysis.max_confidence.map_or(conf, |m| m.max(conf)));
        *analysis.relations.entry(c.relation).or_default() += 1;
        *per_source.entry(&c.entity_one).or_default() += 1;
        *per_target.entry(&c.entity_two).or_default() += 1;
    }

    analysis.distinct_sources = per_source.len();
    analysis.distinct_targets = per_target.len();
    analysis.duplicate_sources = per_source.values().filter(|&&n| n > 1).count();
    analysis.duplicate_targets = per_target.values().filter(|&&n| n > 1).count();
    analysis
}

/// Render a matcher × test case overview plus a per-result appendix.
///
/// Each cell is `OK`, `No result`, `Unreadable` or `<n> duplicate sources`.
pub fn render_analysis(
    store: &ResultStore,
    test_cases: &[Arc<TestCase>],
    matchers: &[String],
) -> String {
    let mut out = String::new();
    let mut appendix = String::new();

    out.push_str("matcher");
    for tc in test_cases {
        let _ = write!(out, "\t{}", tc.id);
    }
    out.push('\n');

    for matcher in matchers {
        out.push_str(matcher);
        for tc in test_cases {
            let key = ResultKey::new(tc.id.clone(), matcher.clone());
            let cell = match store.get(&key) {
                None => "No result".to_string(),
                Some(result) => match result.alignment() {
                    Err(_) => "Unreadable".to_string(),
                    Ok(alignment) => {
                        let analysis = analyze(alignment);
                        append_details(&mut appendix, &key, &analysis);
                        if analysis.duplicate_sources == 0 {
                            "OK".to_string()
                        } else {
                            format!("{} duplicate sources", analysis.duplicate_sources)
                        }
                    }
                },
            };
            let _ = write!(out, "\t{cell}");
        }
        out.push('\n');
    }

    if !appendix.is_empty() {
        out.push_str("\n# Appendix\n");
        out.push_str(&appendix);
    }
    out
}

fn append_details(out: &mut String, key: &ResultKey, a: &AlignmentAnalysis) {
    let _ = writeln!(out, "\n## {key}");
    let _ = writeln!(out, "- correspondences: {}", a.correspondences);
    if let (Some(min), Some(max)) = (a.min_confidence, a.max_confidence) {
        let _ = writeln!(out, "- confidence: [{min:.3}, {max:.3}]");
    }
    let _ = writeln!(
        out,
        "- distinct sources / targets: {} / {}",
        a.distinct_sources, a.distinct_targets
    );
    let _ = writeln!(out, "- one-to-one: {}", a.is_one_to_one());
    for (relation, n) in &a.relations {
        let _ = writeln!(out, "- relation {} ({}): {}", relation, relation.symbol(), n);
    }
}

/// Write [`render_analysis`] output to `path`.
pub fn write_analysis_file(
    path: &Path,
    store: &ResultStore,
    test_cases: &[Arc<TestCase>],
    matchers: &[String],
) -> Result<()> {
    let text = render_analysis(store, test_cases, matchers);
    std::fs::write(path, text).with_context(|| format!("write {:?}", path))?;
    obs::emit_cube_written(path, matchers.len());
    Ok(())
}
