//! Report files rendered from a [`Cube`].
//!
//! - `testCasePerformanceCube.csv`: one row per matcher, one column per test
//!   case (F-measure or a status marker), then the summary columns.
//! - `trackPerformanceCube.csv`: one row per (track, matcher).
//! - `testCaseDetails.csv`: one row per (test case, matcher) with all counts.
//! - `cube.json`: the same data as a versioned JSON artifact.
//!
//! Consumers must resolve columns by header name ([`CsvTable::column`]); the
//! summary column set follows [`ReportConfig::columns`].

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReportConfig;
use crate::metrics::{Cell, ConfusionCounts, Cube, Summary};
use crate::obs;
use crate::store::ResultStore;

pub const TEST_CASE_CUBE_FILE: &str = "testCasePerformanceCube.csv";
pub const TRACK_CUBE_FILE: &str = "trackPerformanceCube.csv";
pub const DETAILS_FILE: &str = "testCaseDetails.csv";
pub const CUBE_JSON_FILE: &str = "cube.json";
pub const SCHEMA_VERSION: &str = "1.0";

/// A summary column of the cube reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricColumn {
    TruePositives,
    FalsePositives,
    FalseNegatives,
    Unscored,
    Correspondences,
    Precision,
    Recall,
    FMeasure,
    MacroPrecision,
    MacroRecall,
    MacroFMeasure,
}

impl MetricColumn {
    pub const ALL: [MetricColumn; 11] = [
        MetricColumn::TruePositives,
        MetricColumn::FalsePositives,
        MetricColumn::FalseNegatives,
        MetricColumn::Unscored,
        MetricColumn::Correspondences,
        MetricColumn::Precision,
        MetricColumn::Recall,
        MetricColumn::FMeasure,
        MetricColumn::MacroPrecision,
        MetricColumn::MacroRecall,
        MetricColumn::MacroFMeasure,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            MetricColumn::TruePositives => "# of TP",
            MetricColumn::FalsePositives => "# of FP",
            MetricColumn::FalseNegatives => "# of FN",
            MetricColumn::Unscored => "# of Unscored",
            MetricColumn::Correspondences => "# of Correspondences",
            MetricColumn::Precision => "Precision (micro)",
            MetricColumn::Recall => "Recall (micro)",
            MetricColumn::FMeasure => "F1 (micro)",
            MetricColumn::MacroPrecision => "Precision (macro)",
            MetricColumn::MacroRecall => "Recall (macro)",
            MetricColumn::MacroFMeasure => "F1 (macro)",
        }
    }

    /// Macro columns only make sense over several test cases.
    pub fn is_macro(&self) -> bool {
        matches!(
            self,
            MetricColumn::MacroPrecision | MetricColumn::MacroRecall | MetricColumn::MacroFMeasure
        )
    }

    fn value_for_counts(&self, c: &ConfusionCounts, decimals: usize) -> Option<String> {
        Some(match self {
            MetricColumn::TruePositives => c.true_positives.to_string(),
            MetricColumn::FalsePositives => c.false_positives.to_string(),
            MetricColumn::FalseNegatives => c.false_negatives.to_string(),
            MetricColumn::Unscored => c.unscored.to_string(),
            MetricColumn::Correspondences => c.produced.to_string(),
            MetricColumn::Precision => format_ratio(c.precision(), decimals),
            MetricColumn::Recall => format_ratio(c.recall(), decimals),
            MetricColumn::FMeasure => format_ratio(c.f_measure(), decimals),
            _ => return None,
        })
    }

    fn value_for_summary(&self, s: &Summary, decimals: usize) -> String {
        match self {
            MetricColumn::MacroPrecision => format_ratio(s.macro_precision, decimals),
            MetricColumn::MacroRecall => format_ratio(s.macro_recall, decimals),
            MetricColumn::MacroFMeasure => format_ratio(s.macro_f_measure, decimals),
            other => other.value_for_counts(&s.micro, decimals).unwrap_or_default(),
        }
    }
}

impl fmt::Display for MetricColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

fn format_ratio(value: f64, decimals: usize) -> String {
    format!("{value:.decimals$}")
}

/// Quote a CSV field when it contains a separator, quote or line break.
pub fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_row(out: &mut String, fields: &[String]) {
    let line: Vec<String> = fields.iter().map(|f| escape_csv(f)).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

const STATUS_COLUMNS: [&str; 4] = ["# Scored", "# Failed", "# No result", "# No ground truth"];

fn status_fields(s: &Summary) -> Vec<String> {
    vec![
        s.scored.to_string(),
        s.failed.to_string(),
        s.no_result.to_string(),
        s.no_ground_truth.to_string(),
    ]
}

/// One row per matcher, one column per test case, then summary columns.
pub fn render_test_case_cube(cube: &Cube, report: &ReportConfig) -> String {
    let mut out = String::new();
    let mut header = vec!["Matcher".to_string()];
    header.extend(cube.test_cases().iter().map(|tc| tc.id.to_string()));
    header.extend(report.columns.iter().map(|c| c.header().to_string()));
    push_row(&mut out, &header);

    for matcher in cube.matchers() {
        let mut row = vec![matcher.clone()];
        for tc in cube.test_cases() {
            let value = match cube.cell(&tc.id, matcher) {
                Some(Cell::Scored(c)) => format_ratio(c.f_measure(), report.decimal_places),
                Some(other) => other.marker().unwrap_or_default(),
                None => Cell::NoResult.marker().unwrap_or_default(),
            };
            row.push(value);
        }
        let summary = cube.matcher_summary(matcher);
        row.extend(
            report
                .columns
                .iter()
                .map(|c| c.value_for_summary(&summary, report.decimal_places)),
        );
        push_row(&mut out, &row);
    }
    out
}

/// One row per (track, matcher).
pub fn render_track_cube(cube: &Cube, report: &ReportConfig) -> String {
    let mut out = String::new();
    let mut header = vec!["Track".to_string(), "Matcher".to_string()];
    header.extend(report.columns.iter().map(|c| c.header().to_string()));
    header.extend(STATUS_COLUMNS.iter().map(|s| s.to_string()));
    push_row(&mut out, &header);

    for track in cube.tracks() {
        for matcher in cube.matchers() {
            let summary = cube.track_summary(&track, matcher);
            let mut row = vec![track.clone(), matcher.clone()];
            row.extend(
                report
                    .columns
                    .iter()
                    .map(|c| c.value_for_summary(&summary, report.decimal_places)),
            );
            row.extend(status_fields(&summary));
            push_row(&mut out, &row);
        }
    }
    out
}

/// One row per (test case, matcher). Counts are blank for unscored cells.
pub fn render_details(cube: &Cube, store: &ResultStore, report: &ReportConfig) -> String {
    let columns: Vec<MetricColumn> = report.columns.iter().copied().filter(|c| !c.is_macro()).collect();
    let mut out = String::new();
    let mut header = vec![
        "Track".to_string(),
        "Test Case".to_string(),
        "Matcher".to_string(),
        "Status".to_string(),
    ];
    header.extend(columns.iter().map(|c| c.header().to_string()));
    header.push("Runtime (ms)".to_string());
    push_row(&mut out, &header);

    for (key, cell) in cube.cells() {
        let status = cell.marker().unwrap_or_else(|| "OK".to_string());
        let mut row = vec![
            key.test_case.track.clone(),
            key.test_case.name.clone(),
            key.matcher.clone(),
            status,
        ];
        for column in &columns {
            let value = cell
                .counts()
                .and_then(|c| column.value_for_counts(c, report.decimal_places))
                .unwrap_or_default();
            row.push(value);
        }
        let runtime = store
            .get(key)
            .map(|r| r.runtime().as_millis().to_string())
            .unwrap_or_default();
        row.push(runtime);
        push_row(&mut out, &row);
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct CubeCellArtifact {
    pub track: String,
    pub test_case: String,
    pub matcher: String,
    #[serde(flatten)]
    pub cell: Cell,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummaryArtifact {
    pub track: String,
    pub matcher: String,
    pub summary: Summary,
}

/// Versioned JSON form of a cube.
#[derive(Debug, Clone, Serialize)]
pub struct CubeArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub cells: Vec<CubeCellArtifact>,
    pub tracks: Vec<TrackSummaryArtifact>,
}

impl CubeArtifact {
    pub fn from_cube(cube: &Cube) -> Self {
        let cells = cube
            .cells()
            .map(|(key, cell)| CubeCellArtifact {
                track: key.test_case.track.clone(),
                test_case: key.test_case.name.clone(),
                matcher: key.matcher.clone(),
                cell: cell.clone(),
            })
            .collect();
        let tracks = cube
            .tracks()
            .into_iter()
            .flat_map(|track| {
                cube.matchers()
                    .iter()
                    .map(|matcher| TrackSummaryArtifact {
                        track: track.clone(),
                        matcher: matcher.clone(),
                        summary: cube.track_summary(&track, matcher),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            cells,
            tracks,
        }
    }
}

/// Write cube.json in pretty JSON format.
pub fn write_cube_json(path: &Path, artifact: &CubeArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize cube artifact")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    obs::emit_cube_written(path, artifact.cells.len());
    Ok(())
}

fn write_csv(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    obs::emit_cube_written(path, content.lines().count().saturating_sub(1));
    Ok(())
}

/// Write all report files into `dir`. Returns the paths written.
pub fn write_reports(
    dir: &Path,
    cube: &Cube,
    store: &ResultStore,
    report: &ReportConfig,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    let files = [
        (TEST_CASE_CUBE_FILE, render_test_case_cube(cube, report)),
        (TRACK_CUBE_FILE, render_track_cube(cube, report)),
        (DETAILS_FILE, render_details(cube, store, report)),
    ];
    let mut written = Vec::new();
    for (name, content) in files {
        let path = dir.join(name);
        write_csv(&path, &content)?;
        written.push(path);
    }
    let json = dir.join(CUBE_JSON_FILE);
    write_cube_json(&json, &CubeArtifact::from_cube(cube))?;
    written.push(json);
    Ok(written)
}

/// A parsed CSV file addressed by header name.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn parse(text: &str) -> Result<Self> {
        let mut records = parse_records(text)?.into_iter();
        let Some(header) = records.next() else {
            bail!("empty csv");
        };
        Ok(Self {
            header,
            rows: records.collect(),
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        Self::parse(&text).with_context(|| format!("parse {:?}", path))
    }

    /// Index of the column named `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Value of column `name` in the first row whose first field is `row_key`.
    pub fn value(&self, row_key: &str, name: &str) -> Option<&str> {
        let col = self.column(name)?;
        self.rows
            .iter()
            .find(|r| r.first().map(String::as_str) == Some(row_key))
            .and_then(|r| r.get(col))
            .map(String::as_str)
    }
}

fn parse_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match (ch, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => record.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            (c, _) => field.push(c),
        }
    }
    if in_quotes {
        bail!("unterminated quoted field");
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::{
        Alignment, Correspondence, ExecutionResult, FailureKind, FailureLog, InvocationFailure,
        ResultKey, TestCase,
    };
    use crate::ground_truth::{GroundTruth, InMemoryGroundTruth};

    fn cube_fixture() -> (Cube, ResultStore) {
        let a = Arc::new(TestCase::new("conference", "cmt-ekaw", "s", "t"));
        let b = Arc::new(TestCase::new("conference", "edas-iasted", "s", "t"));
        let truth = InMemoryGroundTruth::new()
            .with(
                a.id.clone(),
                GroundTruth::complete(Alignment::new().with(Correspondence::new("A", "B"))),
            )
            .with(b.id.clone(), GroundTruth::complete(Alignment::new()));
        let store = ResultStore::default();
        store
            .insert(ExecutionResult::new(
                Arc::clone(&a),
                "good, matcher",
                Alignment::new()
                    .with(Correspondence::new("A", "B"))
                    .with(Correspondence::new("C", "D")),
                Duration::from_millis(12),
                None,
            ))
            .unwrap();
        let log = FailureLog::new();
        log.record(
            ResultKey::new(b.id.clone(), "good, matcher"),
            InvocationFailure::new(FailureKind::Timeout, "slow"),
        );
        let cube = Cube::build(
            &[a, b],
            &["good, matcher".to_string()],
            &store,
            Some(&log),
            &truth,
        )
        .unwrap();
        (cube, store)
    }

    #[test]
    fn escape_quotes_only_when_needed() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn csv_parse_handles_quotes_and_escapes() {
        let t = CsvTable::parse("k,v\n\"a,b\",\"x\"\"y\"\nc,\n").unwrap();
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.value("a,b", "v"), Some("x\"y"));
        assert_eq!(t.value("c", "v"), Some(""));
        assert!(CsvTable::parse("k\n\"open").is_err());
    }

    #[test]
    fn test_case_cube_columns_resolve_by_header() {
        let (cube, _) = cube_fixture();
        let table = CsvTable::parse(&render_test_case_cube(&cube, &ReportConfig::default())).unwrap();
        assert_eq!(table.value("good, matcher", "# of TP"), Some("1"));
        assert_eq!(table.value("good, matcher", "# of FP"), Some("1"));
        assert_eq!(table.value("good, matcher", "# of Correspondences"), Some("2"));
        assert_eq!(table.value("good, matcher", "Precision (micro)"), Some("0.5000"));
        assert_eq!(
            table.value("good, matcher", "conference/edas-iasted"),
            Some("Failed: timeout")
        );
        assert_eq!(
            table.value("good, matcher", "conference/cmt-ekaw"),
            Some("0.6667")
        );
    }

    #[test]
    fn column_subset_changes_positions_not_lookup() {
        let (cube, _) = cube_fixture();
        let report = ReportConfig {
            columns: vec![MetricColumn::Correspondences, MetricColumn::TruePositives],
            decimal_places: 2,
        };
        let table = CsvTable::parse(&render_track_cube(&cube, &report)).unwrap();
        assert!(table.column("# of FP").is_none());
        assert_eq!(table.column("# of Correspondences"), Some(2));
        let row = &table.rows[0];
        assert_eq!(row[table.column("# of TP").unwrap()], "1");
        assert_eq!(row[table.column("# Failed").unwrap()], "1");
    }

    #[test]
    fn details_blank_counts_for_failed_cells() {
        let (cube, store) = cube_fixture();
        let text = render_details(&cube, &store, &ReportConfig::default());
        let table = CsvTable::parse(&text).unwrap();
        assert_eq!(table.rows.len(), 2);
        let status = table.column("Status").unwrap();
        let tp = table.column("# of TP").unwrap();
        let runtime = table.column("Runtime (ms)").unwrap();
        assert_eq!(table.rows[0][status], "OK");
        assert_eq!(table.rows[0][runtime], "12");
        assert_eq!(table.rows[1][status], "Failed: timeout");
        assert_eq!(table.rows[1][tp], "");
        assert!(table.column("F1 (macro)").is_none());
    }

    #[test]
    fn write_reports_creates_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cube, store) = cube_fixture();
        let written =
            write_reports(&dir.path().join("out"), &cube, &store, &ReportConfig::default()).unwrap();
        assert_eq!(written.len(), 4);
        for path in &written {
            assert!(path.is_file(), "{path:?} missing");
        }
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[3]).unwrap()).unwrap();
        assert_eq!(json["schema_version"], serde_json::json!("1.0"));
        assert!(json.get("generated_at").is_some());
        assert_eq!(json["cells"][1]["state"], serde_json::json!("failed"));
    }
}
