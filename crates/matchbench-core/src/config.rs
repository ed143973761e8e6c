//! Harness configuration and suite files.
//!
//! Both are TOML. A [`HarnessConfig`] tunes how runs execute and how reports
//! look; a [`Suite`] lists the tracks, test cases and external matchers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{
    location_to_path, Completeness, ExternalLaunch, MatcherDescriptor, OutputConvention, TestCase,
    Track,
};
use crate::reporting::MetricColumn;
use crate::store::DuplicatePolicy;

/// Twelve hours, the conventional per-test-case limit for matcher campaigns.
pub const DEFAULT_TIMEOUT_SECS: u64 = 12 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Report layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Summary columns, in output order.
    pub columns: Vec<MetricColumn>,
    /// Digits after the decimal point for ratios.
    pub decimal_places: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            columns: MetricColumn::ALL.to_vec(),
            decimal_places: 4,
        }
    }
}

/// How runs execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Worker pool size. `1` runs pairs sequentially.
    pub concurrency: usize,
    /// Limit for matchers that do not declare their own.
    pub default_timeout_secs: u64,
    /// Parent directory for scratch and fresh-instance copies; system temp when unset.
    pub temp_root: Option<PathBuf>,
    pub duplicate_policy: DuplicatePolicy,
    /// Stderr lines kept on a failure record.
    pub stderr_tail_lines: usize,
    pub report: ReportConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            temp_root: None,
            duplicate_policy: DuplicatePolicy::Overwrite,
            stderr_tail_lines: 20,
            report: ReportConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid("default_timeout_secs must be positive".into()));
        }
        if self.report.columns.is_empty() {
            return Err(ConfigError::Invalid("report.columns must not be empty".into()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteTestCase {
    pub name: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub input_alignment: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub completeness: Completeness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteTrack {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<SuiteTestCase>,
}

/// An external matcher as written in a suite file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteMatcher {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Falls back to [`HarnessConfig::default_timeout_secs`].
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fresh_instance: bool,
    #[serde(default)]
    pub output: OutputConvention,
    #[serde(default = "yes")]
    pub require_zero_exit: bool,
}

fn yes() -> bool {
    true
}

impl SuiteMatcher {
    pub fn to_descriptor(&self, default_timeout: Duration) -> MatcherDescriptor {
        let timeout = self
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);
        let mut launch = ExternalLaunch::new(self.command.clone(), timeout).with_output(self.output);
        launch.working_dir = self.working_dir.clone();
        launch.env = self.env.clone();
        launch.fresh_instance = self.fresh_instance;
        launch.require_zero_exit = self.require_zero_exit;
        MatcherDescriptor::external(self.name.clone(), launch)
    }
}

/// Tracks, test cases and external matchers for one campaign.
///
/// Relative paths in a suite file resolve against the file's directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    #[serde(default)]
    pub tracks: Vec<SuiteTrack>,
    #[serde(default)]
    pub matchers: Vec<SuiteMatcher>,
}

impl Suite {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut suite: Self = read_toml(path)?;
        if let Some(base) = path.parent() {
            suite.resolve_relative(base);
        }
        suite.validate()?;
        Ok(suite)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for track in &self.tracks {
            for tc in &track.test_cases {
                if !seen.insert((track.name.as_str(), tc.name.as_str())) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate test case {}/{}",
                        track.name, tc.name
                    )));
                }
            }
        }
        let mut names = std::collections::BTreeSet::new();
        for m in &self.matchers {
            if !names.insert(m.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate matcher {}", m.name)));
            }
        }
        Ok(())
    }

    fn resolve_relative(&mut self, base: &Path) {
        for track in &mut self.tracks {
            for tc in &mut track.test_cases {
                resolve_location(base, &mut tc.source);
                resolve_location(base, &mut tc.target);
                if let Some(loc) = tc.input_alignment.as_mut() {
                    resolve_location(base, loc);
                }
                if let Some(loc) = tc.reference.as_mut() {
                    resolve_location(base, loc);
                }
            }
        }
        for m in &mut self.matchers {
            if let Some(dir) = m.working_dir.as_mut() {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .map(|t| Track {
                name: t.name.clone(),
                version: t.version.clone(),
                test_cases: t
                    .test_cases
                    .iter()
                    .map(|tc| TestCase {
                        id: crate::domain::TestCaseId::new(t.name.clone(), tc.name.clone()),
                        source: tc.source.clone(),
                        target: tc.target.clone(),
                        input_alignment: tc.input_alignment.clone(),
                        reference: tc.reference.clone(),
                        completeness: tc.completeness,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Every test case of every track, in file order.
    pub fn test_cases(&self) -> Vec<Arc<TestCase>> {
        self.tracks()
            .into_iter()
            .flat_map(|t| t.test_cases)
            .map(Arc::new)
            .collect()
    }

    pub fn matcher_descriptors(&self, default_timeout: Duration) -> Vec<MatcherDescriptor> {
        self.matchers
            .iter()
            .map(|m| m.to_descriptor(default_timeout))
            .collect()
    }
}

fn resolve_location(base: &Path, location: &mut String) {
    if location.contains("://") {
        return;
    }
    if let Some(path) = location_to_path(location) {
        if path.is_relative() {
            *location = base.join(path).display().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Invocation;

    #[test]
    fn harness_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.default_timeout(), Duration::from_secs(43_200));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Overwrite);
        assert_eq!(config.report.columns, MetricColumn::ALL.to_vec());
    }

    #[test]
    fn harness_overrides_and_validation() {
        let config: HarnessConfig = toml::from_str(
            "concurrency = 4\nduplicate_policy = \"reject\"\n[report]\ncolumns = [\"precision\", \"recall\"]\n",
        )
        .unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(
            config.report.columns,
            vec![MetricColumn::Precision, MetricColumn::Recall]
        );
        assert_eq!(config.report.decimal_places, 4);

        let bad = HarnessConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn suite_loads_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.toml");
        std::fs::write(
            &path,
            r#"
[[tracks]]
name = "anatomy"

[[tracks.test_cases]]
name = "mouse-human"
source = "mouse.owl"
target = "file:///data/human.owl"
reference = "ref.json"
completeness = { kind = "partial" }

[[matchers]]
name = "echo"
command = ["./run.sh", "{source}", "{target}", "{output}"]
timeout_ms = 500
"#,
        )
        .unwrap();

        let suite = Suite::load(&path).unwrap();
        let cases = suite.test_cases();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id.to_string(), "anatomy/mouse-human");
        assert_eq!(cases[0].source, dir.path().join("mouse.owl").display().to_string());
        assert_eq!(cases[0].target, "file:///data/human.owl");
        assert_eq!(cases[0].completeness, Completeness::partial());

        let descriptors = suite.matcher_descriptors(Duration::from_secs(60));
        match &descriptors[0].invocation {
            Invocation::External(launch) => {
                assert_eq!(launch.timeout(), Duration::from_millis(500));
                assert!(launch.require_zero_exit);
            }
            other => panic!("unexpected invocation {other:?}"),
        }
    }

    #[test]
    fn suite_rejects_duplicate_test_cases() {
        let suite: Suite = toml::from_str(
            r#"
[[tracks]]
name = "t"
test_cases = [
  { name = "c", source = "a", target = "b" },
  { name = "c", source = "a", target = "b" },
]
"#,
        )
        .unwrap();
        assert!(matches!(suite.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn matcher_timeout_falls_back_to_default() {
        let m: SuiteMatcher =
            toml::from_str("name = \"m\"\ncommand = [\"x\", \"{output}\"]\n").unwrap();
        let d = m.to_descriptor(Duration::from_secs(7));
        match d.invocation {
            Invocation::External(launch) => assert_eq!(launch.timeout(), Duration::from_secs(7)),
            other => panic!("unexpected invocation {other:?}"),
        }
    }
}
