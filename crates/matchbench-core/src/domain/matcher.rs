//! Matcher descriptors and the in-process matcher contract.
//!
//! A matcher is either a Rust value implementing [`Matcher`] or an external
//! program described by an [`ExternalLaunch`]. Callers only ever see a
//! [`MatcherDescriptor`]; how it is invoked is the executor's concern.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::alignment::Alignment;
use super::error::ResolveError;

/// Input handed to an in-process matcher.
#[derive(Debug, Clone, Default)]
pub struct MatchRequest {
    pub source: String,
    pub target: String,
    pub input_alignment: Option<Alignment>,
    pub parameters: serde_json::Value,
}

/// An in-process matcher.
#[async_trait]
pub trait Matcher: Send + Sync {
    async fn align(&self, request: &MatchRequest) -> anyhow::Result<Alignment>;
}

/// Where an external matcher leaves its alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputConvention {
    /// The `{output}` placeholder names a file the process must write.
    #[default]
    OutputFile,
    /// The last non-empty stdout line is a path or `file://` URL.
    LastStdoutLine,
}

pub const SOURCE_PLACEHOLDER: &str = "{source}";
pub const TARGET_PLACEHOLDER: &str = "{target}";
pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Launch specification for an external matcher process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLaunch {
    /// Command template; first element is the executable. May contain the
    /// `{source}`, `{target}`, `{input}` and `{output}` placeholders.
    pub command: Vec<String>,

    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Wall-clock limit per test case, in milliseconds.
    pub timeout_ms: u64,

    /// Copy `working_dir` into a scratch directory for every invocation.
    #[serde(default)]
    pub fresh_instance: bool,

    #[serde(default)]
    pub output: OutputConvention,

    /// Treat a non-zero exit as failure.
    #[serde(default = "default_require_zero_exit")]
    pub require_zero_exit: bool,
}

fn default_require_zero_exit() -> bool {
    true
}

impl ExternalLaunch {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            working_dir: None,
            env: BTreeMap::new(),
            timeout_ms: timeout.as_millis() as u64,
            fresh_instance: false,
            output: OutputConvention::OutputFile,
            require_zero_exit: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, output: OutputConvention) -> Self {
        self.output = output;
        self
    }

    pub fn fresh_instance(mut self) -> Self {
        self.fresh_instance = true;
        self
    }
}

/// How a matcher is invoked.
#[derive(Clone)]
pub enum Invocation {
    InProcess(Arc<dyn Matcher>),
    External(ExternalLaunch),
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::InProcess(_) => f.write_str("InProcess(..)"),
            Invocation::External(launch) => f.debug_tuple("External").field(launch).finish(),
        }
    }
}

/// A named matcher plus its invocation strategy.
#[derive(Debug, Clone)]
pub struct MatcherDescriptor {
    pub name: String,
    pub invocation: Invocation,
    /// Parameters passed to in-process matchers.
    pub parameters: serde_json::Value,
}

impl MatcherDescriptor {
    pub fn in_process(name: impl Into<String>, matcher: Arc<dyn Matcher>) -> Self {
        Self {
            name: name.into(),
            invocation: Invocation::InProcess(matcher),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn external(name: impl Into<String>, launch: ExternalLaunch) -> Self {
        Self {
            name: name.into(),
            invocation: Invocation::External(launch),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Check that the descriptor can be invoked at all. A descriptor that
    /// fails here fails every one of its pairs without being run.
    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.name.trim().is_empty() {
            return Err(ResolveError::EmptyName);
        }
        let launch = match &self.invocation {
            Invocation::InProcess(_) => return Ok(()),
            Invocation::External(launch) => launch,
        };
        if launch.command.first().map_or(true, |exe| exe.trim().is_empty()) {
            return Err(ResolveError::EmptyCommand {
                matcher: self.name.clone(),
            });
        }
        if launch.timeout_ms == 0 {
            return Err(ResolveError::ZeroTimeout {
                matcher: self.name.clone(),
            });
        }
        if let Some(dir) = &launch.working_dir {
            if !dir.is_dir() {
                return Err(ResolveError::MissingWorkingDir {
                    matcher: self.name.clone(),
                    path: dir.clone(),
                });
            }
        } else if launch.fresh_instance {
            return Err(ResolveError::FreshInstanceWithoutWorkingDir {
                matcher: self.name.clone(),
            });
        }
        if launch.output == OutputConvention::OutputFile
            && !launch.command.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER))
        {
            return Err(ResolveError::MissingOutputPlaceholder {
                matcher: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Render a timeout the way operators write it: `12 hours`, `100 milliseconds`.
pub fn timeout_text(timeout: Duration) -> String {
    let ms = timeout.as_millis();
    let (value, unit) = if ms == 0 {
        (0, "milliseconds")
    } else if ms % 3_600_000 == 0 {
        (ms / 3_600_000, "hours")
    } else if ms % 60_000 == 0 {
        (ms / 60_000, "minutes")
    } else if ms % 1_000 == 0 {
        (ms / 1_000, "seconds")
    } else {
        (ms, "milliseconds")
    };
    if value == 1 {
        format!("1 {}", unit.trim_end_matches('s'))
    } else {
        format!("{value} {unit}")
    }
}
