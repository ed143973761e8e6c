//! One matcher, one test case: produce an alignment or a failure record.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tempfile::TempDir;
use tracing::{debug, info};

use matchbench_core::domain::{
    location_to_path, timeout_text, Alignment, ExternalLaunch, FailureKind, Invocation,
    InvocationFailure, MatchRequest, Matcher, MatcherDescriptor, OutputConvention, TestCase,
    INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER, SOURCE_PLACEHOLDER, TARGET_PLACEHOLDER,
};
use matchbench_core::AlignmentCodec;

use crate::process::{LineSink, ProcessError, ProcessRunner, ProcessSpec, SinkError, TailBuffer};
use crate::tempdir::{fresh_instance, TempDirFactory};

/// Raw artifact text kept on a parse failure is cut to this many bytes.
const RAW_OUTPUT_LIMIT: usize = 64 * 1024;

/// A successful invocation.
#[derive(Debug, Clone)]
pub struct Produced {
    pub alignment: Alignment,
    pub elapsed: Duration,
}

/// Invokes matchers of either kind behind one contract.
pub struct MatcherInvoker {
    temp_dirs: Arc<dyn TempDirFactory>,
    codec: Arc<dyn AlignmentCodec>,
    stderr_tail_lines: usize,
}

impl MatcherInvoker {
    pub fn new(temp_dirs: Arc<dyn TempDirFactory>, codec: Arc<dyn AlignmentCodec>) -> Self {
        Self {
            temp_dirs,
            codec,
            stderr_tail_lines: 20,
        }
    }

    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    pub fn codec(&self) -> &Arc<dyn AlignmentCodec> {
        &self.codec
    }

    /// Run `descriptor` on `test_case`. Never panics on matcher misbehaviour;
    /// every problem comes back as an [`InvocationFailure`] with the elapsed
    /// time attached.
    pub async fn invoke(
        &self,
        descriptor: &MatcherDescriptor,
        test_case: &TestCase,
    ) -> Result<Produced, InvocationFailure> {
        let start = Instant::now();
        let outcome = match &descriptor.invocation {
            Invocation::InProcess(matcher) => {
                self.invoke_in_process(Arc::clone(matcher), descriptor, test_case).await
            }
            Invocation::External(launch) => {
                self.invoke_external(&descriptor.name, launch, test_case).await
            }
        };
        let elapsed = start.elapsed();
        match outcome {
            Ok(alignment) => Ok(Produced { alignment, elapsed }),
            Err(failure) => Err(InvocationFailure {
                elapsed: failure.elapsed.or(Some(elapsed)),
                ..failure
            }),
        }
    }

    fn read_input(&self, test_case: &TestCase) -> Result<Option<Alignment>, InvocationFailure> {
        let Some(location) = &test_case.input_alignment else {
            return Ok(None);
        };
        self.codec.read_location(location).map(Some).map_err(|e| {
            InvocationFailure::new(
                FailureKind::Parse,
                format!("cannot read input alignment {location}: {e}"),
            )
        })
    }

    async fn invoke_in_process(
        &self,
        matcher: Arc<dyn Matcher>,
        descriptor: &MatcherDescriptor,
        test_case: &TestCase,
    ) -> Result<Alignment, InvocationFailure> {
        let request = MatchRequest {
            source: test_case.source.clone(),
            target: test_case.target.clone(),
            input_alignment: self.read_input(test_case)?,
            parameters: descriptor.parameters.clone(),
        };
        match AssertUnwindSafe(matcher.align(&request)).catch_unwind().await {
            Ok(Ok(alignment)) => Ok(alignment),
            Ok(Err(e)) => Err(InvocationFailure::new(FailureKind::Matcher, format!("{e:#}"))),
            Err(panic) => Err(InvocationFailure::new(
                FailureKind::Panicked,
                panic_message(panic.as_ref()),
            )),
        }
    }

    async fn invoke_external(
        &self,
        name: &str,
        launch: &ExternalLaunch,
        test_case: &TestCase,
    ) -> Result<Alignment, InvocationFailure> {
        // Both directories are removed when they go out of scope, on every path.
        let scratch = self.temp_dirs.create("run").map_err(|e| {
            InvocationFailure::new(FailureKind::Launch, format!("cannot create scratch directory: {e}"))
        })?;
        let instance: Option<TempDir> = match (&launch.working_dir, launch.fresh_instance) {
            (Some(dir), true) => Some(fresh_instance(self.temp_dirs.as_ref(), dir).map_err(|e| {
                InvocationFailure::new(
                    FailureKind::Launch,
                    format!("cannot copy {} into a fresh instance: {e}", dir.display()),
                )
            })?),
            _ => None,
        };
        let working_dir = instance
            .as_ref()
            .map(|t| t.path().to_path_buf())
            .or_else(|| launch.working_dir.clone());

        let output_path = scratch
            .path()
            .join(format!("alignment.{}", self.codec.extension()));
        let command = render_command(&launch.command, test_case, &output_path);

        let mut spec = ProcessSpec::new(command, launch.timeout());
        spec.working_dir = working_dir;
        spec.env = launch.env.clone();

        let mut stdout = StdoutSink::new(name);
        let mut stderr = StderrSink::new(name, self.stderr_tail_lines);
        debug!(matcher = %name, test_case = %test_case.id, timeout = %timeout_text(launch.timeout()), "launching external matcher");

        let result = ProcessRunner::run(&spec, &mut stdout, &mut stderr).await;
        let tail = stderr.tail.into_lines();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(process_failure(e, launch.timeout()).with_stderr_tail(tail)),
        };
        if launch.require_zero_exit && !outcome.success() {
            return Err(InvocationFailure::new(
                FailureKind::NonZeroExit {
                    code: outcome.exit_code,
                },
                format!("matcher exited with {:?}", outcome.exit_code),
            )
            .with_elapsed(outcome.elapsed)
            .with_stderr_tail(tail));
        }

        let artifact = match launch.output {
            OutputConvention::OutputFile => Some(output_path),
            OutputConvention::LastStdoutLine => stdout
                .last
                .as_deref()
                .and_then(location_to_path)
                .map(|p| match &spec.working_dir {
                    Some(dir) if p.is_relative() => dir.join(p),
                    _ => p,
                }),
        };
        let Some(artifact) = artifact else {
            return Err(InvocationFailure::new(
                FailureKind::Parse,
                "matcher did not report a local output location",
            )
            .with_raw_output(stdout.last.unwrap_or_default())
            .with_stderr_tail(tail));
        };
        self.parse_artifact(&artifact).map_err(|f| f.with_stderr_tail(tail))
    }

    fn parse_artifact(&self, path: &Path) -> Result<Alignment, InvocationFailure> {
        let bytes = std::fs::read(path).map_err(|e| {
            InvocationFailure::new(
                FailureKind::Parse,
                format!("cannot read output {}: {e}", path.display()),
            )
        })?;
        self.codec.decode(&bytes).map_err(|e| {
            let mut raw = String::from_utf8_lossy(&bytes).into_owned();
            if raw.len() > RAW_OUTPUT_LIMIT {
                let mut cut = RAW_OUTPUT_LIMIT;
                while !raw.is_char_boundary(cut) {
                    cut -= 1;
                }
                raw.truncate(cut);
            }
            InvocationFailure::new(
                FailureKind::Parse,
                format!("cannot parse output {}: {e}", path.display()),
            )
            .with_raw_output(raw)
        })
    }
}

/// Substitute placeholders. An argument that mentions `{input}` is dropped
/// when the test case has no input alignment.
pub fn render_command(template: &[String], test_case: &TestCase, output: &Path) -> Vec<String> {
    let output = output.display().to_string();
    template
        .iter()
        .filter_map(|arg| {
            let mut arg = arg.clone();
            if arg.contains(INPUT_PLACEHOLDER) {
                let input = test_case.input_alignment.as_ref()?;
                arg = arg.replace(INPUT_PLACEHOLDER, input);
            }
            Some(
                arg.replace(SOURCE_PLACEHOLDER, &test_case.source)
                    .replace(TARGET_PLACEHOLDER, &test_case.target)
                    .replace(OUTPUT_PLACEHOLDER, &output),
            )
        })
        .collect()
}

fn process_failure(error: ProcessError, limit: Duration) -> InvocationFailure {
    match error {
        ProcessError::Timeout { elapsed, .. } => InvocationFailure::new(
            FailureKind::Timeout,
            format!("exceeded the time limit of {}", timeout_text(limit)),
        )
        .with_elapsed(elapsed),
        ProcessError::KillFailed { .. } => InvocationFailure::new(
            FailureKind::Timeout,
            format!("timed out and could not be terminated: {error}"),
        ),
        ProcessError::Launch { .. } => InvocationFailure::new(FailureKind::Launch, error.to_string()),
        ProcessError::EmptyCommand => InvocationFailure::new(FailureKind::Unresolved, error.to_string()),
        ProcessError::Sink(_) | ProcessError::Io(_) => {
            InvocationFailure::new(FailureKind::Matcher, error.to_string())
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Logs stdout and remembers the last non-empty line.
struct StdoutSink<'a> {
    matcher: &'a str,
    last: Option<String>,
}

impl<'a> StdoutSink<'a> {
    fn new(matcher: &'a str) -> Self {
        Self { matcher, last: None }
    }
}

impl LineSink for StdoutSink<'_> {
    fn line(&mut self, line: &str) -> Result<(), SinkError> {
        info!(matcher = %self.matcher, stream = "stdout", "{line}");
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            self.last = Some(trimmed.to_string());
        }
        Ok(())
    }
}

/// Logs stderr and keeps its tail for failure records.
struct StderrSink<'a> {
    matcher: &'a str,
    tail: TailBuffer,
}

impl<'a> StderrSink<'a> {
    fn new(matcher: &'a str, lines: usize) -> Self {
        Self {
            matcher,
            tail: TailBuffer::new(lines),
        }
    }
}

impl LineSink for StderrSink<'_> {
    fn line(&mut self, line: &str) -> Result<(), SinkError> {
        debug!(matcher = %self.matcher, stream = "stderr", "{line}");
        self.tail.line(line)
    }
}
