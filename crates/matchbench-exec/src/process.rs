//! External process execution with streamed output and a hard time limit.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Receives one decoded output line at a time.
pub trait LineSink: Send {
    fn line(&mut self, line: &str) -> Result<(), SinkError>;
}

impl<F> LineSink for F
where
    F: FnMut(&str) + Send,
{
    fn line(&mut self, line: &str) -> Result<(), SinkError> {
        self(line);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Keeps the last `capacity` lines.
#[derive(Debug, Clone, Default)]
pub struct TailBuffer {
    capacity: usize,
    lines: VecDeque<String>,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

impl LineSink for TailBuffer {
    fn line(&mut self, line: &str) -> Result<(), SinkError> {
        if self.capacity == 0 {
            return Ok(());
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
        Ok(())
    }
}

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added to the inherited environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            working_dir: None,
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// How a process that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {elapsed:?} (limit {limit:?})")]
    Timeout { elapsed: Duration, limit: Duration },

    #[error("failed to terminate process {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    #[error("output sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs external processes.
///
/// Each child is started in its own process group so that a timeout kills
/// everything it spawned, not just the direct child.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run `spec` to completion or until its timeout.
    ///
    /// Stdout and stderr are drained concurrently, line by line. A non-zero
    /// exit is returned as a normal [`ProcessOutcome`]. On timeout, sink
    /// failure or cancellation of the returned future the process group is
    /// killed.
    pub async fn run(
        spec: &ProcessSpec,
        stdout: &mut dyn LineSink,
        stderr: &mut dyn LineSink,
    ) -> Result<ProcessOutcome, ProcessError> {
        let (program, args) = spec.command.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ProcessError::Launch {
            program: program.clone(),
            source,
        })?;
        let mut guard = ProcessGuard::new(child.id());
        debug!(program = %program, pid = ?child.id(), "process spawned");

        let out_pipe = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
        let err_pipe = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

        let driven = tokio::time::timeout(
            spec.timeout,
            drive(&mut child, out_pipe, err_pipe, stdout, stderr),
        )
        .await;

        match driven {
            Ok(Ok((status, lingering))) => {
                if lingering {
                    debug!(program = %program, "output still held open after exit, killing leftover processes");
                    if let Err(e) = guard.kill() {
                        warn!(program = %program, error = %e, "could not kill leftover processes");
                    }
                } else {
                    guard.disarm();
                }
                let elapsed = start.elapsed();
                debug!(program = %program, code = ?status.code(), elapsed_ms = elapsed.as_millis() as u64, "process exited");
                Ok(ProcessOutcome {
                    exit_code: status.code(),
                    elapsed,
                })
            }
            Ok(Err(e)) => {
                terminate(&mut child, &mut guard).await?;
                Err(e)
            }
            Err(_) => {
                let elapsed = start.elapsed();
                terminate(&mut child, &mut guard).await?;
                debug!(program = %program, elapsed_ms = elapsed.as_millis() as u64, "process timed out");
                Err(ProcessError::Timeout {
                    elapsed,
                    limit: spec.timeout,
                })
            }
        }
    }
}

/// How long output is still collected after the child has exited. Anything
/// it left running in the background is killed once this runs out.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Wait for the child and its output. Returns the exit status and whether
/// descendants were still holding the pipes when the grace period ended.
async fn drive(
    child: &mut Child,
    out_pipe: impl AsyncRead + Unpin,
    err_pipe: impl AsyncRead + Unpin,
    stdout: &mut dyn LineSink,
    stderr: &mut dyn LineSink,
) -> Result<(ExitStatus, bool), ProcessError> {
    let drains = async {
        tokio::try_join!(drain(out_pipe, stdout), drain(err_pipe, stderr)).map(|_| ())
    };
    tokio::pin!(drains);

    tokio::select! {
        drained = &mut drains => {
            drained?;
            Ok((child.wait().await?, false))
        }
        status = child.wait() => {
            let status = status?;
            match tokio::time::timeout(PIPE_GRACE, &mut drains).await {
                Ok(drained) => drained.map(|_| (status, false)),
                Err(_) => Ok((status, true)),
            }
        }
    }
}

/// Feed `pipe` to `sink` line by line. Invalid UTF-8 is replaced, not fatal.
async fn drain(pipe: impl AsyncRead + Unpin, sink: &mut dyn LineSink) -> Result<(), ProcessError> {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        sink.line(text.trim_end_matches(['\n', '\r']))?;
    }
}

/// Kill the group, then the child, and reap it.
async fn terminate(child: &mut Child, guard: &mut ProcessGuard) -> Result<(), ProcessError> {
    let group = guard.kill();
    if let Err(e) = child.start_kill() {
        // Already reaped.
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(ProcessError::KillFailed {
                pid: child.id().unwrap_or_default(),
                reason: e.to_string(),
            });
        }
    }
    child.wait().await?;
    group
}

/// Kills the child's process group when dropped while armed.
struct ProcessGuard {
    pgid: Option<u32>,
}

impl ProcessGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        match self.pgid.take() {
            Some(pgid) => kill_group(pgid),
            None => Ok(()),
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            let _ = kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::KillFailed {
            pid: pgid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> Result<(), ProcessError> {
    // No process groups: the direct child is killed through its handle.
    Ok(())
}
