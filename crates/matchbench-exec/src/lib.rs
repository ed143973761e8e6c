//! matchbench execution engine
//!
//! Runs matchers against test cases: external processes under a hard time
//! limit, in-process matchers behind the same contract, and a bounded worker
//! pool that fills a shared [`matchbench_core::ResultStore`].

pub mod executor;
pub mod invoker;
pub mod process;
pub mod tempdir;

pub use executor::{ExecutionOrchestrator, RunReport};
pub use invoker::{render_command, MatcherInvoker, Produced};
pub use process::{
    LineSink, ProcessError, ProcessOutcome, ProcessRunner, ProcessSpec, SinkError, TailBuffer,
};
pub use tempdir::{copy_dir_recursive, fresh_instance, SystemTempDirs, TempDirFactory};
