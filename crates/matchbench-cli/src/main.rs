//! matchbench - run matchers against benchmark suites and score them
//!
//! ## Commands
//!
//! - `run`: execute every matcher of a suite on every test case, resuming
//!   from previously persisted results, then write the reports
//! - `evaluate`: score persisted results without running anything
//! - `analyze`: describe the shape of persisted alignments

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use matchbench_core::counters::COUNTERS;
use matchbench_core::metrics::Summary;
use matchbench_core::obs::RunSpan;
use matchbench_core::{
    write_analysis_file, write_reports, AlignmentCodec, CodecGroundTruth, Cube, FailureLog,
    HarnessConfig, InvocationFailure, JsonCodec, ResultKey, ResultStore, Suite, TestCaseId,
};
use matchbench_exec::{ExecutionOrchestrator, RunReport};

/// Failure records persisted next to the results.
const FAILURES_FILE: &str = "failures.json";

#[derive(Parser)]
#[command(name = "matchbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark matchers against test suites with reference alignments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "MATCHBENCH_LOG_JSON")]
    json: bool,

    /// Harness configuration file (TOML)
    #[arg(short, long, global = true, env = "MATCHBENCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every matcher on every test case of a suite
    Run {
        /// Suite file (TOML)
        #[arg(short, long)]
        suite: PathBuf,

        /// Directory holding persisted results; existing results are reused
        #[arg(short, long, default_value = "results")]
        results: PathBuf,

        /// Directory for the report files (default: <results>/report)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Worker pool size (overrides the configuration file)
        #[arg(long, env = "MATCHBENCH_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Ignore persisted results and run every pair again
        #[arg(long)]
        fresh: bool,
    },

    /// Score persisted results and write the report files
    Evaluate {
        #[arg(short, long)]
        suite: PathBuf,

        #[arg(short, long, default_value = "results")]
        results: PathBuf,

        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Write an alignment analysis of persisted results
    Analyze {
        #[arg(short, long)]
        suite: PathBuf,

        #[arg(short, long, default_value = "results")]
        results: PathBuf,

        /// Output file
        #[arg(short, long, default_value = "analysis.txt")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    matchbench_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let outcome = match cli.command {
        Commands::Run {
            suite,
            results,
            report,
            concurrency,
            fresh,
        } => {
            let report = report.unwrap_or_else(|| results.join("report"));
            cmd_run(config, &suite, &results, &report, concurrency, fresh)
                .await
                .map(|_| ())
        }
        Commands::Evaluate {
            suite,
            results,
            report,
        } => {
            let report = report.unwrap_or_else(|| results.join("report"));
            cmd_evaluate(&config, &suite, &results, &report)
        }
        Commands::Analyze {
            suite,
            results,
            output,
        } => cmd_analyze(&config, &suite, &results, &output),
    };

    COUNTERS.flush();
    outcome
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load configuration {:?}", path)),
        None => Ok(HarnessConfig::default()),
    }
}

fn load_suite(path: &Path) -> Result<Suite> {
    Suite::load(path).with_context(|| format!("Failed to load suite {:?}", path))
}

async fn cmd_run(
    mut config: HarnessConfig,
    suite_path: &Path,
    results: &Path,
    report_dir: &Path,
    concurrency: Option<usize>,
    fresh: bool,
) -> Result<RunReport> {
    if let Some(n) = concurrency {
        config.concurrency = n;
        config.validate()?;
    }
    let suite = load_suite(suite_path)?;
    let test_cases = suite.test_cases();
    let matchers = suite.matcher_descriptors(config.default_timeout());
    let codec: Arc<dyn AlignmentCodec> = Arc::new(JsonCodec);

    let store = if fresh {
        ResultStore::new(config.duplicate_policy)
    } else {
        ResultStore::load_from_dir(results, &test_cases, Arc::clone(&codec), config.duplicate_policy)
            .with_context(|| format!("Failed to load results from {:?}", results))?
    };
    if !store.is_empty() {
        info!(results = store.len(), "resuming from persisted results");
    }

    let orchestrator = ExecutionOrchestrator::from_config(&config, Arc::clone(&codec));
    let run = orchestrator
        .run_all(&test_cases, &matchers, Arc::new(store))
        .await;

    let _span = RunSpan::enter(&run.run_id);
    let written = run
        .store
        .persist_to_dir(results, codec.as_ref())
        .with_context(|| format!("Failed to persist results to {:?}", results))?;
    write_failures(&results.join(FAILURES_FILE), &run.failures)?;

    let names: Vec<String> = matchers.iter().map(|m| m.name.clone()).collect();
    let cube = Cube::build(
        &test_cases,
        &names,
        &run.store,
        Some(&run.failures),
        &CodecGroundTruth::new(Arc::clone(&codec)),
    )
    .context("Failed to score results")?;
    let files = write_reports(report_dir, &cube, &run.store, &config.report)?;

    println!("Run ID: {}", run.run_id);
    println!(
        "Pairs: {} ({} run, {} reused, {} failed, {} discarded)",
        run.requested.len(),
        run.invoked,
        run.skipped,
        run.failed,
        run.rejected
    );
    println!("Duration: {}ms", run.duration.as_millis());
    println!("Results: {} written to {:?}", written, results);
    print_summary(&cube.overall());
    for file in files {
        println!("  {}", file.display());
    }
    Ok(run)
}

fn cmd_evaluate(config: &HarnessConfig, suite_path: &Path, results: &Path, report_dir: &Path) -> Result<()> {
    let suite = load_suite(suite_path)?;
    let test_cases = suite.test_cases();
    let codec: Arc<dyn AlignmentCodec> = Arc::new(JsonCodec);
    let store = ResultStore::load_from_dir(results, &test_cases, Arc::clone(&codec), config.duplicate_policy)
        .with_context(|| format!("Failed to load results from {:?}", results))?;
    let failures = read_failures(&results.join(FAILURES_FILE))?;

    let mut names: Vec<String> = suite.matchers.iter().map(|m| m.name.clone()).collect();
    names.extend(store.matcher_names());
    let cube = Cube::build(
        &test_cases,
        &names,
        &store,
        Some(&failures),
        &CodecGroundTruth::new(codec),
    )
    .context("Failed to score results")?;
    let files = write_reports(report_dir, &cube, &store, &config.report)?;

    print_summary(&cube.overall());
    for file in files {
        println!("  {}", file.display());
    }
    Ok(())
}

fn cmd_analyze(config: &HarnessConfig, suite_path: &Path, results: &Path, output: &Path) -> Result<()> {
    let suite = load_suite(suite_path)?;
    let test_cases = suite.test_cases();
    let store = ResultStore::load_from_dir(results, &test_cases, Arc::new(JsonCodec), config.duplicate_policy)
        .with_context(|| format!("Failed to load results from {:?}", results))?;
    let matchers = store.matcher_names();
    write_analysis_file(output, &store, &test_cases, &matchers)?;
    println!("Analysis of {} results written to {:?}", store.len(), output);
    Ok(())
}

fn print_summary(overall: &Summary) {
    println!(
        "Overall: P={:.4} R={:.4} F1={:.4} ({} scored, {} failed, {} without result, {} without ground truth)",
        overall.micro.precision(),
        overall.micro.recall(),
        overall.micro.f_measure(),
        overall.scored,
        overall.failed,
        overall.no_result,
        overall.no_ground_truth
    );
}

/// One line of [`FAILURES_FILE`].
#[derive(Debug, Serialize, Deserialize)]
struct FailureRecord {
    track: String,
    test_case: String,
    matcher: String,
    failure: InvocationFailure,
}

fn write_failures(path: &Path, failures: &FailureLog) -> Result<()> {
    let records: Vec<FailureRecord> = failures
        .entries()
        .into_iter()
        .map(|(key, failure)| FailureRecord {
            track: key.test_case.track,
            test_case: key.test_case.name,
            matcher: key.matcher,
            failure,
        })
        .collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(&records).context("serialize failures")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn read_failures(path: &Path) -> Result<FailureLog> {
    let log = FailureLog::new();
    if !path.is_file() {
        return Ok(log);
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let records: Vec<FailureRecord> = match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable failure records");
            return Ok(log);
        }
    };
    for record in records {
        log.record(
            ResultKey::new(TestCaseId::new(record.track, record.test_case), record.matcher),
            record.failure,
        );
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchbench_core::reporting::TEST_CASE_CUBE_FILE;
    use matchbench_core::{CsvTable, FailureKind};

    fn write_suite(dir: &Path) -> PathBuf {
        std::fs::write(
            dir.join("reference.json"),
            r#"[{"entity_one":"A","entity_two":"B"}]"#,
        )
        .unwrap();
        let suite = r#"
[[tracks]]
name = "demo"

[[tracks.test_cases]]
name = "one"
source = "a.owl"
target = "b.owl"
reference = "reference.json"

[[matchers]]
name = "printer"
command = ["sh", "-c", "printf '[{\"entity_one\":\"A\",\"entity_two\":\"B\"},{\"entity_one\":\"C\",\"entity_two\":\"D\"}]' > \"$0\"", "{output}"]
timeout_ms = 10000

[[matchers]]
name = "broken"
command = ["sh", "-c", "exit 4", "{output}"]
timeout_ms = 10000
"#;
        let path = dir.join("suite.toml");
        std::fs::write(&path, suite).unwrap();
        path
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "matchbench",
            "--json",
            "run",
            "--suite",
            "s.toml",
            "--concurrency",
            "4",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                concurrency,
                results,
                ..
            } => {
                assert_eq!(concurrency, Some(4));
                assert_eq!(results, PathBuf::from("results"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_failures_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FAILURES_FILE);
        let log = FailureLog::new();
        let key = ResultKey::new(TestCaseId::new("t", "c"), "m");
        log.record(
            key.clone(),
            InvocationFailure::new(FailureKind::NonZeroExit { code: Some(2) }, "exit 2"),
        );
        write_failures(&path, &log).unwrap();

        let back = read_failures(&path).unwrap();
        assert_eq!(back.get(&key), log.get(&key));
        assert!(read_failures(&dir.path().join("missing.json")).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_then_evaluate_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let suite = write_suite(dir.path());
        let results = dir.path().join("results");
        let report = dir.path().join("report");

        let first = cmd_run(HarnessConfig::default(), &suite, &results, &report, Some(2), false)
            .await
            .unwrap();
        assert_eq!((first.requested.len(), first.invoked, first.skipped), (2, 2, 0));

        let table = CsvTable::read(&report.join(TEST_CASE_CUBE_FILE)).unwrap();
        assert_eq!(table.value("printer", "# of TP"), Some("1"));
        assert_eq!(table.value("printer", "# of FP"), Some("1"));
        assert_eq!(table.value("broken", "demo/one"), Some("Failed: non-zero exit"));

        // Evaluating again from disk reports the same cells, failure included.
        let again = dir.path().join("again");
        cmd_evaluate(&HarnessConfig::default(), &suite, &results, &again).unwrap();
        let reloaded = CsvTable::read(&again.join(TEST_CASE_CUBE_FILE)).unwrap();
        assert_eq!(reloaded, table);

        let analysis = dir.path().join("analysis.txt");
        cmd_analyze(&HarnessConfig::default(), &suite, &results, &analysis).unwrap();
        assert!(std::fs::read_to_string(&analysis).unwrap().contains("printer"));

        // A second run reuses the persisted printer result and only retries the failure.
        let resumed_report = dir.path().join("resumed");
        let second = cmd_run(HarnessConfig::default(), &suite, &results, &resumed_report, Some(2), false)
            .await
            .unwrap();
        assert_eq!(second.requested.len(), 2);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.invoked, 1);
        assert!(second
            .failures
            .get(&ResultKey::new(TestCaseId::new("demo", "one"), "broken"))
            .is_some());
        let resumed = CsvTable::read(&resumed_report.join(TEST_CASE_CUBE_FILE)).unwrap();
        assert_eq!(resumed, table);
    }
}
