//! matchbench core library
//!
//! Domain model, result store, artifact codec boundary, confusion-matrix
//! metrics, the performance cube and its report files. Execution lives in
//! `matchbench-exec`.

pub mod codec;
pub mod config;
pub mod counters;
pub mod domain;
pub mod ground_truth;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod store;
pub mod telemetry;
pub mod transform;

pub use codec::{AlignmentCodec, JsonCodec};
pub use config::{ConfigError, HarnessConfig, ReportConfig, Suite, SuiteMatcher, DEFAULT_TIMEOUT_SECS};
pub use domain::{
    timeout_text, Alignment, CodecError, Completeness, CoreError, Correspondence,
    CorrespondenceKey, ExecutionResult, ExternalLaunch, FailureKind, FailureLog, Invocation,
    InvocationFailure, MatchRequest, Matcher, MatcherDescriptor, OutputConvention, Relation,
    ResolveError, Result, ResultKey, TestCase, TestCaseId, Track,
};
pub use ground_truth::{CodecGroundTruth, GroundTruth, GroundTruthProvider, InMemoryGroundTruth};
pub use metrics::{
    analyze, compare, compare_with, write_analysis_file, AlignmentAnalysis, Cell, ConfusionCounts,
    Cube, Summary,
};
pub use reporting::{write_reports, CsvTable, CubeArtifact, MetricColumn};
pub use store::{DuplicatePolicy, ResultStore, StoreError};
pub use transform::{scale_confidence, training_alignment, ScaleConfidence};
