//! Domain models for matchbench.
//!
//! Canonical definitions for the core entities:
//! - `Alignment`: a set of scored, typed correspondences
//! - `TestCase` / `Track`: what matchers are run against
//! - `MatcherDescriptor`: a named matcher and how to invoke it
//! - `ExecutionResult` / `InvocationFailure`: the two outcomes of one invocation

pub mod alignment;
pub mod error;
pub mod failure;
pub mod matcher;
pub mod result;
pub mod test_case;

// Re-export main types and errors
pub use alignment::{Alignment, Correspondence, CorrespondenceKey, Relation};
pub use error::{CodecError, CoreError, ResolveError, Result};
pub use failure::{FailureKind, FailureLog, InvocationFailure};
pub use matcher::{
    timeout_text, ExternalLaunch, Invocation, MatchRequest, Matcher, MatcherDescriptor,
    OutputConvention, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER, SOURCE_PLACEHOLDER,
    TARGET_PLACEHOLDER,
};
pub use result::{ExecutionResult, ResultKey};
pub use test_case::{location_to_path, Completeness, TestCase, TestCaseId, Track};
