//! Scoring and aggregation over finished result stores.

pub mod analyzer;
pub mod confusion;
pub mod cube;

pub use analyzer::{analyze, render_analysis, write_analysis_file, AlignmentAnalysis};
pub use confusion::{compare, compare_with, ConfusionCounts};
pub use cube::{Cell, Cube, Summary};
