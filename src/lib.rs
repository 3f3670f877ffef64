//! # Sconce
//!
//! Per-base coverage of single-copy marker genes from read alignments, with
//! summary statistics for genome size estimation.
//!
//! This crate provides both a library and a binary. The accumulation pass
//! registers gene sequences and streams alignment intervals into per-base
//! coverage arrays; the analysis pass recomputes per-gene and pooled
//! statistics from the emitted coverage file alone.
//!
#![doc = include_str!("../README.md")]

pub mod analyze;
pub mod coverage;
pub mod histogram;
pub mod programs;
pub mod record;
pub mod stats;
pub mod targets;

// Re-export the important structures and functions for library users
pub use analyze::{
    run_analysis, AnalyzeConfig, CoverageSummary, OutputFormat, StatMode, TargetStats,
};
pub use coverage::{run_coverage, CoverageConfig, RunCounters};
pub use histogram::{DepthHistogram, WeightedStats};
pub use programs::{PipelineSteps, StepConfig};
pub use record::CoverageRecord;
pub use stats::RunningStats;
pub use targets::{CoverageSet, Outcome, PooledStats};
