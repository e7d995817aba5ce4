//! ci-pipeline - environment-driven CI for Rust crates
//!
//! Provides a CI pipeline orchestrator that:
//! - Reads `TARGET`, `COVERAGE` and `FUZZ` once from the environment
//! - Builds, tests, smoke-runs benches and documents the crate, natively or through `cross`
//! - Always finishes with a native release-mode test pass
//! - Optionally captures and uploads coverage, and runs fuzzing
//! - Stops at the first failing stage

pub mod config;
pub mod error;
pub mod fakes;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod toolchain;

// Re-export key types
pub use config::{CiProvider, CoverageSettings, EnvSnapshot, PipelineConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{CiPipeline, PipelinePlan, PipelineResult};
pub use report::{render_summary, write_report_json, PipelineReport};
pub use runner::{OutputMode, ProcessExecutor, StageExecutor, StageResult};
pub use stage::{BuiltinStage, FailurePolicy, StageConfig};
pub use telemetry::init_tracing;
pub use toolchain::Toolchain;
