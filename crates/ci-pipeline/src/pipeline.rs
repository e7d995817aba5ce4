//! CI pipeline planning and fail-fast execution.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::runner::{StageExecutor, StageResult};
use crate::stage::{BuiltinStage, FailurePolicy, StageConfig};
use crate::toolchain::Toolchain;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Ordered stages selected for one configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelinePlan {
    /// Wrapper used by build/test/bench/doc.
    pub toolchain: Toolchain,

    /// Stages in execution order.
    pub stages: Vec<StageConfig>,

    /// Directory every stage runs in.
    pub working_dir: PathBuf,

    /// SHA-256 digest of the ordered commands (deterministic).
    pub digest: String,
}

impl PipelinePlan {
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn contains(&self, stage: BuiltinStage) -> bool {
        self.stages.iter().any(|s| s.name == stage.name())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Result of a complete CI pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique ID of this run.
    pub run_id: String,

    /// Whether every aborting stage passed.
    pub success: bool,

    /// Results of the stages that ran, in order.
    pub stages: Vec<StageResult>,

    /// Stage that stopped the pipeline.
    pub failed_stage: Option<String>,

    /// Error that prevented the failing stage from running to completion.
    pub error: Option<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Digest of the executed plan.
    pub plan_digest: String,
}

impl PipelineResult {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed (tolerated failures included).
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// Exit code for the whole run.
    ///
    /// The failing stage's own code is propagated; signals map to 1.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            return 0;
        }
        self.failed_stage
            .as_ref()
            .and_then(|name| self.stages.iter().rev().find(|s| &s.stage_name == name))
            .map(|s| s.exit_code)
            .filter(|code| *code > 0)
            .unwrap_or(1)
    }
}

/// CI pipeline orchestrator.
pub struct CiPipeline;

impl CiPipeline {
    /// Select the stages for `config`, in execution order.
    ///
    /// Fails with a configuration conflict before anything runs when coverage
    /// or fuzzing is requested together with a cross-compilation target.
    pub fn plan(config: &PipelineConfig) -> Result<PipelinePlan> {
        config.validate()?;

        let toolchain = config.toolchain();
        let mut stages = Vec::new();

        if let Toolchain::Cross { .. } = toolchain {
            stages.push(BuiltinStage::AddTarget);
            stages.push(BuiltinStage::InstallCross);
        }

        stages.extend([
            BuiltinStage::Build,
            BuiltinStage::TestDebug,
            BuiltinStage::BenchSmoke,
            BuiltinStage::Doc,
            BuiltinStage::TestRelease,
        ]);

        if config.coverage {
            stages.extend([
                BuiltinStage::InstallCoverageTool,
                BuiltinStage::CaptureCoverage,
                BuiltinStage::UploadCoverage,
            ]);
        }

        if config.fuzz {
            stages.push(BuiltinStage::FuzzRegression);
            if config.on_mainline() {
                stages.push(BuiltinStage::FuzzContinuous);
            } else {
                info!(
                    branch = config.branch.as_deref().unwrap_or("<none>"),
                    mainline = %config.mainline_branch,
                    "Not on mainline, skipping continuous fuzzing"
                );
            }
        }

        let stages: Vec<StageConfig> = stages
            .into_iter()
            .map(|stage| StageConfig::from_builtin(stage, config))
            .collect();
        let digest = compute_plan_digest(&stages);

        Ok(PipelinePlan {
            toolchain,
            stages,
            working_dir: config.working_dir.clone(),
            digest,
        })
    }

    /// Execute `plan` stage by stage, stopping at the first failure.
    ///
    /// Stages with a `Tolerate` policy are logged and skipped over when they
    /// fail. Execution errors (spawn failure, timeout) end the run like a
    /// nonzero exit and are reported in the result.
    pub async fn run(executor: &dyn StageExecutor, plan: &PipelinePlan) -> PipelineResult {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        let short_digest = plan.digest.get(..12).unwrap_or(&plan.digest);
        info!(run_id = %run_id, stages = plan.len(), digest = %short_digest, "Starting CI pipeline");

        let mut stage_results = Vec::new();
        let mut failed_stage = None;
        let mut run_error = None;

        for config in &plan.stages {
            info!(stage = %config.name, command = %config.command_line(), "Executing stage");

            let result = match executor.execute(config, &plan.working_dir).await {
                Ok(r) => r,
                Err(e) => {
                    error!(stage = %config.name, error = %e, "Stage could not run");
                    stage_results.push(StageResult {
                        stage_name: config.name.clone(),
                        exit_code: e.exit_code(),
                        stdout: String::new(),
                        stderr: e.to_string(),
                        duration_ms: 0,
                        success: false,
                    });
                    failed_stage = Some(config.name.clone());
                    run_error = Some(e.to_string());
                    break;
                }
            };

            let passed = result.passed();
            let exit_code = result.exit_code;
            let duration_ms = result.duration_ms;
            stage_results.push(result);

            if passed {
                info!(stage = %config.name, duration_ms, "Stage passed");
                continue;
            }

            match config.failure {
                FailurePolicy::Tolerate => {
                    warn!(stage = %config.name, exit_code, "Stage failed, continuing");
                }
                FailurePolicy::Abort => {
                    error!(stage = %config.name, exit_code, "Stage failed, aborting pipeline");
                    failed_stage = Some(config.name.clone());
                    break;
                }
            }
        }

        let success = failed_stage.is_none();
        let duration_ms = start.elapsed().as_millis() as u64;

        if success {
            info!(run_id = %run_id, duration_ms, "CI pipeline completed successfully");
        } else {
            info!(run_id = %run_id, duration_ms, "CI pipeline failed");
        }

        PipelineResult {
            run_id,
            success,
            stages: stage_results,
            failed_stage,
            error: run_error,
            duration_ms,
            plan_digest: plan.digest.clone(),
        }
    }
}

/// Compute deterministic digest of the ordered stage commands.
fn compute_plan_digest(stages: &[StageConfig]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.name.as_bytes());
        hasher.update(b"\0");
        for arg in &stage.command {
            hasher.update(arg.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
