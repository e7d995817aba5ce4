//! CI stage execution.

use crate::error::{PipelineError, Result};
use crate::stage::StageConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success, -1 = terminated by signal).
    pub exit_code: i32,

    /// Captured stdout (empty when output is streamed).
    pub stdout: String,

    /// Captured stderr (empty when output is streamed).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Executes a single stage to completion.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run `stage` in `cwd` and wait for it to exit.
    ///
    /// A nonzero exit is a successful execution with a failing result; errors
    /// are reserved for stages that could not run at all.
    async fn execute(&self, stage: &StageConfig, cwd: &Path) -> Result<StageResult>;
}

/// Where a child's stdout/stderr go.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Stream to the runner's own stdout/stderr.
    #[default]
    Inherit,

    /// Capture into the `StageResult`.
    Capture,
}

/// Runs stages as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    output: OutputMode,
}

impl ProcessExecutor {
    pub fn new(output: OutputMode) -> Self {
        Self { output }
    }
}

#[async_trait]
impl StageExecutor for ProcessExecutor {
    async fn execute(&self, config: &StageConfig, cwd: &Path) -> Result<StageResult> {
        let start = Instant::now();

        let Some((exe, args)) = config.command.split_first() else {
            return Err(PipelineError::EmptyCommand(config.name.clone()));
        };

        debug!(stage = %config.name, command = %config.command_line(), cwd = %cwd.display(), "Spawning stage");

        let mut command = Command::new(exe);
        command.args(args).current_dir(cwd).kill_on_drop(true);
        match self.output {
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        let child = command.spawn().map_err(|source| PipelineError::Spawn {
            stage: config.name.clone(),
            program: exe.clone(),
            source,
        })?;

        // Dropping the wait future on timeout kills the child.
        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: config.name.clone(),
                timeout_secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}
