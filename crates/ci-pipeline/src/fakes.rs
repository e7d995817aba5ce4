//! In-memory executor fake (testing only)
//!
//! `RecordingExecutor` never spawns a process: it records every stage it is
//! asked to run and answers with a scripted exit code.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::runner::{StageExecutor, StageResult};
use crate::stage::StageConfig;

/// Executor that records invocations instead of running them.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<StageConfig>>,
    exit_codes: HashMap<String, i32>,
    unspawnable: Vec<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the stage named `stage` exit with `code`.
    pub fn with_exit_code(mut self, stage: &str, code: i32) -> Self {
        self.exit_codes.insert(stage.to_string(), code);
        self
    }

    /// Make the stage named `stage` fail to spawn.
    pub fn with_spawn_failure(mut self, stage: &str) -> Self {
        self.unspawnable.push(stage.to_string());
        self
    }

    /// Stages executed so far, in order.
    pub fn calls(&self) -> Vec<StageConfig> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of the stages executed so far, in order.
    pub fn stage_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.name).collect()
    }
}

#[async_trait]
impl StageExecutor for RecordingExecutor {
    async fn execute(&self, stage: &StageConfig, _cwd: &Path) -> Result<StageResult> {
        self.calls.lock().unwrap().push(stage.clone());

        if self.unspawnable.contains(&stage.name) {
            return Err(PipelineError::Spawn {
                stage: stage.name.clone(),
                program: stage.program().unwrap_or_default().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }

        let exit_code = self.exit_codes.get(&stage.name).copied().unwrap_or(0);
        Ok(StageResult {
            stage_name: stage.name.clone(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            success: exit_code == 0,
        })
    }
}
