//! JSON run report written for CI artifact upload.

use crate::config::{CiProvider, PipelineConfig};
use crate::error::Result;
use crate::pipeline::{PipelinePlan, PipelineResult};
use crate::runner::StageResult;
use crate::toolchain::Toolchain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: &str = "1";

/// Configuration summary persisted with the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportConfig {
    pub toolchain: Toolchain,
    pub coverage: bool,
    pub fuzz: bool,
    pub provider: CiProvider,
    pub branch: Option<String>,
    pub mainline_branch: String,
}

/// Canonical run report artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: String,
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub plan_digest: String,
    pub config: ReportConfig,
    pub planned_stages: Vec<String>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub stages: Vec<StageResult>,
}

impl PipelineReport {
    pub fn new(config: &PipelineConfig, plan: &PipelinePlan, result: &PipelineResult) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run_id: result.run_id.clone(),
            success: result.success,
            exit_code: result.exit_code(),
            duration_ms: result.duration_ms,
            plan_digest: plan.digest.clone(),
            config: ReportConfig {
                toolchain: plan.toolchain.clone(),
                coverage: config.coverage,
                fuzz: config.fuzz,
                provider: config.provider,
                branch: config.branch.clone(),
                mainline_branch: config.mainline_branch.clone(),
            },
            planned_stages: plan.stages.iter().map(|s| s.name.clone()).collect(),
            failed_stage: result.failed_stage.clone(),
            error: result.error.clone(),
            stages: result.stages.clone(),
        }
    }

    /// Stages planned but never reached because an earlier stage failed.
    pub fn skipped_stages(&self) -> Vec<&str> {
        self.planned_stages
            .iter()
            .skip(self.stages.len())
            .map(String::as_str)
            .collect()
    }
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &PipelineReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Render a short plain-text summary for the CI log.
pub fn render_summary(report: &PipelineReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Run {}: {} ({}ms, exit code {})\n",
        report.run_id,
        if report.success { "PASSED" } else { "FAILED" },
        report.duration_ms,
        report.exit_code
    ));

    for stage in &report.stages {
        let status = if stage.passed() { "ok" } else { "FAIL" };
        out.push_str(&format!(
            "  [{}] {} ({}ms, exit code {})\n",
            status, stage.stage_name, stage.duration_ms, stage.exit_code
        ));
    }
    for name in report.skipped_stages() {
        out.push_str(&format!("  [skip] {}\n", name));
    }

    if let Some(err) = &report.error {
        out.push_str(&format!("Error: {}\n", err));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingExecutor;
    use crate::pipeline::CiPipeline;

    async fn failing_report() -> PipelineReport {
        let config = PipelineConfig::from_vars([("COVERAGE", "1")]);
        let plan = CiPipeline::plan(&config).unwrap();
        let executor = RecordingExecutor::new().with_exit_code("bench_smoke", 101);
        let result = CiPipeline::run(&executor, &plan).await;
        PipelineReport::new(&config, &plan, &result)
    }

    #[tokio::test]
    async fn test_report_lists_skipped_stages() {
        let report = failing_report().await;
        assert!(!report.success);
        assert_eq!(report.exit_code, 101);
        assert_eq!(report.failed_stage.as_deref(), Some("bench_smoke"));
        assert_eq!(
            report.skipped_stages(),
            vec![
                "doc",
                "test_release",
                "install_coverage_tool",
                "capture_coverage",
                "upload_coverage"
            ]
        );
    }

    #[tokio::test]
    async fn test_write_report_json() {
        let report = failing_report().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts").join("ci-report.json");

        write_report_json(&path, &report).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: PipelineReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, report);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["config"]["toolchain"]["kind"], "native");
    }

    #[tokio::test]
    async fn test_render_summary() {
        let report = failing_report().await;
        let text = render_summary(&report);
        assert!(text.contains("FAILED"));
        assert!(text.contains("[FAIL] bench_smoke"));
        assert!(text.contains("[skip] upload_coverage"));
    }
}
