//! CI stage definitions and configuration.

use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Fetches the coverage service's uploader (`$1`) and points it at `$2`.
const UPLOAD_SCRIPT: &str = r#"bash <(curl -s "$1") -c -X gcov -X coveragepy -s "$2""#;

/// Builtin CI stages, in pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// rustup target add <triple>
    AddTarget,

    /// cargo install -v cross --force
    InstallCross,

    /// <tc> build -v [--target T]
    Build,

    /// <tc> test -v [--target T]
    TestDebug,

    /// <tc> bench -v [--target T] -- --test
    BenchSmoke,

    /// <tc> doc -v [--target T]
    Doc,

    /// cargo test -v --release
    TestRelease,

    /// cargo install -v <coverage tool>
    InstallCoverageTool,

    /// cargo coverage -v -m <dir> --kcov-build-location <workdir>/target
    CaptureCoverage,

    /// bash <(curl -s <url>) ... -s <dir>
    UploadCoverage,

    /// <fuzz script> local-regression
    FuzzRegression,

    /// <fuzz script> fuzzing
    FuzzContinuous,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::AddTarget => "add_target",
            BuiltinStage::InstallCross => "install_cross",
            BuiltinStage::Build => "build",
            BuiltinStage::TestDebug => "test_debug",
            BuiltinStage::BenchSmoke => "bench_smoke",
            BuiltinStage::Doc => "doc",
            BuiltinStage::TestRelease => "test_release",
            BuiltinStage::InstallCoverageTool => "install_coverage_tool",
            BuiltinStage::CaptureCoverage => "capture_coverage",
            BuiltinStage::UploadCoverage => "upload_coverage",
            BuiltinStage::FuzzRegression => "fuzz_regression",
            BuiltinStage::FuzzContinuous => "fuzz_continuous",
        }
    }

    /// Get the stage's command for the given configuration.
    pub fn command(&self, config: &PipelineConfig) -> Vec<String> {
        let toolchain = config.toolchain();
        let coverage = &config.coverage_settings;
        match self {
            BuiltinStage::AddTarget => {
                let mut cmd = vec!["rustup".to_string(), "target".to_string(), "add".to_string()];
                cmd.extend(toolchain.target().map(str::to_string));
                cmd
            }
            BuiltinStage::InstallCross => vec![
                "cargo".to_string(),
                "install".to_string(),
                "-v".to_string(),
                "cross".to_string(),
                "--force".to_string(),
            ],
            BuiltinStage::Build => toolchain.cargo_command("build", &[]),
            BuiltinStage::TestDebug => toolchain.cargo_command("test", &[]),
            BuiltinStage::BenchSmoke => toolchain.cargo_command("bench", &["--", "--test"]),
            BuiltinStage::Doc => toolchain.cargo_command("doc", &[]),
            BuiltinStage::TestRelease => vec![
                "cargo".to_string(),
                "test".to_string(),
                "-v".to_string(),
                "--release".to_string(),
            ],
            BuiltinStage::InstallCoverageTool => vec![
                "cargo".to_string(),
                "install".to_string(),
                "-v".to_string(),
                coverage.tool.clone(),
            ],
            BuiltinStage::CaptureCoverage => vec![
                "cargo".to_string(),
                "coverage".to_string(),
                "-v".to_string(),
                "-m".to_string(),
                coverage.report_dir.display().to_string(),
                "--kcov-build-location".to_string(),
                config.working_dir.join("target").display().to_string(),
            ],
            // URL and report dir go in as positional parameters so bash never
            // re-splits or interprets them.
            BuiltinStage::UploadCoverage => vec![
                "bash".to_string(),
                "-c".to_string(),
                UPLOAD_SCRIPT.to_string(),
                self.name().to_string(),
                coverage.upload_url.clone(),
                coverage.report_dir.display().to_string(),
            ],
            BuiltinStage::FuzzRegression => vec![
                config.fuzz_script.display().to_string(),
                "local-regression".to_string(),
            ],
            BuiltinStage::FuzzContinuous => vec![
                config.fuzz_script.display().to_string(),
                "fuzzing".to_string(),
            ],
        }
    }

    /// How a nonzero exit of this stage is treated.
    ///
    /// The coverage tool install fails when the tool is already present.
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            BuiltinStage::InstallCoverageTool => FailurePolicy::Tolerate,
            _ => FailurePolicy::Abort,
        }
    }
}

/// Reaction to a stage exiting nonzero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the pipeline.
    #[default]
    Abort,

    /// Log and continue.
    Tolerate,
}

/// Configuration for a CI stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Reaction to a nonzero exit.
    pub failure: FailurePolicy,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a new stage configuration from a builtin stage.
    pub fn from_builtin(stage: BuiltinStage, config: &PipelineConfig) -> Self {
        Self {
            name: stage.name().to_string(),
            command: stage.command(config),
            failure: stage.failure_policy(),
            timeout_secs: config.stage_timeout_secs,
        }
    }

    /// Create a custom stage configuration.
    pub fn custom(name: String, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name,
            command,
            failure: FailurePolicy::Abort,
            timeout_secs,
        }
    }

    /// Program this stage invokes.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// Command rendered as a single shell-like line, for logs and plans.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> PipelineConfig {
        PipelineConfig::from_vars(Vec::<(String, String)>::new())
    }

    fn cross() -> PipelineConfig {
        PipelineConfig::from_vars([("TARGET", "aarch64-unknown-linux-gnu")])
    }

    #[test]
    fn test_builtin_stage_names() {
        assert_eq!(BuiltinStage::Build.name(), "build");
        assert_eq!(BuiltinStage::TestDebug.name(), "test_debug");
        assert_eq!(BuiltinStage::BenchSmoke.name(), "bench_smoke");
        assert_eq!(BuiltinStage::Doc.name(), "doc");
        assert_eq!(BuiltinStage::TestRelease.name(), "test_release");
    }

    #[test]
    fn test_release_test_is_always_native() {
        let cmd = BuiltinStage::TestRelease.command(&cross());
        assert_eq!(cmd, vec!["cargo", "test", "-v", "--release"]);
        assert!(!cmd.contains(&"--target".to_string()));
    }

    #[test]
    fn test_bench_smoke_runs_in_test_mode() {
        let cmd = BuiltinStage::BenchSmoke.command(&native());
        assert_eq!(cmd, vec!["cargo", "bench", "-v", "--", "--test"]);
    }

    #[test]
    fn test_add_target_names_triple() {
        let cmd = BuiltinStage::AddTarget.command(&cross());
        assert_eq!(cmd, vec!["rustup", "target", "add", "aarch64-unknown-linux-gnu"]);
    }

    #[test]
    fn test_coverage_commands_share_report_dir() {
        let config = native().with_coverage_dir("cov-out").with_working_dir("/work");
        let capture = BuiltinStage::CaptureCoverage.command(&config);
        assert!(capture.contains(&"cov-out".to_string()));
        assert!(capture.contains(&"/work/target".to_string()));

        let upload = BuiltinStage::UploadCoverage.command(&config);
        assert_eq!(upload[0], "bash");
        assert_eq!(upload[4], "https://codecov.io/bash");
        assert_eq!(upload[5], "cov-out");
    }

    #[test]
    fn test_upload_keeps_report_dir_as_one_argument() {
        let config = native().with_coverage_dir("cov out;touch pwned");
        let upload = BuiltinStage::UploadCoverage.command(&config);
        assert_eq!(upload.len(), 6);
        assert_eq!(upload[5], "cov out;touch pwned");
        assert!(!upload[2].contains("cov out"));
        assert!(upload[2].contains(r#"-s "$2""#));
    }

    #[test]
    fn test_fuzz_commands_use_helper_script() {
        let config = native().with_fuzz_script("scripts/fuzzit.sh");
        assert_eq!(
            BuiltinStage::FuzzRegression.command(&config),
            vec!["scripts/fuzzit.sh", "local-regression"]
        );
        assert_eq!(
            BuiltinStage::FuzzContinuous.command(&config),
            vec!["scripts/fuzzit.sh", "fuzzing"]
        );
    }

    #[test]
    fn test_only_coverage_install_is_tolerated() {
        assert_eq!(
            BuiltinStage::InstallCoverageTool.failure_policy(),
            FailurePolicy::Tolerate
        );
        assert_eq!(BuiltinStage::InstallCross.failure_policy(), FailurePolicy::Abort);
        assert_eq!(BuiltinStage::UploadCoverage.failure_policy(), FailurePolicy::Abort);
    }

    #[test]
    fn test_stage_config_from_builtin() {
        let config = StageConfig::from_builtin(BuiltinStage::Build, &native().with_stage_timeout(300));
        assert_eq!(config.name, "build");
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.program(), Some("cargo"));
        assert_eq!(config.command_line(), "cargo build -v");
    }

    #[test]
    fn test_stage_config_custom() {
        let config = StageConfig::custom(
            "my_stage".to_string(),
            vec!["echo".to_string(), "hello".to_string()],
            60,
        );
        assert_eq!(config.name, "my_stage");
        assert_eq!(config.failure, FailurePolicy::Abort);
    }
}
