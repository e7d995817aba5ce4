//! Pipeline configuration read once from the environment.
//!
//! The CI system communicates through environment variables only: `TARGET`
//! switches to cross-compilation, `COVERAGE` and `FUZZ` enable the optional
//! tail stages, and the provider's branch variables decide whether the
//! continuous fuzzing job is triggered. A variable counts as set when it
//! holds a non-empty value.

use crate::error::{PipelineError, Result};
use crate::toolchain::Toolchain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Branch whose pushes trigger the continuous fuzzing job.
pub const DEFAULT_MAINLINE_BRANCH: &str = "master";

/// Helper script exposing `local-regression` and `fuzzing`.
pub const DEFAULT_FUZZ_SCRIPT: &str = "./fuzzit.sh";

/// Coverage tool crate installed before capture.
pub const DEFAULT_COVERAGE_TOOL: &str = "cargo-travis";

/// Directory the coverage tool writes its reports into.
pub const DEFAULT_COVERAGE_DIR: &str = "coverage-reports";

/// Public upload script of the coverage service.
pub const DEFAULT_COVERAGE_UPLOAD_URL: &str = "https://codecov.io/bash";

pub const ENV_TARGET: &str = "TARGET";
pub const ENV_COVERAGE: &str = "COVERAGE";
pub const ENV_FUZZ: &str = "FUZZ";
pub const ENV_MAINLINE_BRANCH: &str = "CI_MAINLINE_BRANCH";

/// Snapshot of the process environment taken at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Build a snapshot from explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `name` if it is set to a non-empty string.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether `name` is set to a non-empty string.
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// CI system the pipeline is running under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CiProvider {
    Travis,
    GithubActions,
    Unknown,
}

impl CiProvider {
    /// Detect the provider from its marker variables.
    pub fn detect(env: &EnvSnapshot) -> Self {
        if env.get("TRAVIS") == Some("true") || env.is_set("TRAVIS_BRANCH") {
            CiProvider::Travis
        } else if env.get("GITHUB_ACTIONS") == Some("true") || env.is_set("GITHUB_REF_NAME") {
            CiProvider::GithubActions
        } else {
            CiProvider::Unknown
        }
    }

    /// Branch the build is for.
    ///
    /// Pull request builds report the PR's source branch, push builds the
    /// pushed branch.
    pub fn branch(&self, env: &EnvSnapshot) -> Option<String> {
        let branch = match self {
            CiProvider::Travis => match env.get("TRAVIS_PULL_REQUEST") {
                None | Some("false") => env.get("TRAVIS_BRANCH"),
                Some(_) => env.get("TRAVIS_PULL_REQUEST_BRANCH"),
            },
            CiProvider::GithubActions => env
                .get("GITHUB_HEAD_REF")
                .or_else(|| env.get("GITHUB_REF_NAME")),
            CiProvider::Unknown => None,
        };
        branch.map(str::to_string)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CiProvider::Travis => "travis",
            CiProvider::GithubActions => "github_actions",
            CiProvider::Unknown => "unknown",
        }
    }
}

/// Coverage capture and upload settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageSettings {
    /// Crate providing the `cargo coverage` subcommand.
    pub tool: String,

    /// Output directory for coverage reports, relative to the working directory.
    pub report_dir: PathBuf,

    /// URL of the coverage service's upload script.
    pub upload_url: String,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            tool: DEFAULT_COVERAGE_TOOL.to_string(),
            report_dir: PathBuf::from(DEFAULT_COVERAGE_DIR),
            upload_url: DEFAULT_COVERAGE_UPLOAD_URL.to_string(),
        }
    }
}

/// Immutable pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Cross-compilation target triple.
    pub target: Option<String>,

    /// Collect and upload coverage.
    pub coverage: bool,

    /// Run the fuzz regression pass (and the continuous job on mainline).
    pub fuzz: bool,

    /// Detected CI provider.
    pub provider: CiProvider,

    /// Resolved branch name, if the provider reports one.
    pub branch: Option<String>,

    /// Branch that triggers continuous fuzzing.
    pub mainline_branch: String,

    /// Coverage tool and upload settings.
    pub coverage_settings: CoverageSettings,

    /// Fuzzing service helper script.
    pub fuzz_script: PathBuf,

    /// Directory every stage runs in.
    pub working_dir: PathBuf,

    /// Per-stage timeout in seconds (0 = none).
    pub stage_timeout_secs: u64,
}

impl PipelineConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    /// Read the configuration from explicit variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_snapshot(&EnvSnapshot::from_pairs(vars))
    }

    pub fn from_snapshot(env: &EnvSnapshot) -> Self {
        let provider = CiProvider::detect(env);
        Self {
            target: env.get(ENV_TARGET).map(str::to_string),
            coverage: env.is_set(ENV_COVERAGE),
            fuzz: env.is_set(ENV_FUZZ),
            provider,
            branch: provider.branch(env),
            mainline_branch: env
                .get(ENV_MAINLINE_BRANCH)
                .unwrap_or(DEFAULT_MAINLINE_BRANCH)
                .to_string(),
            coverage_settings: CoverageSettings::default(),
            fuzz_script: PathBuf::from(DEFAULT_FUZZ_SCRIPT),
            working_dir: PathBuf::from("."),
            stage_timeout_secs: 0,
        }
    }

    pub fn with_mainline_branch(mut self, branch: impl Into<String>) -> Self {
        self.mainline_branch = branch.into();
        self
    }

    pub fn with_fuzz_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.fuzz_script = script.into();
        self
    }

    pub fn with_coverage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.coverage_settings.report_dir = dir.into();
        self
    }

    pub fn with_coverage_upload_url(mut self, url: impl Into<String>) -> Self {
        self.coverage_settings.upload_url = url.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_stage_timeout(mut self, timeout_secs: u64) -> Self {
        self.stage_timeout_secs = timeout_secs;
        self
    }

    /// Reject flag combinations the optional stages cannot honor.
    ///
    /// Coverage instrumentation and fuzzing are defined for native builds only.
    pub fn validate(&self) -> Result<()> {
        if let Some(target) = &self.target {
            if self.coverage {
                return Err(PipelineError::ConfigConflict(format!(
                    "cannot record coverage while cross compiling (TARGET={target})"
                )));
            }
            if self.fuzz {
                return Err(PipelineError::ConfigConflict(format!(
                    "cannot fuzz while cross compiling (TARGET={target})"
                )));
            }
        }
        Ok(())
    }

    /// Toolchain wrapper for the build, test, bench and doc stages.
    pub fn toolchain(&self) -> Toolchain {
        match &self.target {
            Some(target) => Toolchain::Cross {
                target: target.clone(),
            },
            None => Toolchain::Native,
        }
    }

    /// Whether the build is on the mainline branch.
    pub fn on_mainline(&self) -> bool {
        self.branch.as_deref() == Some(self.mainline_branch.as_str())
    }
}
