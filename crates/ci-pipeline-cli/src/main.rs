//! ci-pipeline - CI stage runner CLI
//!
//! Reads `TARGET`, `COVERAGE`, `FUZZ` and the CI provider's branch variables
//! from the environment and runs the build/test/bench/doc pipeline.
//!
//! ## Commands
//!
//! - `run`: execute the pipeline, exiting with the failing stage's code
//! - `plan`: print the stages the current environment selects

use anyhow::{Context, Result};
use ci_pipeline::{
    init_tracing, render_summary, write_report_json, CiPipeline, EnvSnapshot, OutputMode,
    PipelineConfig, PipelinePlan, PipelineReport, PipelineResult, ProcessExecutor, Toolchain,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "ci-pipeline")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Environment-driven CI pipeline for Rust crates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Capture stage output instead of streaming it
        #[arg(long)]
        capture: bool,

        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the planned stages without running them
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: PlanFormat,
    },
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Directory to run every stage in
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// Branch whose builds trigger continuous fuzzing
    #[arg(long, env = "CI_MAINLINE_BRANCH")]
    mainline_branch: Option<String>,

    /// Fuzzing service helper script
    #[arg(long)]
    fuzz_script: Option<PathBuf>,

    /// Coverage report output directory
    #[arg(long)]
    coverage_dir: Option<PathBuf>,

    /// Per-stage timeout in seconds (0 = none)
    #[arg(long, default_value = "0")]
    timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let env = EnvSnapshot::capture();
    let code = match cli.command {
        Commands::Run {
            config,
            capture,
            report,
        } => {
            let config = build_config(&config, &env)?;
            let output = if capture {
                OutputMode::Capture
            } else {
                OutputMode::Inherit
            };
            cmd_run(&config, output, report.as_deref()).await?
        }
        Commands::Plan { config, format } => {
            let config = build_config(&config, &env)?;
            cmd_plan(&config, format)?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Combine the environment with command-line overrides.
fn build_config(args: &ConfigArgs, env: &EnvSnapshot) -> Result<PipelineConfig> {
    let workdir = std::fs::canonicalize(&args.workdir)
        .with_context(|| format!("Working directory {:?} does not exist", args.workdir))?;

    let mut config = PipelineConfig::from_snapshot(env)
        .with_working_dir(workdir)
        .with_stage_timeout(args.timeout);

    if let Some(branch) = &args.mainline_branch {
        config = config.with_mainline_branch(branch.clone());
    }
    if let Some(script) = &args.fuzz_script {
        config = config.with_fuzz_script(script.clone());
    }
    // Relative scripts are resolved here rather than against the child's cwd.
    if config.fuzz_script.is_relative() {
        let script = config.fuzz_script.strip_prefix(".").unwrap_or(&config.fuzz_script);
        let resolved = config.working_dir.join(script);
        config = config.with_fuzz_script(resolved);
    }
    if let Some(dir) = &args.coverage_dir {
        config = config.with_coverage_dir(dir.clone());
    }
    Ok(config)
}

/// Run the pipeline and return the process exit code.
async fn cmd_run(config: &PipelineConfig, output: OutputMode, report: Option<&Path>) -> Result<i32> {
    let plan = match CiPipeline::plan(config) {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "Refusing to run pipeline");
            return Ok(e.exit_code());
        }
    };

    info!(
        toolchain = %toolchain_label(&plan.toolchain),
        provider = config.provider.name(),
        branch = config.branch.as_deref().unwrap_or("<none>"),
        "Running CI pipeline in {}",
        plan.working_dir.display()
    );

    let executor = ProcessExecutor::new(output);
    let result = CiPipeline::run(&executor, &plan).await;

    Ok(finish_run(config, &plan, &result, report))
}

/// Print the summary and write the report; the run's own exit code stands
/// even when the report cannot be written.
fn finish_run(
    config: &PipelineConfig,
    plan: &PipelinePlan,
    result: &PipelineResult,
    report: Option<&Path>,
) -> i32 {
    let pipeline_report = PipelineReport::new(config, plan, result);
    eprint!("{}", render_summary(&pipeline_report));

    if let Some(path) = report {
        match write_report_json(path, &pipeline_report) {
            Ok(()) => info!(path = %path.display(), "Wrote run report"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to write run report"),
        }
    }

    result.exit_code()
}

/// Print the plan and return the process exit code.
fn cmd_plan(config: &PipelineConfig, format: PlanFormat) -> Result<i32> {
    let plan = match CiPipeline::plan(config) {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "Configuration rejected");
            return Ok(e.exit_code());
        }
    };

    match format {
        PlanFormat::Text => print!("{}", render_plan(&plan)),
        PlanFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("serialize plan")?
        ),
    }
    Ok(0)
}

fn toolchain_label(toolchain: &Toolchain) -> String {
    match toolchain {
        Toolchain::Native => "cargo (native)".to_string(),
        Toolchain::Cross { target } => format!("cross ({target})"),
    }
}

fn render_plan(plan: &PipelinePlan) -> String {
    let mut out = format!("Toolchain: {}\n", toolchain_label(&plan.toolchain));
    out.push_str(&format!("Digest: {}\n", plan.digest));
    for (i, stage) in plan.stages.iter().enumerate() {
        out.push_str(&format!("{:>2}. {:<22} {}\n", i + 1, stage.name, stage.command_line()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_pipeline::fakes::RecordingExecutor;

    fn args(workdir: &Path) -> ConfigArgs {
        ConfigArgs {
            workdir: workdir.to_path_buf(),
            mainline_branch: None,
            fuzz_script: None,
            coverage_dir: None,
            timeout: 0,
        }
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "ci-pipeline",
            "--json",
            "run",
            "--capture",
            "--timeout",
            "600",
            "--report",
            "out/report.json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                config,
                capture,
                report,
            } => {
                assert!(capture);
                assert_eq!(config.timeout, 600);
                assert_eq!(report, Some(PathBuf::from("out/report.json")));
            }
            Commands::Plan { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_build_config_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = args(dir.path());
        overrides.mainline_branch = Some("main".to_string());
        overrides.fuzz_script = Some(PathBuf::from("ci/fuzzit.sh"));
        overrides.coverage_dir = Some(PathBuf::from("cov"));
        overrides.timeout = 30;

        let env = EnvSnapshot::from_pairs([("FUZZ", "1"), ("TRAVIS_BRANCH", "main")]);
        let config = build_config(&overrides, &env).unwrap();

        assert!(config.fuzz);
        assert!(config.on_mainline());
        assert_eq!(config.fuzz_script, config.working_dir.join("ci/fuzzit.sh"));
        assert_eq!(config.coverage_settings.report_dir, PathBuf::from("cov"));
        assert_eq!(config.stage_timeout_secs, 30);
        assert!(config.working_dir.is_absolute());
    }

    #[test]
    fn test_build_config_resolves_fuzz_script_against_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = std::fs::canonicalize(dir.path()).unwrap();

        let config = build_config(&args(dir.path()), &EnvSnapshot::default()).unwrap();
        assert_eq!(config.fuzz_script, workdir.join("fuzzit.sh"));

        let mut absolute = args(dir.path());
        absolute.fuzz_script = Some(PathBuf::from("/opt/fuzz/fuzzit.sh"));
        let config = build_config(&absolute, &EnvSnapshot::default()).unwrap();
        assert_eq!(config.fuzz_script, PathBuf::from("/opt/fuzz/fuzzit.sh"));
    }

    #[tokio::test]
    async fn test_report_write_failure_keeps_stage_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_config(&args(dir.path()), &EnvSnapshot::default()).unwrap();
        let plan = CiPipeline::plan(&config).unwrap();
        let executor = RecordingExecutor::new().with_exit_code("test_debug", 101);
        let result = CiPipeline::run(&executor, &plan).await;

        // A regular file where the report's parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let report = blocker.join("report.json");

        assert_eq!(finish_run(&config, &plan, &result, Some(&report)), 101);
        assert!(!report.exists());
    }

    #[tokio::test]
    async fn test_report_write_failure_keeps_passing_run_green() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_config(&args(dir.path()), &EnvSnapshot::default()).unwrap();
        let plan = CiPipeline::plan(&config).unwrap();
        let result = CiPipeline::run(&RecordingExecutor::new(), &plan).await;

        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        assert_eq!(finish_run(&config, &plan, &result, Some(&blocker.join("r.json"))), 0);
    }

    #[tokio::test]
    async fn test_finish_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_config(&args(dir.path()), &EnvSnapshot::default()).unwrap();
        let plan = CiPipeline::plan(&config).unwrap();
        let result = CiPipeline::run(&RecordingExecutor::new(), &plan).await;
        let report = dir.path().join("out").join("report.json");

        assert_eq!(finish_run(&config, &plan, &result, Some(&report)), 0);
        assert!(report.exists());
    }

    #[test]
    fn test_build_config_rejects_missing_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(build_config(&args(&missing), &EnvSnapshot::default()).is_err());
    }

    #[tokio::test]
    async fn test_cmd_run_conflict_exits_nonzero_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvSnapshot::from_pairs([("TARGET", "aarch64-unknown-linux-gnu"), ("COVERAGE", "1")]);
        let config = build_config(&args(dir.path()), &env).unwrap();
        let report = dir.path().join("report.json");

        let code = cmd_run(&config, OutputMode::Capture, Some(&report)).await.unwrap();

        assert_eq!(code, 1);
        assert!(!report.exists(), "No report for a rejected configuration");
    }

    #[test]
    fn test_cmd_plan_conflict_exits_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvSnapshot::from_pairs([("TARGET", "aarch64-unknown-linux-gnu"), ("FUZZ", "1")]);
        let config = build_config(&args(dir.path()), &env).unwrap();
        assert_eq!(cmd_plan(&config, PlanFormat::Text).unwrap(), 1);
    }

    #[test]
    fn test_render_plan_lists_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvSnapshot::from_pairs([("TARGET", "aarch64-unknown-linux-gnu")]);
        let config = build_config(&args(dir.path()), &env).unwrap();
        let plan = CiPipeline::plan(&config).unwrap();

        let text = render_plan(&plan);
        assert!(text.starts_with("Toolchain: cross (aarch64-unknown-linux-gnu)"));
        let build = text.find("build").unwrap();
        let release = text.find("test_release").unwrap();
        assert!(build < release);
        assert!(text.contains("cargo test -v --release"));
    }
}
