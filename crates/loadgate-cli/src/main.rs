use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use loadgate_core::{BaselineComparator, ConfigError, RunConfigFile, RunPlan, RunSummary};
use loadgate_runner::{LoadTestOrchestrator, RunError, RunProgress};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod http;
mod report;

use http::ReqwestExecutor;

/// Exit code when the configuration is rejected before any load is generated.
const EXIT_CONFIG_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "loadgate")]
#[command(about = "Load-profile runner with threshold quality gates", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a load test and evaluate its quality gate
    Run(RunArgs),

    /// Resolve a configuration and print the plan without generating load
    Validate {
        /// Run configuration (YAML, TOML or JSON)
        #[arg(long, env = "LOADGATE_CONFIG")]
        config: PathBuf,
    },

    /// Compare the baselines of two result artifacts
    Compare {
        /// Earlier run summary
        #[arg(long)]
        baseline: PathBuf,

        /// Later run summary
        #[arg(long)]
        current: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Run configuration (YAML, TOML or JSON)
    #[arg(long, env = "LOADGATE_CONFIG")]
    config: PathBuf,

    /// Write the JSON result artifact here
    #[arg(long)]
    out: Option<PathBuf>,

    /// Prior result artifact to check for regressions
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Write engine self-telemetry in Prometheus text format here
    #[arg(long)]
    prometheus_out: Option<PathBuf>,

    /// Disable the live progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Run(args) => run(args, cli.quiet).await,
        Command::Validate { config } => validate(&config),
        Command::Compare { baseline, current } => compare(&baseline, &current),
    };

    match result {
        Ok(code) => code,
        Err(err) if is_config_error(&err) => {
            eprintln!("\n❌ Configuration error: {err:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
        Err(err) => {
            eprintln!("\n❌ loadgate failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging
fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(env_filter).with_target(false).init();
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<RunError>().is_some_and(RunError::is_config)
    })
}

fn load_plan(path: &Path) -> Result<RunPlan> {
    let plan = RunConfigFile::load(path)
        .and_then(|file| file.resolve())
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    Ok(plan)
}

async fn run(args: RunArgs, quiet: bool) -> Result<ExitCode> {
    let plan = load_plan(&args.config)?;

    let prior = match &args.baseline {
        Some(path) => {
            let summary = RunSummary::load_json(path).map_err(|e| {
                ConfigError::Load(format!("baseline {}: {e}", path.display()))
            })?;
            info!(path = %path.display(), run_id = %summary.run_id, "Loaded prior baseline");
            Some(summary.baseline)
        }
        None => None,
    };

    let executor = Arc::new(ReqwestExecutor::new().context("failed to build HTTP client")?);
    let mut orchestrator = LoadTestOrchestrator::new(plan, executor)?;
    if let Some(prior) = prior {
        orchestrator = orchestrator.with_baseline(prior);
    }
    let telemetry = orchestrator.telemetry().clone();

    let progress = if args.no_progress || quiet {
        None
    } else {
        Some(tokio::spawn(show_progress(orchestrator.subscribe())))
    };

    let summary = orchestrator.run_until(interrupted()).await?;
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    println!("{}", report::render_summary(&summary));

    if let Some(path) = &args.out {
        summary
            .write_json(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote result artifact");
    }
    if let Some(path) = &args.prometheus_out {
        tokio::fs::write(path, telemetry.encode()?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(ExitCode::from(summary.verdict.exit_code()))
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, ramping down");
    } else {
        std::future::pending::<()>().await;
    }
}

async fn show_progress(mut progress: watch::Receiver<RunProgress>) {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));

    while progress.changed().await.is_ok() {
        let current = progress.borrow_and_update().clone();
        if let Some(total) = current.total {
            bar.set_length(total.as_secs());
        }
        bar.set_position(current.elapsed.as_secs());
        bar.set_message(format!(
            "{} vus {}/{}",
            current.phase, current.active, current.target
        ));
    }

    bar.finish_and_clear();
}

fn validate(path: &Path) -> Result<ExitCode> {
    let plan = load_plan(path)?;
    println!("{}", report::render_plan(&plan));
    Ok(ExitCode::SUCCESS)
}

fn compare(baseline: &Path, current: &Path) -> Result<ExitCode> {
    let before = RunSummary::load_json(baseline)
        .with_context(|| format!("failed to read {}", baseline.display()))?;
    let after = RunSummary::load_json(current)
        .with_context(|| format!("failed to read {}", current.display()))?;

    let comparison = BaselineComparator::default().compare(&before.baseline, &after.baseline);
    println!("{} → {}", before.name, after.name);
    print!("{}", report::render_comparison(&comparison));
    Ok(ExitCode::SUCCESS)
}
