//! Run command - compile, push and run artifacts on the target

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use thiserror::Error;
use tracing::{info, warn};

use orbiter_core::config::load_config_or_default;
use orbiter_core::{Config, Toolchain, ToolchainLocator};
use orbiter_remote::{AdbTransport, RemoteShell};
use orbiter_tasks::{
    RunReport, SchedulerOptions, TaskEvent, TaskReporter, TaskReporterRegistry, TaskScheduler,
    TaskState,
};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::driver::{build_graph, collect_actions, compiler, RunContext};

/// Why a run did not succeed
#[derive(Debug, Error)]
pub enum RunError {
    /// Interrupted before every task settled
    #[error("Run aborted")]
    Aborted,

    /// At least one task failed or was skipped
    #[error("{failed} of {total} tasks did not succeed")]
    Failed { failed: usize, total: usize },
}

/// Compile, push and run artifacts on the target
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Artifacts to run; each becomes an action named after its file stem
    #[arg(required = true)]
    pub artifacts: Vec<PathBuf>,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Disable the host and device caches
    #[arg(long)]
    pub no_cache: bool,

    /// Device serial, overriding target.serial
    #[arg(short, long, env = "ANDROID_SERIAL")]
    pub serial: Option<String>,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, config_path) = load_config_or_default(&cwd)?;
        info!(
            config = %config_path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".to_string()),
            artifacts = self.artifacts.len(),
            "executing run command"
        );

        let toolchain = ToolchainLocator::new(config.toolchain.clone())
            .locate()
            .context("Failed to locate the toolchain")?;
        let actions = collect_actions(&self.artifacts)?;
        let ctx = Arc::new(run_context(
            &config,
            &cwd,
            &toolchain,
            self.serial.as_deref(),
            !self.no_cache,
        ));
        let graph = build_graph(&ctx, &actions)?;

        if cli.shows_progress() {
            println!();
            output::info(&format!(
                "{} for {} on {}",
                output::plural(graph.len(), "task"),
                output::plural(actions.len(), "action"),
                style(ctx.shell.describe()).cyan()
            ));
            if self.no_cache {
                output::warning("Caching disabled for this run");
            }
            if cli.verbose {
                println!();
                println!("{}", graph.execution_plan());
            }
            println!();
        }

        let mut reporters = TaskReporterRegistry::new();
        if cli.shows_progress() {
            reporters.register(ConsoleReporter::new(cli.verbose));
        }
        let options = SchedulerOptions {
            concurrency: self.concurrency.unwrap_or(config.tasks.concurrency),
        };
        let scheduler = TaskScheduler::new(options, Arc::new(reporters));
        let report = scheduler.execute_until(graph, interrupted()).await;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&summary_json(&report))?);
        }
        finish(&report, cli)
    }
}

/// Assemble the shared run context for a located toolchain
pub(crate) fn run_context(
    config: &Config,
    root: &Path,
    toolchain: &Toolchain,
    serial: Option<&str>,
    use_cache: bool,
) -> RunContext {
    let mut transport = AdbTransport::new(&toolchain.adb);
    if let Some(serial) = serial.or(config.target.serial.as_deref()) {
        transport = transport.with_serial(serial);
    }
    let shell = RemoteShell::new(Arc::new(transport))
        .with_roots(&config.target.roots)
        .with_command_timeout(Duration::from_secs(config.timeouts.command_secs));
    let compiler = compiler::from_config(&config.compile, toolchain, root);
    RunContext::from_config(config, root, shell, compiler, use_cache)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    warn!("interrupt received, aborting run");
}

fn summary_json(report: &RunReport) -> serde_json::Value {
    serde_json::json!({
        "total": report.results.len(),
        "succeeded": report.count(TaskState::Success),
        "failed": report.count(TaskState::Failure),
        "skipped": report.count(TaskState::Skipped),
        "cached": report.cached(),
        "aborted": report.aborted,
        "duration_secs": report.duration.as_secs_f64(),
        "tasks": report.results,
    })
}

fn finish(report: &RunReport, cli: &Cli) -> anyhow::Result<()> {
    if report.aborted {
        return Err(RunError::Aborted.into());
    }
    if report.is_success() {
        return Ok(());
    }

    let non_success = report.non_success();
    if cli.shows_progress() {
        println!();
        println!(
            "  {} {}/{} tasks did not succeed:",
            style("✗").red().bold(),
            non_success.len(),
            report.results.len()
        );
        for result in &non_success {
            println!(
                "    {} {} ({}): {}",
                style("✗").red(),
                result.name,
                result.state,
                result.reason.as_deref().unwrap_or("")
            );
        }
    }
    Err(RunError::Failed {
        failed: non_success.len(),
        total: report.results.len(),
    }
    .into())
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { name, description } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(name).bold(),
                    if self.verbose {
                        style(format!("({})", description)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output { name, line } => {
                if self.verbose {
                    println!("    {} {}", style(format!("[{}]", name)).dim(), line);
                }
            }
            TaskEvent::Completed {
                name,
                duration,
                cached,
            } => {
                if *cached {
                    println!(
                        "  {} {} {} {}",
                        style("✓").green(),
                        style(name).green(),
                        style("(cached)").cyan(),
                        style(output::seconds(*duration)).dim()
                    );
                } else {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(name).green(),
                        style(output::seconds(*duration)).dim()
                    );
                }
            }
            TaskEvent::Failed {
                name,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(name).red(),
                    style(output::seconds(*duration)).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Skipped { name, reason } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(name).yellow(),
                    style(format!("({})", reason)).dim()
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                cached,
                duration,
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} skipped, {} cached ({})",
                    if *failed == 0 && *skipped == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    skipped,
                    cached,
                    output::seconds(*duration)
                );
            }
        }
    }
}
