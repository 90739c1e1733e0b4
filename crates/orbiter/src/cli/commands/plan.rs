//! Plan command - show the execution plan without running

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::{debug, info};

use orbiter_core::config::load_config_or_default;
use orbiter_core::{Toolchain, ToolchainLocator};
use orbiter_tasks::TaskGraph;

use crate::cli::commands::run::run_context;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::driver::{build_graph, collect_actions};

/// Show the execution plan without running
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Artifacts to plan for
    #[arg(required = true)]
    pub artifacts: Vec<PathBuf>,
}

impl PlanCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd)?;
        info!(artifacts = self.artifacts.len(), "executing plan command");

        // nothing is executed, so a missing toolchain only degrades descriptions
        let toolchain = ToolchainLocator::new(config.toolchain.clone())
            .locate()
            .unwrap_or_else(|e| {
                debug!(error = %e, "planning without a located toolchain");
                Toolchain {
                    adb: PathBuf::from("adb"),
                    android_home: None,
                    bootclasspath: config.toolchain.bootclasspath.clone(),
                }
            });

        let actions = collect_actions(&self.artifacts)?;
        let ctx = Arc::new(run_context(&config, &cwd, &toolchain, None, true));
        let graph = build_graph(&ctx, &actions)?;

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&plan_json(&graph))?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!(
                        "{}",
                        output::header(&format!(
                            "Execution plan ({}, {})",
                            output::plural(actions.len(), "action"),
                            output::plural(graph.len(), "task")
                        ))
                    );
                    println!();
                    println!("{}", graph.execution_plan());
                    println!("{}", style("[PLAN ONLY - no tasks were executed]").yellow().bold());
                }
            }
        }
        Ok(())
    }
}

fn plan_json(graph: &TaskGraph) -> serde_json::Value {
    let waves: Vec<serde_json::Value> = graph
        .waves()
        .iter()
        .enumerate()
        .map(|(i, wave)| {
            serde_json::json!({
                "wave": i,
                "tasks": wave
                    .iter()
                    .map(|h| {
                        serde_json::json!({
                            "name": graph.name(*h),
                            "after": graph
                                .dependencies(*h)
                                .iter()
                                .map(|d| graph.name(*d))
                                .collect::<Vec<_>>(),
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::json!({ "waves": waves })
}
