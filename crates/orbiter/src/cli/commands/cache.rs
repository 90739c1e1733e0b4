//! Cache management command

use std::path::Path;
use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;

use orbiter_core::config::load_config_or_default;
use orbiter_tasks::LocalCacheStore;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Host artifact cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
}

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: cache.max_age_days)
    #[arg(long)]
    pub max_age_days: Option<u64>,
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd)?;
        let store = LocalCacheStore::new(cwd.join(&config.cache.dir));

        match &self.action {
            CacheAction::Prune(cmd) => {
                cmd.execute(&store, cmd.max_age_days.unwrap_or(config.cache.max_age_days), cli)
            }
            CacheAction::Status(cmd) => cmd.execute(&store, cli),
            CacheAction::Clean(cmd) => cmd.execute(&store, cli),
        }
    }
}

fn max_age(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

impl CachePruneCommand {
    fn execute(&self, store: &LocalCacheStore, max_age_days: u64, cli: &Cli) -> anyhow::Result<()> {
        let max_age = max_age(max_age_days);

        if cli.shows_progress() {
            output::info(&format!(
                "Pruning cache entries older than {} days...",
                max_age_days
            ));
        }

        let stats = store.prune(max_age)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} of {} entries ({} kept)",
                style("✓").green(),
                stats.removed,
                stats.total,
                stats.kept
            );
        }

        Ok(())
    }
}

impl CacheStatusCommand {
    fn execute(&self, store: &LocalCacheStore, cli: &Cli) -> anyhow::Result<()> {
        let stats = store.status()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": store.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Artifact Cache Status"));
            println!();
            println!(
                "{}",
                output::key_value(
                    "Location",
                    &output::path_style().apply_to(store.cache_dir().display()).to_string()
                )
            );
            println!("{}", output::key_value("Entries", &stats.entries.to_string()));
            println!(
                "{}",
                output::key_value("Size", &style(stats.formatted_size()).yellow().to_string())
            );
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, store: &LocalCacheStore, cli: &Cli) -> anyhow::Result<()> {
        let cache_dir = store.cache_dir();

        if !cache_dir.exists() {
            if !cli.quiet {
                output::success("Cache directory does not exist.");
            }
            return Ok(());
        }

        if !self.yes && !confirm_clean(cache_dir)? {
            println!("{}", style("Aborted.").yellow());
            return Ok(());
        }

        let stats = store.clean()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "removed": stats.entries,
                "freed": stats.total_size,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} entries ({}) from {}",
                stats.entries,
                stats.formatted_size(),
                output::path_style().apply_to(cache_dir.display())
            ));
        }

        Ok(())
    }
}

fn confirm_clean(cache_dir: &Path) -> anyhow::Result<bool> {
    Ok(dialoguer::Confirm::new()
        .with_prompt(format!(
            "Remove all cached entries at {}?",
            cache_dir.display()
        ))
        .default(false)
        .interact()?)
}
