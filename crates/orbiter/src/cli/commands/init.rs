//! Init command

use std::path::PathBuf;

use clap::Args;
use console::style;
use dialoguer::Confirm;
use tracing::info;

use orbiter_core::config::defaults::{default_config_toml, DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};

use crate::cli::output;
use crate::cli::Cli;

/// Write a default orbiter.toml
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Write every setting instead of the short template
    #[arg(long)]
    pub full: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, full = self.full, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self
            .output
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_TOML));

        if config_path.exists() && !self.force {
            if cli.quiet {
                anyhow::bail!(
                    "Configuration file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                );
            }

            let overwrite = Confirm::new()
                .with_prompt(format!(
                    "Configuration file already exists at {}. Overwrite?",
                    config_path.display()
                ))
                .default(false)
                .interact()?;

            if !overwrite {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        std::fs::write(&config_path, self.content())?;

        if !cli.quiet {
            output::success(&format!(
                "Created configuration at {}",
                output::path_style().apply_to(config_path.display())
            ));
            println!();
            println!("Next steps:");
            println!("  1. Edit {} to describe your target", config_path.display());
            println!("  2. Run {} to verify your setup", style("orbiter doctor").cyan());
            println!("  3. Run {} to run your artifacts", style("orbiter run <artifacts>").cyan());
        }

        Ok(())
    }

    fn content(&self) -> String {
        if self.full {
            default_config_toml()
        } else {
            DEFAULT_CONFIG_TEMPLATE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_writes_template_and_refuses_overwrite_when_quiet() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("orbiter.toml");
        let path_arg = path.display().to_string();

        let cli = Cli::parse_from(["orbiter", "--quiet", "init", "--output", &path_arg]);
        let crate::cli::Commands::Init(ref cmd) = cli.command else {
            panic!("expected init");
        };
        cmd.execute(&cli).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[target]"));

        assert!(cmd.execute(&cli).is_err());
    }

    #[test]
    fn test_full_config_lists_every_section() {
        let cmd = InitCommand {
            force: true,
            full: true,
            output: None,
        };
        let content = cmd.content();
        assert!(content.contains("[timeouts]"));
        assert!(content.contains("run_secs"));
    }
}
