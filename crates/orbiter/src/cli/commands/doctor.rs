//! Doctor command - check the toolchain and configuration

use std::path::Path;
use std::process::Command;

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::info;

use orbiter_core::config::load_config_or_default;
use orbiter_core::{Config, Toolchain, ToolchainError, ToolchainLocator};

use crate::cli::{Cli, OutputFormat};

/// Check the toolchain and configuration
#[derive(Debug, Args)]
pub struct DoctorCommand {
    /// Show suggestions for fixing issues
    #[arg(long)]
    pub fix: bool,
}

/// Result of a single check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: Option<String>,
    pub version: Option<String>,
    pub fix_suggestion: Option<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: Some(message.into()),
            version: None,
            fix_suggestion: None,
        }
    }

    fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix_suggestion = Some(fix.into());
        self
    }
}

/// Status of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
    Skip,
}

/// Summary of all checks
#[derive(Debug, Serialize)]
pub struct DoctorSummary {
    pub checks: Vec<CheckResult>,
    pub ok_count: usize,
    pub warn_count: usize,
    pub fail_count: usize,
    pub skip_count: usize,
}

impl DoctorSummary {
    fn new(checks: Vec<CheckResult>) -> Self {
        let count = |status: CheckStatus| checks.iter().filter(|c| c.status == status).count();
        Self {
            ok_count: count(CheckStatus::Ok),
            warn_count: count(CheckStatus::Warn),
            fail_count: count(CheckStatus::Fail),
            skip_count: count(CheckStatus::Skip),
            checks,
        }
    }
}

impl DoctorCommand {
    /// Execute the doctor command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(fix = self.fix, "executing doctor command");
        let cwd = std::env::current_dir()?;

        if cli.shows_progress() {
            println!("{}", style("Checking environment...").bold());
            println!();
        }

        let mut checks = Vec::new();
        let config = match load_config_or_default(&cwd) {
            Ok((config, path)) => {
                checks.push(match path {
                    Some(path) => CheckResult::new("Configuration", CheckStatus::Ok, path.display().to_string()),
                    None => CheckResult::new("Configuration", CheckStatus::Skip, "No config file, using defaults")
                        .with_fix("Run 'orbiter init' to write orbiter.toml"),
                });
                config
            }
            Err(e) => {
                checks.push(
                    CheckResult::new("Configuration", CheckStatus::Fail, e.to_string())
                        .with_fix("Fix the reported value in orbiter.toml"),
                );
                Config::default()
            }
        };

        let located = ToolchainLocator::new(config.toolchain.clone()).locate();
        checks.extend(toolchain_checks(&located));
        if let Ok(toolchain) = &located {
            checks.push(device_check(&toolchain.adb, config.target.serial.as_deref()));
        }
        checks.push(compile_check(&config));

        let summary = DoctorSummary::new(checks);
        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Text => {
                self.print_results(&summary.checks, cli);
                if !cli.quiet {
                    self.print_summary(&summary);
                }

                if self.fix && (summary.fail_count > 0 || summary.warn_count > 0) {
                    println!();
                    println!("{}", style("Suggested fixes:").bold());
                    for check in &summary.checks {
                        if check.status == CheckStatus::Fail || check.status == CheckStatus::Warn {
                            if let Some(ref fix) = check.fix_suggestion {
                                println!(
                                    "  {} {}: {}",
                                    status_icon(check.status),
                                    style(&check.name).bold(),
                                    fix
                                );
                            }
                        }
                    }
                }
            }
        }

        // a missing toolchain gets its own exit code
        if let Err(e) = located {
            return Err(e.into());
        }
        if summary.fail_count > 0 {
            anyhow::bail!("{} check(s) failed", summary.fail_count);
        }
        Ok(())
    }

    fn print_results(&self, checks: &[CheckResult], cli: &Cli) {
        if cli.quiet {
            return;
        }

        for check in checks {
            let icon = status_icon(check.status);
            let name = &check.name;
            let msg = check.message.as_deref().unwrap_or("");

            match check.status {
                CheckStatus::Ok => {
                    println!("  {} {} {}", icon, style(name).green(), style(msg).dim());
                }
                CheckStatus::Warn => {
                    println!("  {} {} {}", icon, style(name).yellow(), style(msg).dim());
                }
                CheckStatus::Fail => {
                    println!("  {} {} {}", icon, style(name).red(), style(msg).dim());
                }
                CheckStatus::Skip => {
                    println!("  {} {} {}", icon, style(name).dim(), style(msg).dim());
                }
            }
        }
    }

    fn print_summary(&self, summary: &DoctorSummary) {
        println!();
        let total = summary.ok_count + summary.warn_count + summary.fail_count + summary.skip_count;

        if summary.fail_count == 0 && summary.warn_count == 0 {
            println!(
                "{} All {} checks passed!",
                style("✓").green().bold(),
                summary.ok_count
            );
        } else {
            println!(
                "Summary: {} ok, {} warnings, {} failed, {} skipped (out of {})",
                style(summary.ok_count).green(),
                style(summary.warn_count).yellow(),
                style(summary.fail_count).red(),
                style(summary.skip_count).dim(),
                total
            );

            if !self.fix {
                println!();
                println!(
                    "{} {} issue(s) found. Run '{}' for suggestions.",
                    style("!").red().bold(),
                    summary.fail_count + summary.warn_count,
                    style("orbiter doctor --fix").cyan()
                );
            }
        }
    }
}

fn toolchain_checks(located: &Result<Toolchain, ToolchainError>) -> Vec<CheckResult> {
    let toolchain = match located {
        Ok(toolchain) => toolchain,
        Err(e) => {
            return vec![CheckResult::new("adb", CheckStatus::Fail, e.to_string())
                .with_fix("Install Android platform-tools, set ANDROID_HOME or toolchain.adb")]
        }
    };

    let version = get_command_version(&toolchain.adb, &["version"])
        .map(|v| v.lines().next().unwrap_or_default().to_string());
    let mut results = vec![
        CheckResult::new("adb", CheckStatus::Ok, toolchain.adb.display().to_string()).with_version(version),
    ];

    results.push(match &toolchain.android_home {
        Some(home) => CheckResult::new("Android SDK", CheckStatus::Ok, home.display().to_string()),
        None => CheckResult::new("Android SDK", CheckStatus::Skip, "ANDROID_HOME not set")
            .with_fix("Set ANDROID_HOME to your SDK root"),
    });

    results.push(if toolchain.bootclasspath.is_empty() {
        CheckResult::new("Bootclasspath", CheckStatus::Skip, "Not configured")
    } else {
        CheckResult::new("Bootclasspath", CheckStatus::Ok, toolchain.bootclasspath_arg())
    });
    results
}

fn device_check(adb: &Path, serial: Option<&str>) -> CheckResult {
    let Some(listing) = get_command_version(adb, &["devices"]) else {
        return CheckResult::new("Device", CheckStatus::Warn, "'adb devices' failed")
            .with_fix("Run 'adb start-server'");
    };
    let devices = parse_devices(&listing);

    match serial {
        Some(serial) if devices.iter().any(|d| d == serial) => {
            CheckResult::new("Device", CheckStatus::Ok, serial)
        }
        Some(serial) => CheckResult::new("Device", CheckStatus::Warn, format!("{} not connected", serial))
            .with_fix("Connect the device or update target.serial"),
        None if devices.is_empty() => CheckResult::new("Device", CheckStatus::Warn, "No device connected")
            .with_fix("Start an emulator or connect a device"),
        None => CheckResult::new("Device", CheckStatus::Ok, devices.join(", ")),
    }
}

/// Serials of attached devices in `adb devices` output
fn parse_devices(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

fn compile_check(config: &Config) -> CheckResult {
    let Some(command) = &config.compile.command else {
        return CheckResult::new("Compiler", CheckStatus::Skip, "No compile command, artifacts are pushed as-is");
    };
    let program = command.split_whitespace().next().unwrap_or_default();
    match which::which(program) {
        Ok(path) => CheckResult::new("Compiler", CheckStatus::Ok, path.display().to_string()),
        Err(_) => CheckResult::new("Compiler", CheckStatus::Warn, format!("'{}' not found on PATH", program))
            .with_fix("Install the compiler or fix compile.command"),
    }
}

fn status_icon(status: CheckStatus) -> console::StyledObject<&'static str> {
    match status {
        CheckStatus::Ok => style("[OK]").green(),
        CheckStatus::Warn => style("[WARN]").yellow(),
        CheckStatus::Fail => style("[FAIL]").red(),
        CheckStatus::Skip => style("[SKIP]").dim(),
    }
}

/// Get trimmed output from a command
fn get_command_version(cmd: &Path, args: &[&str]) -> Option<String> {
    Command::new(cmd)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            let stdout = String::from_utf8_lossy(&o.stdout);
            let stderr = String::from_utf8_lossy(&o.stderr);
            if stdout.trim().is_empty() {
                stderr.trim().to_string()
            } else {
                stdout.trim().to_string()
            }
        })
}
