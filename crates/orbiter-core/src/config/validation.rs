//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_target(config)?;
    validate_tasks(config)?;
    validate_timeouts(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn validate_target(config: &Config) -> Result<()> {
    let target = &config.target;

    for (field, value) in [
        ("target.device_dir", &target.device_dir),
        ("target.ready_dir", &target.ready_dir),
        ("cache.device_dir", &config.cache.device_dir),
    ] {
        if !value.starts_with('/') {
            return Err(invalid(field, "must be an absolute remote path").into());
        }
    }

    if let Some(root) = target.roots.iter().find(|r| !r.starts_with('/')) {
        return Err(invalid(
            "target.roots",
            format!("'{}' is not an absolute remote path", root),
        )
        .into());
    }

    if !target.run_command.contains("{artifact}") {
        return Err(invalid("target.run_command", "must contain {artifact} placeholder").into());
    }

    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    if config.tasks.concurrency == 0 {
        return Err(invalid("tasks.concurrency", "must be at least 1").into());
    }
    Ok(())
}

fn validate_timeouts(config: &Config) -> Result<()> {
    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.run_secs", timeouts.run_secs),
        ("timeouts.boot_secs", timeouts.boot_secs),
        ("timeouts.file_secs", timeouts.file_secs),
        ("timeouts.command_secs", timeouts.command_secs),
    ] {
        if value == 0 {
            return Err(invalid(field, "must be greater than zero").into());
        }
    }
    Ok(())
}
