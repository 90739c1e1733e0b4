//! Exit codes for the CLI

use crate::cli::commands::RunError;
use orbiter_core::{ConfigError, OrbiterError, ToolchainError};

/// Success
pub const SUCCESS: u8 = 0;

/// General error
pub const ERROR: u8 = 1;

/// Configuration error
pub const CONFIG_ERROR: u8 = 2;

/// One or more tasks did not succeed
pub const TASK_FAILURE: u8 = 3;

/// Required tool missing
pub const TOOLCHAIN_ERROR: u8 = 4;

/// User cancelled
pub const CANCELLED: u8 = 130;

/// Exit code for an error returned by a command
pub fn for_error(err: &anyhow::Error) -> u8 {
    if let Some(run) = err.downcast_ref::<RunError>() {
        return match run {
            RunError::Aborted => CANCELLED,
            RunError::Failed { .. } => TASK_FAILURE,
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return CONFIG_ERROR;
    }
    if err.downcast_ref::<ToolchainError>().is_some() {
        return TOOLCHAIN_ERROR;
    }
    match err.downcast_ref::<OrbiterError>() {
        Some(OrbiterError::Config(_)) => CONFIG_ERROR,
        Some(OrbiterError::Toolchain(_)) => TOOLCHAIN_ERROR,
        _ => ERROR,
    }
}
