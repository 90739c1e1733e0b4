//! Orbiter Core - shared foundations for the test harness
//!
//! This crate provides error handling, configuration loading, the profiler
//! capability and toolchain discovery used by the scheduler and the CLI.

pub mod config;
pub mod error;
pub mod profiler;
pub mod toolchain;

pub use config::Config;
pub use error::{ConfigError, OrbiterError, Result, ToolchainError};
pub use profiler::{DisabledProfiler, Profiler, ProfilerConfig, SamplingProfiler};
pub use toolchain::{Toolchain, ToolchainLocator};
