//! Profiler capability
//!
//! Profiling is selected once, at configuration time, through
//! [`ProfilerConfig`]. Every run talks to the resulting [`Profiler`] trait
//! object; the disabled variant contributes nothing to the command line.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// File the sampling profiler writes into the action directory
pub const SAMPLING_OUTPUT_FILE: &str = "profile.hprof";

/// Profiler selection as it appears in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProfilerConfig {
    /// No profiling
    #[default]
    Disabled,
    /// Periodic stack sampling
    Sampling {
        /// Sampling interval in milliseconds
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        /// Captured stack depth
        #[serde(default = "default_depth")]
        depth: u32,
    },
}

fn default_interval_ms() -> u64 {
    10
}

fn default_depth() -> u32 {
    4
}

impl ProfilerConfig {
    /// Build the profiler for this selection
    pub fn build(&self) -> Arc<dyn Profiler> {
        match self {
            Self::Disabled => Arc::new(DisabledProfiler),
            Self::Sampling { interval_ms, depth } => Arc::new(SamplingProfiler {
                interval_ms: *interval_ms,
                depth: *depth,
            }),
        }
    }
}

/// A profiler that can be attached to an action's VM invocation
pub trait Profiler: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Extra VM arguments, given the remote directory the action runs in
    fn vm_args(&self, action_dir: &str) -> Vec<String>;

    /// Name of the file the profiler leaves in the action directory, if any
    fn output_file(&self) -> Option<&'static str>;
}

/// Profiling turned off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledProfiler;

impl Profiler for DisabledProfiler {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn vm_args(&self, _action_dir: &str) -> Vec<String> {
        Vec::new()
    }

    fn output_file(&self) -> Option<&'static str> {
        None
    }
}

/// Stack-sampling profiler writing an hprof file next to the action
#[derive(Debug, Clone, Copy)]
pub struct SamplingProfiler {
    /// Sampling interval in milliseconds
    pub interval_ms: u64,
    /// Captured stack depth
    pub depth: u32,
}

impl Profiler for SamplingProfiler {
    fn name(&self) -> &'static str {
        "sampling"
    }

    fn vm_args(&self, action_dir: &str) -> Vec<String> {
        vec![format!(
            "-Xrunhprof:cpu=samples,interval={},depth={},file={}/{}",
            self.interval_ms,
            self.depth,
            action_dir.trim_end_matches('/'),
            SAMPLING_OUTPUT_FILE
        )]
    }

    fn output_file(&self) -> Option<&'static str> {
        Some(SAMPLING_OUTPUT_FILE)
    }
}
