//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::profiler::ProfilerConfig;

/// Main configuration for Orbiter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Remote target configuration
    pub target: TargetConfig,

    /// Task orchestration configuration
    pub tasks: TasksConfig,

    /// Content cache configuration
    pub cache: CacheConfig,

    /// Timeouts for remote operations
    pub timeouts: TimeoutsConfig,

    /// External compile step
    pub compile: CompileConfig,

    /// Profiler selection
    pub profiler: ProfilerConfig,

    /// Toolchain overrides
    pub toolchain: ToolchainConfig,

    /// Where retrieved results are written
    pub results: ResultsConfig,
}

/// Remote target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Device serial passed to the transport (`adb -s`)
    pub serial: Option<String>,

    /// Remote directory that holds per-run files
    pub device_dir: String,

    /// Directory that must be non-empty before the target counts as booted
    pub ready_dir: String,

    /// Filesystem boundaries that are never targeted for creation
    pub roots: Vec<String>,

    /// Command run on the target for each action.
    ///
    /// Placeholders: `{artifact}`, `{action}`, `{dir}`, `{vm_args}`.
    pub run_command: String,

    /// Host files pushed once per run before any action executes
    pub install: Vec<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            serial: None,
            device_dir: "/data/local/tmp/orbiter".to_string(),
            ready_dir: "/sdcard".to_string(),
            roots: vec![
                "/".to_string(),
                "/sdcard".to_string(),
                "/data/local/tmp".to_string(),
            ],
            run_command: "dalvikvm {vm_args} -cp {artifact} {action}".to_string(),
            install: Vec::new(),
        }
    }
}

/// Task orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Maximum concurrent tasks
    pub concurrency: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Content cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled at all
    pub enabled: bool,

    /// Host cache directory, relative to the working directory
    pub dir: PathBuf,

    /// Whether pushed artifacts are also cached on the target
    pub device: bool,

    /// Remote cache directory
    pub device_dir: String,

    /// Maximum age for `cache prune`, in days
    pub max_age_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".orbiter").join("cache"),
            device: true,
            device_dir: "/data/local/tmp/orbiter-cache".to_string(),
            max_age_days: 7,
        }
    }
}

/// Timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Per-action execution timeout
    pub run_secs: u64,

    /// How long to wait for the target to boot
    pub boot_secs: u64,

    /// How long to wait for an expected file to appear
    pub file_secs: u64,

    /// Timeout applied to every other remote command
    pub command_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            run_secs: 300,
            boot_secs: 120,
            file_secs: 30,
            command_secs: 60,
        }
    }
}

/// External compile step configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Host command producing the deployable artifact.
    ///
    /// Placeholders: `{input}`, `{output}`, `{bootclasspath}`. When unset the
    /// input artifact is deployed as-is.
    pub command: Option<String>,

    /// Directory for compiled artifacts, relative to the working directory
    pub output_dir: Option<PathBuf>,
}

/// Toolchain overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Android SDK location (falls back to `ANDROID_HOME`/`ANDROID_SDK_ROOT`)
    pub android_home: Option<PathBuf>,

    /// Explicit path to `adb`
    pub adb: Option<PathBuf>,

    /// Bootstrap classpath entries handed to the compiler
    pub bootclasspath: Vec<PathBuf>,
}

/// Result retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Host directory receiving pulled files
    pub dir: PathBuf,

    /// File each action writes into its remote directory, if any
    pub file: Option<String>,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".orbiter").join("results"),
            file: None,
        }
    }
}
