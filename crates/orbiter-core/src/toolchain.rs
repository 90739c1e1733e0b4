//! Toolchain discovery
//!
//! Locates `adb` and the bootstrap classpath once, at graph-build time. The
//! scheduler and tasks treat the resulting [`Toolchain`] as opaque input.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ToolchainConfig;
use crate::error::ToolchainError;

/// Located external tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Absolute path to `adb`
    pub adb: PathBuf,
    /// Android SDK root, when one was found
    pub android_home: Option<PathBuf>,
    /// Bootstrap classpath entries
    pub bootclasspath: Vec<PathBuf>,
}

impl Toolchain {
    /// Bootclasspath joined the way compilers expect it
    pub fn bootclasspath_arg(&self) -> String {
        self.bootclasspath
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Finds the toolchain from configuration, environment and `PATH`
#[derive(Debug, Clone)]
pub struct ToolchainLocator {
    config: ToolchainConfig,
}

impl ToolchainLocator {
    /// Create a locator over the configured overrides
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Locate the toolchain using the process environment
    pub fn locate(&self) -> Result<Toolchain, ToolchainError> {
        self.locate_with(|key| std::env::var(key).ok())
    }

    /// Locate the toolchain reading environment variables through `env`.
    ///
    /// `adb` resolution order: explicit config path, `<sdk>/platform-tools/adb`
    /// for the configured SDK or `ANDROID_HOME`/`ANDROID_SDK_ROOT`, then `PATH`.
    pub fn locate_with<F>(&self, env: F) -> Result<Toolchain, ToolchainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let android_home = self.config.android_home.clone().or_else(|| {
            ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
                .iter()
                .find_map(|key| env(key))
                .map(PathBuf::from)
        });

        let adb = self.find_adb(android_home.as_deref())?;

        for entry in &self.config.bootclasspath {
            if !entry.exists() {
                return Err(ToolchainError::MissingPath {
                    what: "bootclasspath entry".to_string(),
                    path: entry.clone(),
                });
            }
        }

        info!(adb = %adb.display(), "toolchain located");
        Ok(Toolchain {
            adb,
            android_home,
            bootclasspath: self.config.bootclasspath.clone(),
        })
    }

    fn find_adb(&self, android_home: Option<&Path>) -> Result<PathBuf, ToolchainError> {
        if let Some(adb) = &self.config.adb {
            if adb.exists() {
                return Ok(adb.clone());
            }
            return Err(ToolchainError::MissingPath {
                what: "adb".to_string(),
                path: adb.clone(),
            });
        }

        if let Some(sdk) = android_home {
            let candidate = sdk.join("platform-tools").join(adb_file_name());
            debug!(path = %candidate.display(), "checking SDK adb");
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        which::which("adb").map_err(|_| ToolchainError::ToolNotFound {
            tool: "adb".to_string(),
            install_hint: "Install Android platform-tools or set ANDROID_HOME".to_string(),
        })
    }
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}
