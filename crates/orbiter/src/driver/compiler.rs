//! Host-side compilation of artifacts

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use orbiter_core::config::CompileConfig;
use orbiter_core::Toolchain;
use orbiter_tasks::{CacheInput, TaskError};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Turns an input artifact into what gets pushed to the target
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Description for plans and logs
    fn describe(&self) -> String;

    /// Everything besides the artifact itself that determines the output
    fn cache_inputs(&self) -> Vec<CacheInput>;

    /// Produce `output` from `input`, returning output lines worth surfacing
    async fn compile(&self, input: &Path, output: &Path) -> Result<Vec<String>, TaskError>;
}

/// Compiler selected by configuration: the compile command when one is set,
/// plain copying otherwise
pub fn from_config(config: &CompileConfig, toolchain: &Toolchain, root: &Path) -> Arc<dyn Compiler> {
    match &config.command {
        Some(template) => Arc::new(CommandCompiler::new(
            template.clone(),
            toolchain.bootclasspath.clone(),
            root,
        )),
        None => Arc::new(CopyCompiler),
    }
}

/// Runs the configured compile command through `sh -c`.
///
/// Placeholders: `{input}`, `{output}`, `{bootclasspath}`.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    template: String,
    bootclasspath: Vec<PathBuf>,
    working_dir: PathBuf,
}

impl CommandCompiler {
    pub fn new(template: impl Into<String>, bootclasspath: Vec<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            bootclasspath,
            working_dir: working_dir.into(),
        }
    }

    fn command_line(&self, input: &Path, output: &Path) -> String {
        let bootclasspath = self
            .bootclasspath
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        self.template
            .replace("{input}", &input.display().to_string())
            .replace("{output}", &output.display().to_string())
            .replace("{bootclasspath}", &bootclasspath)
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    fn describe(&self) -> String {
        self.template.clone()
    }

    fn cache_inputs(&self) -> Vec<CacheInput> {
        // relative entries resolve against the directory the command runs in
        let mut inputs = vec![CacheInput::text(self.template.as_str())];
        inputs.extend(
            self.bootclasspath
                .iter()
                .map(|entry| CacheInput::file(self.working_dir.join(entry))),
        );
        inputs
    }

    #[instrument(skip_all, fields(input = %input.display()))]
    async fn compile(&self, input: &Path, output: &Path) -> Result<Vec<String>, TaskError> {
        let cmd = self.command_line(input, output);
        debug!(command = %cmd, "running compile command");

        let result = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TaskError::failed(format!("Failed to spawn compile command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            let code = result.status.code().unwrap_or(-1);
            return Err(TaskError::failed(format!(
                "Compile command exited with code {}: {}",
                code,
                stderr.trim()
            )));
        }
        if !output.is_file() {
            return Err(TaskError::failed(format!(
                "Compile command produced no output at {}",
                output.display()
            )));
        }

        Ok(stdout
            .lines()
            .chain(stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Used when no compile command is configured: the artifact is pushed as is
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyCompiler;

#[async_trait]
impl Compiler for CopyCompiler {
    fn describe(&self) -> String {
        "copy".to_string()
    }

    fn cache_inputs(&self) -> Vec<CacheInput> {
        vec![CacheInput::text("copy")]
    }

    async fn compile(&self, input: &Path, output: &Path) -> Result<Vec<String>, TaskError> {
        tokio::fs::copy(input, output).await?;
        Ok(Vec::new())
    }
}
