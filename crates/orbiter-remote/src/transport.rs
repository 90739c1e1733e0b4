//! Shell transports
//!
//! A transport turns an argument vector into captured output lines. It knows
//! nothing about what the lines mean; [`crate::RemoteShell`] inspects them.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{RemoteError, Result};

const NO_DEVICES: &str = "no devices/emulators found";

/// Captured result of one transport invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Output lines, stdout first, then stderr
    pub lines: Vec<String>,
    /// Whether the invocation reported a successful exit
    pub success: bool,
}

impl ExecOutput {
    /// Successful invocation with the given lines
    pub fn ok(lines: Vec<String>) -> Self {
        Self {
            lines,
            success: true,
        }
    }

    /// Whether any line contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }

    /// The `adb` client's own complaint when the invocation never reached a
    /// working device (no device, offline, unauthorized)
    pub fn client_error(&self) -> Option<String> {
        if self.success {
            return None;
        }
        self.lines
            .iter()
            .map(|l| l.trim())
            .find(|l| {
                l.starts_with("adb: ")
                    || l.starts_with("error: device")
                    || l.contains(NO_DEVICES)
            })
            .map(str::to_string)
    }

    /// Non-empty lines joined for error messages
    pub fn joined(&self) -> String {
        self.lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Line-oriented request/response channel to the target
#[async_trait]
pub trait ShellTransport: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Run one invocation (e.g. `["shell", "ls", "/sdcard"]`).
    ///
    /// Dropping the returned future must tear the invocation down.
    async fn exec(&self, args: &[String]) -> Result<ExecOutput>;
}

/// Transport spawning the `adb` client for every invocation
#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbTransport {
    /// Create a transport using the given `adb` binary
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            serial: None,
        }
    }

    /// Address a specific device (`adb -s <serial>`)
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut parts = vec![self.adb.display().to_string()];
        if let Some(serial) = &self.serial {
            parts.push("-s".to_string());
            parts.push(serial.clone());
        }
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

#[async_trait]
impl ShellTransport for AdbTransport {
    fn describe(&self) -> String {
        match &self.serial {
            Some(serial) => format!("adb ({})", serial),
            None => "adb".to_string(),
        }
    }

    #[instrument(skip_all, fields(args = ?args))]
    async fn exec(&self, args: &[String]) -> Result<ExecOutput> {
        let mut command = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| RemoteError::Transport {
                command: self.command_line(args),
                reason: format!("failed to spawn: {}", e),
            })?;

        let mut lines = split_lines(&output.stdout);
        lines.extend(split_lines(&output.stderr));
        debug!(
            success = output.status.success(),
            lines = lines.len(),
            "transport invocation finished"
        );

        Ok(ExecOutput {
            lines,
            success: output.status.success(),
        })
    }
}

/// Split raw output into lines, dropping the `\r` older adb versions emit
fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect()
}
