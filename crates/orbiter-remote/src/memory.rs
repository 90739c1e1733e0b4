//! In-memory target
//!
//! [`MemoryTransport`] emulates the subset of an adb-reachable device that
//! [`crate::RemoteShell`] relies on: a filesystem answering `mkdir`, `ls`,
//! `rm -rf`, `cp`, `mv`, `push` and `pull` with the same error lines a device
//! prints, plus scripted responses for any other command. Every invocation is
//! recorded so callers can assert on the exact traffic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RemoteError, Result};
use crate::shell::parent_dir;
use crate::transport::{ExecOutput, ShellTransport};

/// Scripted answer for a shell program
#[derive(Debug, Clone, Default)]
pub struct CommandResponse {
    /// Output lines
    pub lines: Vec<String>,
    /// Whether the command exits successfully
    pub success: bool,
    /// How long the command takes
    pub delay: Duration,
}

impl CommandResponse {
    /// Successful response printing `lines`
    pub fn ok(lines: Vec<String>) -> Self {
        Self {
            lines,
            success: true,
            delay: Duration::ZERO,
        }
    }

    /// Response of a command exiting with failure
    pub fn failed(lines: Vec<String>) -> Self {
        Self {
            lines,
            success: false,
            delay: Duration::ZERO,
        }
    }

    /// Make the command take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    calls: Vec<Vec<String>>,
    responses: HashMap<String, CommandResponse>,
    offline: bool,
}

/// Transport backed by an in-memory filesystem
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a target whose filesystem holds only `/`
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.dirs.insert("/".to_string());
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a directory and all of its ancestors
    pub fn create_dir_all(&self, path: &str) {
        let mut state = self.state();
        let mut current = Some(path.trim_end_matches('/'));
        while let Some(dir) = current.filter(|d| !d.is_empty()) {
            state.dirs.insert(dir.to_string());
            current = parent_dir(dir);
        }
    }

    /// Place a file, creating its parent directories
    pub fn create_file(&self, path: &str, contents: &[u8]) {
        if let Some(parent) = parent_dir(path) {
            self.create_dir_all(parent);
        }
        self.state()
            .files
            .insert(path.to_string(), contents.to_vec());
    }

    /// Whether a directory exists
    pub fn has_dir(&self, path: &str) -> bool {
        self.state().dirs.contains(path)
    }

    /// Contents of a file, if present
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    /// Script the response for a shell program (e.g. `dalvikvm`)
    pub fn respond(&self, program: impl Into<String>, response: CommandResponse) {
        self.state().responses.insert(program.into(), response);
    }

    /// Simulate a disconnected device
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Every invocation so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state().calls.clone()
    }

    /// Paths passed to `mkdir`, in order
    pub fn mkdir_calls(&self) -> Vec<String> {
        self.shell_calls("mkdir")
            .into_iter()
            .filter_map(|args| args.last().cloned())
            .collect()
    }

    /// Invocations of a shell program, arguments after `shell`
    pub fn shell_calls(&self, program: &str) -> Vec<Vec<String>> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some("shell"))
            .filter(|c| c.get(1).map(String::as_str) == Some(program))
            .map(|c| c[1..].to_vec())
            .collect()
    }

    fn mkdir(state: &mut MemoryState, path: &str) -> ExecOutput {
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return failure(format!("mkdir: '{}': File exists", path));
        }
        match parent_dir(path) {
            Some(parent) if state.dirs.contains(parent) => {
                state.dirs.insert(path.to_string());
                ExecOutput::ok(Vec::new())
            }
            _ => failure(format!("mkdir: '{}': No such file or directory", path)),
        }
    }

    fn ls(state: &MemoryState, path: &str) -> ExecOutput {
        if state.files.contains_key(path) {
            return ExecOutput::ok(vec![path.to_string()]);
        }
        if !state.dirs.contains(path) {
            return failure(format!("ls: {}: No such file or directory", path));
        }
        let children: BTreeSet<String> = state
            .dirs
            .iter()
            .chain(state.files.keys())
            .filter(|p| parent_dir(p) == Some(path) && p.as_str() != path)
            .filter_map(|p| p.rsplit('/').next().map(str::to_string))
            .collect();
        ExecOutput::ok(children.into_iter().collect())
    }

    fn rm(state: &mut MemoryState, path: &str) -> ExecOutput {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        state
            .dirs
            .retain(|d| d != path && !d.starts_with(&prefix));
        state
            .files
            .retain(|f, _| f != path && !f.starts_with(&prefix));
        ExecOutput::ok(Vec::new())
    }

    fn cp(state: &mut MemoryState, src: &str, dst: &str) -> ExecOutput {
        let Some(contents) = state.files.get(src).cloned() else {
            return failure(format!("cp: {}: No such file or directory", src));
        };
        match parent_dir(dst) {
            Some(parent) if state.dirs.contains(parent) => {
                state.files.insert(dst.to_string(), contents);
                ExecOutput::ok(Vec::new())
            }
            _ => failure(format!("cp: {}: No such file or directory", dst)),
        }
    }

    fn mv(state: &mut MemoryState, src: &str, dst: &str) -> ExecOutput {
        let output = Self::cp(state, src, dst);
        if output.success {
            state.files.remove(src);
        }
        output
    }

    fn push(state: &mut MemoryState, local: &str, remote: &str) -> ExecOutput {
        let contents = match std::fs::read(local) {
            Ok(contents) => contents,
            Err(e) => return failure(format!("adb: error: cannot stat '{}': {}", local, e)),
        };
        match parent_dir(remote) {
            Some(parent) if state.dirs.contains(parent) => {
                state.files.insert(remote.to_string(), contents);
                ExecOutput::ok(vec![format!("{}: 1 file pushed.", local)])
            }
            _ => failure(format!(
                "adb: error: failed to copy '{}' to '{}': remote couldn't create file: No such file or directory",
                local, remote
            )),
        }
    }

    fn pull(state: &MemoryState, remote: &str, local: &str) -> ExecOutput {
        let Some(contents) = state.files.get(remote) else {
            return failure(format!(
                "adb: error: failed to stat remote object '{}': No such file or directory",
                remote
            ));
        };
        match std::fs::write(Path::new(local), contents) {
            Ok(()) => ExecOutput::ok(vec![format!("{}: 1 file pulled.", remote)]),
            Err(e) => failure(format!("adb: error: cannot create '{}': {}", local, e)),
        }
    }
}

fn failure(line: String) -> ExecOutput {
    ExecOutput {
        lines: vec![line],
        success: false,
    }
}

#[async_trait]
impl ShellTransport for MemoryTransport {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn exec(&self, args: &[String]) -> Result<ExecOutput> {
        let scripted = {
            let mut state = self.state();
            state.calls.push(args.to_vec());
            if state.offline {
                return Err(RemoteError::Transport {
                    command: args.join(" "),
                    reason: "device offline".to_string(),
                });
            }

            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            match argv.as_slice() {
                ["shell", "mkdir", path] => return Ok(Self::mkdir(&mut state, path)),
                ["shell", "ls", path] => return Ok(Self::ls(&state, path)),
                ["shell", "rm", "-rf", path] => return Ok(Self::rm(&mut state, path)),
                ["shell", "cp", src, dst] => return Ok(Self::cp(&mut state, src, dst)),
                ["shell", "mv", src, dst] => return Ok(Self::mv(&mut state, src, dst)),
                ["push", local, remote] => return Ok(Self::push(&mut state, local, remote)),
                ["pull", remote, local] => return Ok(Self::pull(&state, remote, local)),
                ["shell", program, ..] => state
                    .responses
                    .get(*program)
                    .cloned()
                    .unwrap_or_else(|| CommandResponse::ok(Vec::new())),
                _ => CommandResponse::ok(Vec::new()),
            }
        };

        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        Ok(ExecOutput {
            lines: scripted.lines,
            success: scripted.success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent() {
        let transport = MemoryTransport::new();
        let output = transport.exec(&args(&["shell", "mkdir", "/a/b"])).await.unwrap();
        assert!(output.mentions("No such file or directory"));

        transport.exec(&args(&["shell", "mkdir", "/a"])).await.unwrap();
        let output = transport.exec(&args(&["shell", "mkdir", "/a/b"])).await.unwrap();
        assert!(output.success);
        assert!(transport.has_dir("/a/b"));
    }

    #[tokio::test]
    async fn test_ls_lists_children() {
        let transport = MemoryTransport::new();
        transport.create_file("/d/one.txt", b"1");
        transport.create_dir_all("/d/sub");

        let output = transport.exec(&args(&["shell", "ls", "/d"])).await.unwrap();
        assert_eq!(output.lines, args(&["one.txt", "sub"]));
    }

    #[tokio::test]
    async fn test_rm_is_recursive() {
        let transport = MemoryTransport::new();
        transport.create_file("/d/sub/f", b"x");
        transport.exec(&args(&["shell", "rm", "-rf", "/d"])).await.unwrap();
        assert!(!transport.has_dir("/d"));
        assert!(transport.file("/d/sub/f").is_none());
        assert!(transport.has_dir("/"));
    }

    #[tokio::test]
    async fn test_mv_replaces_destination() {
        let transport = MemoryTransport::new();
        transport.create_file("/c/key.tmp", b"new");
        transport.create_file("/c/key", b"old");
        let output = transport
            .exec(&args(&["shell", "mv", "/c/key.tmp", "/c/key"]))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(transport.file("/c/key").unwrap(), b"new".to_vec());
        assert!(transport.file("/c/key.tmp").is_none());
    }

    #[tokio::test]
    async fn test_scripted_response_and_offline() {
        let transport = MemoryTransport::new();
        transport.respond("getprop", CommandResponse::ok(args(&["1"])));
        let output = transport
            .exec(&args(&["shell", "getprop", "sys.boot_completed"]))
            .await
            .unwrap();
        assert_eq!(output.lines, args(&["1"]));

        transport.set_offline(true);
        assert!(transport.exec(&args(&["shell", "ls", "/"])).await.is_err());
        assert_eq!(transport.calls().len(), 2);
    }
}
