//! Idempotent remote primitives over a [`ShellTransport`]

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{RemoteError, Result};
use crate::path_cache::RemotePathCache;
use crate::transport::{ExecOutput, ShellTransport};

/// Polling interval of [`RemoteShell::wait_until`]
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default timeout for housekeeping commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const NO_SUCH_FILE: &str = "No such file or directory";
const FILE_EXISTS: &str = "File exists";
const NOT_EXIST: &str = "does not exist";

/// Parent of a remote POSIX path; `None` for `/` and relative roots
pub fn parent_dir(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Remote shell bound to one target for the duration of a run.
///
/// Owns the [`RemotePathCache`] for that run; clones share the transport and
/// the cache.
#[derive(Clone)]
pub struct RemoteShell {
    transport: Arc<dyn ShellTransport>,
    paths: RemotePathCache,
    roots: Arc<HashSet<String>>,
    command_timeout: Duration,
}

impl std::fmt::Debug for RemoteShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteShell")
            .field("transport", &self.transport.describe())
            .field("known_paths", &self.paths.len())
            .field("roots", &self.roots)
            .finish()
    }
}

impl RemoteShell {
    /// Create a shell whose only root sentinel is `/`
    pub fn new(transport: Arc<dyn ShellTransport>) -> Self {
        Self {
            transport,
            paths: RemotePathCache::new(),
            roots: Arc::new(HashSet::from(["/".to_string()])),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Replace the root sentinels `ensure_directory` never walks past
    pub fn with_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.roots = Arc::new(
            roots
                .into_iter()
                .map(|r| normalize(r.as_ref()).to_string())
                .collect(),
        );
        self
    }

    /// Timeout applied to every command other than `run_with_timeout`
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// The directory memo owned by this shell
    pub fn path_cache(&self) -> &RemotePathCache {
        &self.paths
    }

    /// Transport description for logs
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    async fn exec(&self, args: Vec<String>) -> Result<ExecOutput> {
        match tokio::time::timeout(self.command_timeout, self.transport.exec(&args)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout {
                target: args.join(" "),
                elapsed: self.command_timeout,
            }),
        }
    }

    /// Create `path` and every missing ancestor.
    ///
    /// Walks upward until a root sentinel or a directory already known to
    /// exist, then creates the missing chain parent-first. "File exists" is
    /// success, so concurrent calls for overlapping paths are safe.
    #[instrument(skip(self))]
    pub async fn ensure_directory(&self, path: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(normalize(path));

        while let Some(dir) = current {
            if self.roots.contains(dir) || self.paths.contains(dir) {
                break;
            }
            missing.push(dir.to_string());
            current = parent_dir(dir);
        }

        if missing.is_empty() {
            return Ok(());
        }
        debug!(count = missing.len(), "creating missing remote directories");

        for dir in missing.iter().rev() {
            self.mkdir(dir).await?;
            self.paths.insert(dir.clone());
        }
        Ok(())
    }

    async fn mkdir(&self, dir: &str) -> Result<()> {
        let args = vec!["shell".to_string(), "mkdir".to_string(), dir.to_string()];
        let output = self.exec(args.clone()).await?;

        if output.mentions(FILE_EXISTS) {
            debug!(dir, "remote directory already exists");
            return Ok(());
        }
        if output.mentions(NO_SUCH_FILE) {
            return Err(RemoteError::NotFound {
                path: parent_dir(dir).unwrap_or(dir).to_string(),
            });
        }
        if !output.success || !output.joined().is_empty() {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }
        Ok(())
    }

    /// Entries of a remote directory.
    ///
    /// Fails with [`RemoteError::NotFound`] when the path is absent, which is
    /// distinct from an empty listing.
    #[instrument(skip(self))]
    pub async fn list(&self, path: &str) -> Result<BTreeSet<String>> {
        let path = normalize(path);
        let args = vec!["shell".to_string(), "ls".to_string(), path.to_string()];
        let output = self.exec(args.clone()).await?;

        if output.mentions(NO_SUCH_FILE) {
            return Err(RemoteError::NotFound {
                path: path.to_string(),
            });
        }
        if !output.success {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }

        let entries: BTreeSet<String> = output
            .lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        // listing a file echoes the path back; anything else is a directory
        if !(entries.len() == 1 && entries.contains(path)) {
            self.paths.insert(path.to_string());
        }
        Ok(entries)
    }

    /// Copy a host file to the target. The destination directory must exist.
    #[instrument(skip(self, local), fields(local = %local.display()))]
    pub async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        if tokio::fs::metadata(local).await.is_err() {
            return Err(RemoteError::NotFound {
                path: local.display().to_string(),
            });
        }

        let args = vec![
            "push".to_string(),
            local.display().to_string(),
            remote.to_string(),
        ];
        let output = self.exec(args.clone()).await?;

        if output.mentions(NO_SUCH_FILE) && output.mentions(remote) {
            return Err(RemoteError::NotFound {
                path: parent_dir(remote).unwrap_or(remote).to_string(),
            });
        }
        if !output.success {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }
        debug!(remote, "pushed file");
        Ok(())
    }

    /// Copy a target file to the host. The local directory must exist.
    #[instrument(skip(self, local), fields(local = %local.display()))]
    pub async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        let args = vec![
            "pull".to_string(),
            remote.to_string(),
            local.display().to_string(),
        ];
        let output = self.exec(args.clone()).await?;

        if output.mentions(remote) && (output.mentions(NO_SUCH_FILE) || output.mentions(NOT_EXIST)) {
            return Err(RemoteError::NotFound {
                path: remote.to_string(),
            });
        }
        if !output.success {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }
        debug!(remote, "pulled file");
        Ok(())
    }

    /// Recursively delete a remote path; an absent path is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, path: &str) -> Result<()> {
        let args = vec![
            "shell".to_string(),
            "rm".to_string(),
            "-rf".to_string(),
            path.to_string(),
        ];
        let output = self.exec(args.clone()).await?;
        if !output.success {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }
        Ok(())
    }

    /// Copy a file within the target
    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let args = vec![
            "shell".to_string(),
            "cp".to_string(),
            from.to_string(),
            to.to_string(),
        ];
        let output = self.exec(args.clone()).await?;
        if output.mentions(NO_SUCH_FILE) {
            let missing = if output.mentions(from) { from } else { to };
            return Err(RemoteError::NotFound {
                path: missing.to_string(),
            });
        }
        if !output.success {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }
        Ok(())
    }

    /// Move a file within the target, replacing the destination
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let args = vec![
            "shell".to_string(),
            "mv".to_string(),
            from.to_string(),
            to.to_string(),
        ];
        let output = self.exec(args.clone()).await?;
        if output.mentions(NO_SUCH_FILE) {
            let missing = if output.mentions(from) { from } else { to };
            return Err(RemoteError::NotFound {
                path: missing.to_string(),
            });
        }
        if !output.success {
            return Err(RemoteError::Transport {
                command: args.join(" "),
                reason: output.joined(),
            });
        }
        Ok(())
    }

    /// Run a command on the target and capture its output lines.
    ///
    /// When `timeout` elapses the transport future is dropped, which kills
    /// the underlying invocation, and [`RemoteError::Timeout`] is returned.
    /// The command's own exit status is not interpreted, but a failure of
    /// the `adb` client itself is reported as [`RemoteError::Transport`].
    #[instrument(skip(self, argv), fields(command = %argv.join(" ")))]
    pub async fn run_with_timeout(&self, argv: &[String], timeout: Duration) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(argv.len() + 1);
        args.push("shell".to_string());
        args.extend(argv.iter().cloned());

        let start = Instant::now();
        match tokio::time::timeout(timeout, self.transport.exec(&args)).await {
            Ok(result) => {
                let output = result?;
                debug!(
                    success = output.success,
                    lines = output.lines.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "remote command finished"
                );
                if let Some(reason) = output.client_error() {
                    warn!(reason = %reason, "remote command never reached the target");
                    return Err(RemoteError::Transport {
                        command: argv.join(" "),
                        reason,
                    });
                }
                Ok(output.lines)
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs_f64(), "remote command timed out");
                Err(RemoteError::Timeout {
                    target: argv.join(" "),
                    elapsed: start.elapsed(),
                })
            }
        }
    }

    /// Poll `path` once per second until `predicate` accepts its listing.
    ///
    /// A missing path counts as "not ready yet". No listing is issued once the
    /// deadline has passed.
    #[instrument(skip(self, predicate))]
    pub async fn wait_until<P>(&self, path: &str, timeout: Duration, predicate: P) -> Result<BTreeSet<String>>
    where
        P: Fn(&BTreeSet<String>) -> bool + Send + Sync,
    {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut polls = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!(polls, "gave up waiting on remote path");
                return Err(RemoteError::Timeout {
                    target: path.to_string(),
                    elapsed: now - start,
                });
            }

            polls += 1;
            match tokio::time::timeout(deadline - now, self.list(path)).await {
                Ok(Ok(entries)) if predicate(&entries) => {
                    debug!(polls, "remote path ready");
                    return Ok(entries);
                }
                Ok(Ok(_)) | Ok(Err(RemoteError::NotFound { .. })) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(RemoteError::Timeout {
                        target: path.to_string(),
                        elapsed: start.elapsed(),
                    })
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }
}
