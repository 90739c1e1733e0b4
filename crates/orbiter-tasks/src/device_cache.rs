//! Device-side artifact store

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use orbiter_remote::{parent_dir, RemoteError, RemoteShell};
use tracing::{debug, warn};

use crate::cache::{ArtifactLocation, CacheError, CacheKey, CacheStore};

/// Distinguishes concurrent inserts of the same key within this process
static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Store keeping artifacts as files named by key in a directory on the
/// target. A hit is materialized with a remote `cp`, so pushed artifacts are
/// transferred over the transport once per content.
#[derive(Debug, Clone)]
pub struct DeviceCacheStore {
    shell: RemoteShell,
    cache_dir: String,
}

impl DeviceCacheStore {
    /// Create a store under `cache_dir` on the target
    pub fn new(shell: RemoteShell, cache_dir: impl Into<String>) -> Self {
        Self {
            shell,
            cache_dir: cache_dir.into().trim_end_matches('/').to_string(),
        }
    }

    fn entry_path(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.cache_dir, key)
    }

    /// Staging path private to one insert; the pid keeps separate runs
    /// against the same target apart
    fn partial_path(&self, key: &CacheKey) -> String {
        let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}.{}-{}.partial", self.entry_path(key), std::process::id(), seq)
    }
}

#[async_trait]
impl CacheStore for DeviceCacheStore {
    fn describe(&self) -> String {
        format!("device:{}", self.cache_dir)
    }

    async fn is_available(&self) -> bool {
        match self.shell.ensure_directory(&self.cache_dir).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "device cache directory unavailable");
                false
            }
        }
    }

    async fn materialize(&self, key: &CacheKey, destination: &ArtifactLocation) -> Result<bool, CacheError> {
        let ArtifactLocation::Remote(destination) = destination else {
            return Err(CacheError::UnsupportedLocation {
                store: self.describe(),
                location: destination.to_string(),
            });
        };

        let entry = self.entry_path(key);
        match self.shell.list(&entry).await {
            Ok(listing) if listing.len() == 1 && listing.contains(&entry) => {}
            Ok(_) | Err(RemoteError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = parent_dir(destination) {
            self.shell.ensure_directory(parent).await?;
        }
        self.shell.copy(&entry, destination).await?;
        Ok(true)
    }

    async fn insert(&self, key: &CacheKey, source: &ArtifactLocation) -> Result<(), CacheError> {
        let entry = self.entry_path(key);
        let partial = self.partial_path(key);
        self.shell.ensure_directory(&self.cache_dir).await?;

        let staged = match source {
            ArtifactLocation::Local(path) => self.shell.push(path, &partial).await,
            ArtifactLocation::Remote(path) => self.shell.copy(path, &partial).await,
        };
        let stored = match staged {
            Ok(()) => self.shell.rename(&partial, &entry).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            if let Err(cleanup) = self.shell.remove(&partial).await {
                warn!(partial = %partial, error = %cleanup, "failed to remove staged cache entry");
            }
            return Err(e.into());
        }
        Ok(())
    }
}
