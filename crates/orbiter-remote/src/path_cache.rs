//! Memo of remote directories known to exist

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Remote directories known to exist as of their last creation or observation.
///
/// Entries are never removed individually; [`RemotePathCache::reset`] clears
/// everything at run start. A stale entry only costs a failed push later, the
/// remote `mkdir` it short-circuits is idempotent anyway.
#[derive(Debug, Clone, Default)]
pub struct RemotePathCache {
    known: Arc<RwLock<HashSet<String>>>,
}

impl RemotePathCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` is known to exist
    pub fn contains(&self, path: &str) -> bool {
        self.known
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Record that `path` exists
    pub fn insert(&self, path: impl Into<String>) {
        self.known
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into());
    }

    /// Forget everything
    pub fn reset(&self) {
        self.known
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of known directories
    pub fn len(&self) -> usize {
        self.known.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing is known yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
