//! Content-addressable artifact cache

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orbiter_remote::RemoteError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

const METADATA_FILE: &str = "metadata.json";
const ARTIFACT_FILE: &str = "artifact";

/// Cache key: SHA-256 over every input of a transformation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of fingerprinting a set of inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// Inputs hashed; the key can be looked up and inserted
    Key(CacheKey),
    /// Backing store unavailable; callers run the work without caching
    Uncacheable,
}

impl Fingerprint {
    /// The key, when cacheable
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            Self::Key(key) => Some(key),
            Self::Uncacheable => None,
        }
    }
}

/// One input of a transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheInput {
    /// Contents of a host file (the path itself is not hashed)
    File(PathBuf),
    /// A literal parameter such as a command template or classpath
    Text(String),
}

impl CacheInput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// Where an artifact lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// Host filesystem path
    Local(PathBuf),
    /// Absolute path on the target
    Remote(String),
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(path) => write!(f, "device:{}", path),
        }
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Artifact materialized at the destination
    Hit,
    /// Nothing cached; destination untouched
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }
}

/// Backing storage for cached artifacts
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Description for logs
    fn describe(&self) -> String;

    /// Whether the store can currently be read and written
    async fn is_available(&self) -> bool;

    /// Copy the artifact for `key` to `destination`; `Ok(false)` on a miss
    /// without touching the destination
    async fn materialize(&self, key: &CacheKey, destination: &ArtifactLocation) -> Result<bool, CacheError>;

    /// Record the artifact at `source` under `key`, replacing any previous one
    async fn insert(&self, key: &CacheKey, source: &ArtifactLocation) -> Result<(), CacheError>;
}

/// Content-addressable cache over a [`CacheStore`].
///
/// Concurrent lookups and inserts for the same key need no locking: entries
/// are immutable and a duplicate insert writes identical bytes.
#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
}

impl fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentCache")
            .field("store", &self.store.describe())
            .finish()
    }
}

impl ContentCache {
    /// Create a cache over a store
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Description of the backing store
    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// Hash `inputs` in order. Each input is length-framed so that
    /// concatenations cannot collide.
    #[instrument(skip_all, fields(store = %self.store.describe(), inputs = inputs.len()))]
    pub async fn fingerprint(&self, inputs: &[CacheInput]) -> Result<Fingerprint, CacheError> {
        if !self.store.is_available().await {
            warn!("cache store unavailable, continuing without cache");
            return Ok(Fingerprint::Uncacheable);
        }

        let mut hasher = Sha256::new();
        for input in inputs {
            match input {
                CacheInput::File(path) => {
                    let contents = tokio::fs::read(path).await?;
                    hasher.update(b"file");
                    hasher.update((contents.len() as u64).to_le_bytes());
                    hasher.update(&contents);
                }
                CacheInput::Text(value) => {
                    hasher.update(b"text");
                    hasher.update((value.len() as u64).to_le_bytes());
                    hasher.update(value.as_bytes());
                }
            }
        }
        Ok(Fingerprint::Key(CacheKey(format!("{:x}", hasher.finalize()))))
    }

    /// Materialize the artifact for `key` at `destination` if cached
    pub async fn try_get(&self, destination: &ArtifactLocation, key: &CacheKey) -> Result<CacheLookup, CacheError> {
        if self.store.materialize(key, destination).await? {
            debug!(key = %key, destination = %destination, "cache hit");
            Ok(CacheLookup::Hit)
        } else {
            debug!(key = %key, "cache miss");
            Ok(CacheLookup::Miss)
        }
    }

    /// Record a freshly produced artifact
    pub async fn insert(&self, key: &CacheKey, source: &ArtifactLocation) -> Result<(), CacheError> {
        debug!(key = %key, source = %source, "storing artifact in cache");
        self.store.insert(key, source).await
    }
}

/// Metadata stored next to each host-side artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: CacheKey,
    /// Artifact size in bytes
    pub size: u64,
    /// When this entry was created
    pub created_at: String,
}

/// Host-side store: one directory per key holding `metadata.json` and the
/// artifact. Metadata is written last, so its presence marks a complete entry.
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    cache_dir: PathBuf,
}

impl LocalCacheStore {
    /// Create a store rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_str())
    }

    fn materialize_blocking(entry_dir: &Path, destination: &Path) -> Result<bool, CacheError> {
        let artifact = entry_dir.join(ARTIFACT_FILE);
        if !entry_dir.join(METADATA_FILE).is_file() || !artifact.is_file() {
            return Ok(false);
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&artifact, destination)?;
        Ok(true)
    }

    fn insert_blocking(entry_dir: &Path, key: &CacheKey, source: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(entry_dir)?;

        let mut artifact = tempfile::NamedTempFile::new_in(entry_dir)?;
        let size = std::io::copy(&mut fs::File::open(source)?, &mut artifact)?;
        artifact
            .persist(entry_dir.join(ARTIFACT_FILE))
            .map_err(|e| CacheError::Io(e.error))?;

        let entry = CacheEntry {
            key: key.clone(),
            size,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut metadata = tempfile::NamedTempFile::new_in(entry_dir)?;
        metadata.write_all(serde_json::to_string_pretty(&entry)?.as_bytes())?;
        metadata
            .persist(entry_dir.join(METADATA_FILE))
            .map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }

    /// Remove entries older than `max_age`
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        // an age beyond what chrono can represent leaves no entry old enough
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age));

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            stats.total += 1;

            let created = fs::read_to_string(path.join(METADATA_FILE))
                .ok()
                .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).ok())
                .and_then(|entry| chrono::DateTime::parse_from_rfc3339(&entry.created_at).ok());

            match created {
                Some(created) if cutoff.is_some_and(|cutoff| created < cutoff) => {
                    if fs::remove_dir_all(&path).is_ok() {
                        stats.removed += 1;
                        continue;
                    }
                }
                // an entry without readable metadata was never completed
                None => {
                    if fs::remove_dir_all(&path).is_ok() {
                        stats.removed += 1;
                        continue;
                    }
                }
                Some(_) => {}
            }
            stats.kept += 1;
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            stats.entries += 1;

            if let Ok(files) = fs::read_dir(&path) {
                for file in files.flatten() {
                    if let Ok(meta) = file.metadata() {
                        stats.total_size += meta.len();
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Remove every entry
    pub fn clean(&self) -> Result<CacheStats, CacheError> {
        let stats = self.status()?;
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        info!(entries = stats.entries, "cache cleared");
        Ok(stats)
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    fn describe(&self) -> String {
        format!("host:{}", self.cache_dir.display())
    }

    async fn is_available(&self) -> bool {
        tokio::fs::create_dir_all(&self.cache_dir).await.is_ok()
    }

    async fn materialize(&self, key: &CacheKey, destination: &ArtifactLocation) -> Result<bool, CacheError> {
        let ArtifactLocation::Local(destination) = destination else {
            return Err(CacheError::UnsupportedLocation {
                store: self.describe(),
                location: destination.to_string(),
            });
        };
        let entry_dir = self.entry_dir(key);
        let destination = destination.clone();
        tokio::task::spawn_blocking(move || Self::materialize_blocking(&entry_dir, &destination))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
    }

    async fn insert(&self, key: &CacheKey, source: &ArtifactLocation) -> Result<(), CacheError> {
        let ArtifactLocation::Local(source) = source else {
            return Err(CacheError::UnsupportedLocation {
                store: self.describe(),
                location: source.to_string(),
            });
        };
        let entry_dir = self.entry_dir(key);
        let key = key.clone();
        let source = source.clone();
        tokio::task::spawn_blocking(move || Self::insert_blocking(&entry_dir, &key, &source))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
    }
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else if self.total_size < 1024 * 1024 * 1024 {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        } else {
            format!(
                "{:.1} GB",
                self.total_size as f64 / (1024.0 * 1024.0 * 1024.0)
            )
        }
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device-side store failed
    #[error("Device cache error: {0}")]
    Remote(#[from] RemoteError),

    /// Store cannot serve this kind of location
    #[error("Cache store {store} cannot handle {location}")]
    UnsupportedLocation { store: String, location: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct UnavailableStore;

    #[async_trait]
    impl CacheStore for UnavailableStore {
        fn describe(&self) -> String {
            "unavailable".to_string()
        }

        async fn is_available(&self) -> bool {
            false
        }

        async fn materialize(&self, _: &CacheKey, _: &ArtifactLocation) -> Result<bool, CacheError> {
            Ok(false)
        }

        async fn insert(&self, _: &CacheKey, _: &ArtifactLocation) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn local_cache(temp: &TempDir) -> (ContentCache, LocalCacheStore) {
        let store = LocalCacheStore::new(temp.path().join("cache"));
        (ContentCache::new(Arc::new(store.clone())), store)
    }

    async fn key_for(cache: &ContentCache, inputs: &[CacheInput]) -> CacheKey {
        cache.fingerprint(inputs).await.unwrap().key().unwrap().clone()
    }

    #[tokio::test]
    async fn test_fingerprint_deterministic_and_content_based() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = local_cache(&temp);
        let a = temp.path().join("a.java");
        let b = temp.path().join("b.java");
        fs::write(&a, "class A {}").unwrap();
        fs::write(&b, "class A {}").unwrap();

        let key_a = key_for(&cache, &[CacheInput::file(&a), CacheInput::text("javac")]).await;
        let key_b = key_for(&cache, &[CacheInput::file(&b), CacheInput::text("javac")]).await;
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.as_str().len(), 64);

        let other = key_for(&cache, &[CacheInput::file(&a), CacheInput::text("d8")]).await;
        assert_ne!(key_a, other);
    }

    #[tokio::test]
    async fn test_fingerprint_framing_prevents_collisions() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = local_cache(&temp);
        let ab = key_for(&cache, &[CacheInput::text("ab"), CacheInput::text("c")]).await;
        let abc = key_for(&cache, &[CacheInput::text("a"), CacheInput::text("bc")]).await;
        assert_ne!(ab, abc);
    }

    #[tokio::test]
    async fn test_fingerprint_uncacheable_when_store_unavailable() {
        let cache = ContentCache::new(Arc::new(UnavailableStore));
        let fingerprint = cache.fingerprint(&[CacheInput::text("x")]).await.unwrap();
        assert_eq!(fingerprint, Fingerprint::Uncacheable);
        assert!(fingerprint.key().is_none());
    }

    #[tokio::test]
    async fn test_fingerprint_missing_input_is_error() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = local_cache(&temp);
        let result = cache
            .fingerprint(&[CacheInput::file(temp.path().join("missing.jar"))])
            .await;
        assert!(matches!(result, Err(CacheError::Io(_))));
    }

    #[tokio::test]
    async fn test_insert_then_get_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = local_cache(&temp);
        let source = temp.path().join("out/a.dex");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        fs::write(&source, &bytes).unwrap();

        let key = key_for(&cache, &[CacheInput::file(&source)]).await;
        cache
            .insert(&key, &ArtifactLocation::Local(source.clone()))
            .await
            .unwrap();

        let destination = temp.path().join("elsewhere/nested/a.dex");
        let lookup = cache
            .try_get(&ArtifactLocation::Local(destination.clone()), &key)
            .await
            .unwrap();
        assert!(lookup.is_hit());
        assert_eq!(fs::read(&destination).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_miss_has_no_side_effect() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = local_cache(&temp);
        let destination = temp.path().join("out/a.dex");

        let lookup = cache
            .try_get(&ArtifactLocation::Local(destination.clone()), &CacheKey("00".repeat(32)))
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup::Miss);
        assert!(!destination.exists());
        assert!(!temp.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_duplicate_insert_overwrites() {
        let temp = TempDir::new().unwrap();
        let (cache, store) = local_cache(&temp);
        let source = temp.path().join("a.dex");
        fs::write(&source, b"dex").unwrap();
        let key = CacheKey("ab".repeat(32));

        let location = ArtifactLocation::Local(source);
        let (first, second) = tokio::join!(cache.insert(&key, &location), cache.insert(&key, &location));
        first.unwrap();
        second.unwrap();

        let stats = store.status().unwrap();
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_local_store_rejects_remote_locations() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = local_cache(&temp);
        let result = cache
            .try_get(&ArtifactLocation::Remote("/data/local/tmp/a.dex".to_string()), &CacheKey("k".to_string()))
            .await;
        assert!(matches!(result, Err(CacheError::UnsupportedLocation { .. })));
    }

    #[tokio::test]
    async fn test_prune_and_clean() {
        let temp = TempDir::new().unwrap();
        let (cache, store) = local_cache(&temp);
        let source = temp.path().join("a.dex");
        fs::write(&source, b"dex").unwrap();
        cache
            .insert(&CacheKey("fresh".to_string()), &ArtifactLocation::Local(source))
            .await
            .unwrap();

        // an incomplete entry is pruned regardless of age
        fs::create_dir_all(store.cache_dir().join("partial")).unwrap();

        let stats = store.prune(Duration::from_secs(3600)).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.kept, 1);

        let stats = store.prune(Duration::MAX).unwrap();
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.kept, 1);

        let stats = store.prune(Duration::ZERO).unwrap();
        assert_eq!(stats.removed, 1);

        cache
            .insert(
                &CacheKey("again".to_string()),
                &ArtifactLocation::Local(temp.path().join("a.dex")),
            )
            .await
            .unwrap();
        let cleared = store.clean().unwrap();
        assert_eq!(cleared.entries, 1);
        assert_eq!(store.status().unwrap().entries, 0);
    }

    #[test]
    fn test_cache_status_empty() {
        let temp = TempDir::new().unwrap();
        let store = LocalCacheStore::new(temp.path().join("cache"));

        let stats = store.status().unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
    }

    #[test]
    fn test_cache_stats_formatted_size() {
        let stats = CacheStats {
            entries: 0,
            total_size: 1536,
        };
        assert_eq!(stats.formatted_size(), "1.5 KB");

        let stats = CacheStats {
            entries: 0,
            total_size: 500,
        };
        assert_eq!(stats.formatted_size(), "500 B");
    }
}
