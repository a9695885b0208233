//! Idempotent content-addressable storage.
//!
//! # Design
//! - Objects live at `<root>/<d[0..2]>/<d[2..4]>/<digest>` with a `<digest>.json` sidecar.
//! - Writes go to a temporary file in the shard directory and are linked into
//!   place without clobbering; an existing object is a successful no-op.
//! - The store counts physical writes so deduplication is observable.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use proxyseed_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::digest::ContentDigest;
use crate::error::{ContentError, ContentResult};

const SIDECAR_EXTENSION: &str = "json";

/// Origin details recorded next to each object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    /// URL the bytes were fetched from.
    pub url: String,
    /// Upstream content type.
    pub content_type: String,
    /// Object size in bytes.
    pub size: u64,
    /// Upstream status code.
    pub status_code: u16,
    /// Upstream response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Outcome of [`ContentStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Digest of the bytes.
    pub digest: ContentDigest,
    /// Location of the object.
    pub path: PathBuf,
    /// Whether this call physically wrote the object.
    pub created: bool,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentStats {
    /// Number of stored objects.
    pub objects: u64,
    /// Total object bytes.
    pub bytes: u64,
}

/// Content-addressable store rooted at a directory.
#[derive(Clone)]
pub struct ContentStore {
    root: PathBuf,
    writes: Arc<AtomicU64>,
    metrics: Option<Metrics>,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Io`] when the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> ContentResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| ContentError::io("root.create", &root, err))?;
        Ok(Self {
            root,
            writes: Arc::new(AtomicU64::new(0)),
            metrics: None,
        })
    }

    /// Report physical writes to the shared metrics registry.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic object location for `digest`, whether or not it exists.
    #[must_use]
    pub fn object_path(&self, digest: &ContentDigest) -> PathBuf {
        digest.shard_dir(&self.root).join(digest.as_str())
    }

    fn sidecar_path(&self, digest: &ContentDigest) -> PathBuf {
        self.object_path(digest).with_extension(SIDECAR_EXTENSION)
    }

    /// Whether an object is stored for `digest`.
    #[must_use]
    pub fn exists(&self, digest: &ContentDigest) -> bool {
        self.object_path(digest).is_file()
    }

    /// Location of the stored object, or `None` when absent.
    #[must_use]
    pub fn path_for(&self, digest: &ContentDigest) -> Option<PathBuf> {
        let path = self.object_path(digest);
        path.is_file().then_some(path)
    }

    /// Physical writes performed by this store instance.
    #[must_use]
    pub fn writes_total(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Store `bytes`, returning the digest and location.
    ///
    /// The first successful writer for a digest wins; later calls with the
    /// same bytes return the existing location with `created == false`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError`] when the shard directory, temporary file, or
    /// sidecar cannot be written.
    pub fn put(&self, bytes: &[u8], meta: &ContentMeta) -> ContentResult<StoredObject> {
        let digest = ContentDigest::of(bytes);
        let path = self.object_path(&digest);
        let created = if path.is_file() {
            false
        } else {
            let shard = digest.shard_dir(&self.root);
            fs::create_dir_all(&shard)
                .map_err(|err| ContentError::io("shard.create", &shard, err))?;
            write_noclobber(&shard, &path, bytes, "object.write")?
        };

        if created {
            self.writes.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.inc_content_store_write();
            }
            debug!(digest = %digest, size = bytes.len(), "stored content object");
        } else {
            debug!(digest = %digest, "content object already stored");
        }

        let sidecar = self.sidecar_path(&digest);
        if !sidecar.is_file() {
            let encoded = serde_json::to_vec_pretty(meta)
                .map_err(|err| ContentError::json("meta.serialize", &sidecar, err))?;
            let shard = digest.shard_dir(&self.root);
            write_noclobber(&shard, &sidecar, &encoded, "meta.write")?;
        }

        Ok(StoredObject {
            digest,
            path,
            created,
        })
    }

    /// Sidecar metadata for `digest`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError`] when the sidecar exists but cannot be read or decoded.
    pub fn metadata(&self, digest: &ContentDigest) -> ContentResult<Option<ContentMeta>> {
        let path = self.sidecar_path(digest);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ContentError::io("meta.read", &path, err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| ContentError::json("meta.parse", &path, err))
    }

    /// Walk the store and total its objects.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Walk`] when traversal fails.
    pub fn stats(&self) -> ContentResult<ContentStats> {
        let mut stats = ContentStats::default();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|source| ContentError::Walk {
                path: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() || !is_object_name(entry.file_name()) {
                continue;
            }
            let len = entry
                .metadata()
                .map_err(|source| ContentError::Walk {
                    path: entry.path().to_path_buf(),
                    source,
                })?
                .len();
            stats.objects += 1;
            stats.bytes += len;
        }
        Ok(stats)
    }
}

fn is_object_name(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .is_some_and(|name| ContentDigest::parse(name).is_ok())
}

/// Write `bytes` to `target` unless it already exists. Returns whether this call wrote it.
fn write_noclobber(
    dir: &Path,
    target: &Path,
    bytes: &[u8],
    operation: &'static str,
) -> ContentResult<bool> {
    let mut temp =
        NamedTempFile::new_in(dir).map_err(|err| ContentError::io(operation, dir, err))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| ContentError::io(operation, temp.path(), err))?;

    match temp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(ContentError::io(operation, target, err.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn meta(url: &str, size: usize) -> ContentMeta {
        ContentMeta {
            url: url.to_string(),
            content_type: "text/plain".to_string(),
            size: size as u64,
            status_code: 200,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn put_is_idempotent_per_digest() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = ContentStore::open(dir.path())?;
        let body = b"hello world";

        let first = store.put(body, &meta("https://a.test", body.len()))?;
        let second = store.put(body, &meta("https://b.test", body.len()))?;

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.path, second.path);
        assert_eq!(store.writes_total(), 1);
        assert_eq!(fs::read(&first.path)?, body);

        let recorded = store.metadata(&first.digest)?.expect("sidecar present");
        assert_eq!(recorded.url, "https://a.test");
        Ok(())
    }

    #[test]
    fn layout_is_sharded_by_digest_prefix() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = ContentStore::open(dir.path())?;
        let stored = store.put(b"abc", &meta("https://a.test", 3))?;

        let expected = dir
            .path()
            .join("ba")
            .join("78")
            .join(stored.digest.as_str());
        assert_eq!(stored.path, expected);
        assert!(store.exists(&stored.digest));
        assert_eq!(store.path_for(&stored.digest), Some(expected));
        Ok(())
    }

    #[test]
    fn absent_digests_report_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = ContentStore::open(dir.path())?;
        let digest = ContentDigest::of(b"never stored");
        assert!(!store.exists(&digest));
        assert!(store.path_for(&digest).is_none());
        assert!(store.metadata(&digest)?.is_none());
        Ok(())
    }

    #[test]
    fn concurrent_writers_converge_on_one_object() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = ContentStore::open(dir.path())?;
        let body = vec![7_u8; 64 * 1024];

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let body = body.clone();
                thread::spawn(move || store.put(&body, &meta("https://a.test", body.len())))
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            let stored = handle.join().expect("writer panicked")?;
            if stored.created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.writes_total(), 1);
        assert_eq!(store.stats()?.objects, 1);
        Ok(())
    }

    #[test]
    fn stats_ignore_sidecars() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = ContentStore::open(dir.path())?;
        store.put(b"one", &meta("https://a.test", 3))?;
        store.put(b"three", &meta("https://b.test", 5))?;

        let stats = store.stats()?;
        assert_eq!(stats.objects, 2);
        assert_eq!(stats.bytes, 8);
        Ok(())
    }

    #[test]
    fn metrics_count_physical_writes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let metrics = Metrics::new()?;
        let store = ContentStore::open(dir.path())?.with_metrics(metrics.clone());
        store.put(b"x", &meta("https://a.test", 1))?;
        store.put(b"x", &meta("https://a.test", 1))?;
        assert_eq!(metrics.snapshot().content_store_writes_total, 1);
        Ok(())
    }
}
