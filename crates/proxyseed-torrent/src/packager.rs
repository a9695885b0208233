//! Content-addressed BitTorrent packaging.
//!
//! # Design
//! - Content goes through the [`ContentStore`] first, so identical bytes share
//!   one object and one metainfo file.
//! - The metainfo is single-file v1: `name` is the content digest, pieces are
//!   SHA-1 hashes of `piece length` slices of the object.
//! - `<torrents>/<digest>.torrent` is written once. Later packages of the same
//!   content decode the existing file and report its infohash.
//! - Filesystem and hashing work runs on the blocking pool.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use proxyseed_config::TorrentSettings;
use proxyseed_content::{ContentMeta, ContentStore};
use proxyseed_core::{BoxError, FetchResult, Package, PackageError, Packager};
use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bencode::{self, Value};

const TORRENT_EXTENSION: &str = "torrent";

/// [`Packager`] producing `.torrent` metainfo for stored content.
#[derive(Clone)]
pub struct TorrentPackager {
    content: ContentStore,
    torrents_dir: PathBuf,
    settings: TorrentSettings,
}

impl TorrentPackager {
    /// Packager writing metainfo under `torrents_dir` (created if missing).
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Io`] when the directory cannot be created.
    pub fn new(
        content: ContentStore,
        torrents_dir: impl Into<PathBuf>,
        settings: TorrentSettings,
    ) -> Result<Self, PackageError> {
        let torrents_dir = torrents_dir.into();
        fs::create_dir_all(&torrents_dir).map_err(|source| PackageError::Io {
            operation: "torrents_dir.create",
            path: torrents_dir.clone(),
            source,
        })?;
        Ok(Self {
            content,
            torrents_dir,
            settings,
        })
    }

    /// Backing content store.
    #[must_use]
    pub const fn content_store(&self) -> &ContentStore {
        &self.content
    }

    /// Directory holding metainfo files.
    #[must_use]
    pub fn torrents_dir(&self) -> &Path {
        &self.torrents_dir
    }

    /// Torrent settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &TorrentSettings {
        &self.settings
    }

    /// Magnet link for `infohash` using the configured tracker.
    #[must_use]
    pub fn magnet(&self, infohash: &str, name: &str) -> String {
        magnet_link(infohash, name, &self.settings.announce_url)
    }
}

impl std::fmt::Debug for TorrentPackager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentPackager")
            .field("content_root", &self.content.root())
            .field("torrents_dir", &self.torrents_dir)
            .field("piece_size", &self.settings.piece_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Packager for TorrentPackager {
    async fn package(
        &self,
        content: &FetchResult,
        request_id: Uuid,
    ) -> Result<Package, PackageError> {
        if content.content.is_empty() {
            return Err(PackageError::Invalid {
                reason: "content is empty",
            });
        }
        if self.settings.piece_size == 0 {
            return Err(PackageError::Invalid {
                reason: "piece size must be positive",
            });
        }

        let packager = self.clone();
        let bytes = content.content.clone();
        let meta = ContentMeta {
            url: content.url.clone(),
            content_type: content.content_type.clone(),
            size: bytes.len() as u64,
            status_code: content.status_code,
            headers: content.headers.clone(),
        };
        let package = tokio::task::spawn_blocking(move || packager.build(&bytes, &meta))
            .await
            .map_err(|err| failed("package.join", err))??;
        info!(
            request_id = %request_id,
            package_id = %package.package_id,
            content_hash = %package.content_hash,
            "content packaged"
        );
        Ok(package)
    }
}

impl TorrentPackager {
    fn build(&self, bytes: &[u8], meta: &ContentMeta) -> Result<Package, PackageError> {
        let stored = self
            .content
            .put(bytes, meta)
            .map_err(|err| failed("content.put", err))?;
        let digest = stored.digest.as_str().to_string();
        let package_path = self
            .torrents_dir
            .join(format!("{digest}.{TORRENT_EXTENSION}"));

        let package_id = if package_path.exists() {
            debug!(path = %package_path.display(), "reusing existing metainfo");
            read_infohash(&package_path)?
        } else {
            let (document, infohash) = self.metainfo(&digest, bytes);
            write_once(&package_path, &document)?;
            infohash
        };

        Ok(Package {
            package_path,
            package_id,
            content_path: stored.path,
            content_hash: digest,
            content_size: bytes.len() as u64,
        })
    }

    fn metainfo(&self, name: &str, bytes: &[u8]) -> (Vec<u8>, String) {
        let piece_size = self.settings.piece_size as usize;
        let mut pieces = Vec::with_capacity(bytes.len().div_ceil(piece_size) * 20);
        for piece in bytes.chunks(piece_size) {
            pieces.extend_from_slice(&Sha1::digest(piece));
        }

        let mut info = BTreeMap::new();
        info.insert(
            b"length".to_vec(),
            Value::Int(i64::try_from(bytes.len()).unwrap_or(i64::MAX)),
        );
        info.insert(b"name".to_vec(), Value::text(name));
        info.insert(
            b"piece length".to_vec(),
            Value::Int(i64::from(self.settings.piece_size)),
        );
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));
        if self.settings.private {
            info.insert(b"private".to_vec(), Value::Int(1));
        }
        let info = Value::Dict(info);
        let infohash = infohash_of(&info);

        let mut root = BTreeMap::new();
        root.insert(b"announce".to_vec(), Value::text(&self.settings.announce_url));
        root.insert(b"created by".to_vec(), Value::text(&self.settings.created_by));
        root.insert(
            b"creation date".to_vec(),
            Value::Int(Utc::now().timestamp()),
        );
        root.insert(b"info".to_vec(), info);
        (Value::Dict(root).to_bytes(), infohash)
    }
}

/// Hex SHA-1 of the bencoded info dictionary.
#[must_use]
pub fn infohash_of(info: &Value) -> String {
    hex::encode(Sha1::digest(info.to_bytes()))
}

/// Decode a metainfo file and recompute its infohash.
///
/// # Errors
///
/// Returns [`PackageError::Io`] when the file cannot be read and
/// [`PackageError::Invalid`] when it is not a metainfo document.
pub fn read_infohash(path: &Path) -> Result<String, PackageError> {
    let raw = fs::read(path).map_err(|source| PackageError::Io {
        operation: "metainfo.read",
        path: path.to_path_buf(),
        source,
    })?;
    let document = bencode::decode(&raw).map_err(|err| failed("metainfo.decode", err))?;
    let info = document.get("info").ok_or(PackageError::Invalid {
        reason: "metainfo has no info dictionary",
    })?;
    Ok(infohash_of(info))
}

/// `magnet:` URI for a package.
#[must_use]
pub fn magnet_link(infohash: &str, name: &str, announce: &str) -> String {
    let name: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
    let tracker: String = url::form_urlencoded::byte_serialize(announce.as_bytes()).collect();
    format!("magnet:?xt=urn:btih:{infohash}&dn={name}&tr={tracker}")
}

fn write_once(path: &Path, document: &[u8]) -> Result<(), PackageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |operation: &'static str, source: io::Error| PackageError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|source| io_err("metainfo.tempfile", source))?;
    temp.write_all(document)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|source| io_err("metainfo.write", source))?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "metainfo written concurrently");
            Ok(())
        }
        Err(err) => Err(io_err("metainfo.persist", err.error)),
    }
}

fn failed<E>(operation: &'static str, err: E) -> PackageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let source: BoxError = Box::new(err);
    PackageError::Failed { operation, source }
}
