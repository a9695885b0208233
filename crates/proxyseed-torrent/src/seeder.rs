//! In-process seeding registry with resume records.
//!
//! # Design
//! - Packages are keyed by infohash; re-adding a registered package is a no-op.
//! - Each registration is mirrored to `<resume>/<infohash>.json` (temp file then
//!   rename) so [`RegistrySeeder::restore`] can rebuild the registry on startup.
//! - Resume records whose files disappeared are dropped during restore.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proxyseed_core::{BoxError, SeedState, SeedStats, Seeder, SeederError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::packager::read_infohash;

const RESUME_EXTENSION: &str = "json";

/// Persisted registration, one per package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Infohash of the package.
    pub package_id: String,
    /// Metainfo file.
    pub package_path: PathBuf,
    /// Content object being seeded.
    pub content_path: PathBuf,
    /// When the package was first registered.
    pub added_at: DateTime<Utc>,
    /// Bytes uploaded so far.
    #[serde(default)]
    pub total_upload: u64,
}

#[derive(Debug, Clone)]
struct SeedEntry {
    record: ResumeRecord,
    stats: SeedStats,
}

impl SeedEntry {
    const fn seeding(record: ResumeRecord) -> Self {
        let total_upload = record.total_upload;
        Self {
            record,
            stats: SeedStats {
                state: SeedState::Seeding,
                progress: 1.0,
                upload_rate: 0,
                download_rate: 0,
                num_peers: 0,
                num_seeds: 0,
                total_upload,
                total_download: 0,
            },
        }
    }
}

/// [`Seeder`] tracking registered packages and their resume records.
#[derive(Debug)]
pub struct RegistrySeeder {
    resume_dir: PathBuf,
    entries: RwLock<HashMap<String, SeedEntry>>,
}

impl RegistrySeeder {
    /// Registry persisting resume records under `resume_dir` (created if missing).
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::Failed`] when the directory cannot be created.
    pub fn new(resume_dir: impl Into<PathBuf>) -> Result<Self, SeederError> {
        let resume_dir = resume_dir.into();
        std::fs::create_dir_all(&resume_dir).map_err(|err| failed("resume_dir.create", err))?;
        Ok(Self {
            resume_dir,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Directory holding resume records.
    #[must_use]
    pub fn resume_dir(&self) -> &Path {
        &self.resume_dir
    }

    /// Registered infohashes, sorted.
    #[must_use]
    pub fn package_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Rebuild the registry from resume records. Returns how many were restored.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::Failed`] when the resume directory cannot be listed.
    pub async fn restore(&self) -> Result<usize, SeederError> {
        let mut dir = tokio::fs::read_dir(&self.resume_dir)
            .await
            .map_err(|err| failed("resume_dir.read", err))?;
        let mut restored = 0;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|err| failed("resume_dir.read", err))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RESUME_EXTENSION) {
                continue;
            }
            let record = match read_record(&path).await {
                Ok(record) => record,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable resume record");
                    continue;
                }
            };
            if !record.package_path.is_file() || !record.content_path.is_file() {
                warn!(package_id = %record.package_id, "dropping stale resume record");
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %err, "failed to remove stale resume record");
                }
                continue;
            }
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.package_id.clone(), SeedEntry::seeding(record));
            restored += 1;
        }
        info!(restored, "seeding registry restored");
        Ok(restored)
    }

    /// Flush every resume record and clear the registry.
    ///
    /// # Errors
    ///
    /// Returns the first [`SeederError`] raised while writing records; the
    /// registry is cleared regardless.
    pub async fn shutdown(&self) -> Result<(), SeederError> {
        let records: Vec<ResumeRecord> = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| ResumeRecord {
                total_upload: entry.stats.total_upload,
                ..entry.record
            })
            .collect();
        let mut first_error = None;
        for record in &records {
            if let Err(err) = self.write_record(record).await {
                warn!(package_id = %record.package_id, error = %err, "failed to flush resume record");
                first_error.get_or_insert(err);
            }
        }
        info!(flushed = records.len(), "seeding registry shut down");
        first_error.map_or(Ok(()), Err)
    }

    fn record_path(&self, package_id: &str) -> PathBuf {
        self.resume_dir.join(format!("{package_id}.{RESUME_EXTENSION}"))
    }

    async fn write_record(&self, record: &ResumeRecord) -> Result<(), SeederError> {
        let path = self.record_path(&record.package_id);
        let tmp = path.with_extension("json.tmp");
        let payload =
            serde_json::to_vec_pretty(record).map_err(|err| failed("resume.encode", err))?;
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|err| failed("resume.write", err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| failed("resume.rename", err))
    }

    fn contains(&self, package_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(package_id)
    }
}

#[async_trait]
impl Seeder for RegistrySeeder {
    async fn add_package(
        &self,
        package_path: &Path,
        content_path: &Path,
        package_id: &str,
    ) -> Result<(), SeederError> {
        if self.contains(package_id) {
            debug!(package_id, "package already seeding");
            return Ok(());
        }
        for path in [package_path, content_path] {
            if !path.is_file() {
                return Err(SeederError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
        }

        let owned = package_path.to_path_buf();
        let infohash = tokio::task::spawn_blocking(move || read_infohash(&owned))
            .await
            .map_err(|err| failed("metainfo.join", err))?
            .map_err(|err| failed("metainfo.read", err))?;
        if infohash != package_id {
            let source: BoxError = format!("metainfo infohash {infohash} does not match {package_id}").into();
            return Err(SeederError::Failed {
                operation: "metainfo.verify",
                source,
            });
        }

        let record = ResumeRecord {
            package_id: package_id.to_string(),
            package_path: package_path.to_path_buf(),
            content_path: content_path.to_path_buf(),
            added_at: Utc::now(),
            total_upload: 0,
        };
        self.write_record(&record).await?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(package_id.to_string())
            .or_insert_with(|| SeedEntry::seeding(record));
        info!(package_id, "package seeding");
        Ok(())
    }

    async fn status(&self, package_id: &str) -> Option<SeedStats> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(package_id)
            .map(|entry| entry.stats.clone())
    }

    async fn remove(&self, package_id: &str) -> Result<bool, SeederError> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(package_id)
            .is_some();
        match tokio::fs::remove_file(self.record_path(package_id)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(failed("resume.remove", err)),
        }
        if removed {
            info!(package_id, "package removed from seeding");
        }
        Ok(removed)
    }
}

async fn read_record(path: &Path) -> Result<ResumeRecord, SeederError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|err| failed("resume.read", err))?;
    serde_json::from_slice(&raw).map_err(|err| failed("resume.decode", err))
}

fn failed<E>(operation: &'static str, err: E) -> SeederError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let source: BoxError = Box::new(err);
    SeederError::Failed { operation, source }
}
