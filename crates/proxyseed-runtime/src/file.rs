//! Durable request store keeping one JSON file per record.
//!
//! `open` loads every `<id>.json` in the directory and skips unreadable files
//! with a warning. Writes stage to `<id>.json.tmp` and rename over the record,
//! so a crash leaves either the old or the new contents on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use proxyseed_core::{FetchRequest, RecordMutator, RequestStatus, RequestStore, StoreError};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

type Slot = Arc<Mutex<FetchRequest>>;

const RECORD_EXTENSION: &str = "json";
const STAGING_EXTENSION: &str = "json.tmp";

/// Request store persisting one JSON document per record.
///
/// Records are cached in memory; every accepted mutation is written to a
/// staging file and renamed over the record before the cache is updated.
#[derive(Clone)]
pub struct FileRequestStore {
    dir: PathBuf,
    slots: Arc<RwLock<HashMap<Uuid, Slot>>>,
}

impl FileRequestStore {
    /// Open the store at `dir`, loading every record already on disk.
    ///
    /// Unreadable or malformed documents are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the directory cannot be created or listed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| backend("dir.create", err))?;

        let mut slots = HashMap::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|err| backend("dir.read", err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| backend("dir.read", err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match load_record(&path).await {
                Ok(record) => {
                    slots.insert(record.id, Arc::new(Mutex::new(record)));
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable request record"),
            }
        }
        debug!(dir = %dir.display(), records = slots.len(), "request store opened");

        Ok(Self {
            dir,
            slots: Arc::new(RwLock::new(slots)),
        })
    }

    /// Directory holding the record documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn slot(&self, id: Uuid) -> Option<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    async fn persist(&self, record: &FetchRequest) -> Result<(), StoreError> {
        let target = self.record_path(record.id);
        let staging = self
            .dir
            .join(format!("{}.{STAGING_EXTENSION}", record.id));
        let encoded =
            serde_json::to_vec_pretty(record).map_err(|err| backend("record.encode", err))?;
        fs::write(&staging, encoded)
            .await
            .map_err(|err| backend("record.write", err))?;
        fs::rename(&staging, &target)
            .await
            .map_err(|err| backend("record.rename", err))
    }
}

async fn load_record(path: &Path) -> Result<FetchRequest, StoreError> {
    let raw = fs::read(path)
        .await
        .map_err(|err| backend("record.read", err))?;
    serde_json::from_slice(&raw).map_err(|err| backend("record.decode", err))
}

fn backend<E>(operation: &'static str, err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Backend {
        operation,
        source: Box::new(err),
    }
}

#[async_trait]
impl RequestStore for FileRequestStore {
    async fn create(&self, record: FetchRequest) -> Result<(), StoreError> {
        let id = record.id;
        let slot: Slot = Arc::new(Mutex::new(record.clone()));
        let guard = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            if slots.contains_key(&id) {
                return Err(StoreError::AlreadyExists { id });
            }
            let guard = Arc::clone(&slot)
                .try_lock_owned()
                .map_err(|_| StoreError::AlreadyExists { id })?;
            slots.insert(id, slot);
            guard
        };

        if let Err(err) = self.persist(&record).await {
            self.slots
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            drop(guard);
            return Err(err);
        }
        drop(guard);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FetchRequest>, StoreError> {
        match self.slot(id) {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn update(&self, id: Uuid, mutator: RecordMutator) -> Result<FetchRequest, StoreError> {
        let slot = self.slot(id).ok_or(StoreError::NotFound { id })?;
        let mut guard = slot.lock().await;
        let mut candidate = guard.clone();
        mutator(&mut candidate).map_err(|source| StoreError::Rejected { id, source })?;
        self.persist(&candidate).await?;
        *guard = candidate.clone();
        drop(guard);
        Ok(candidate)
    }

    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<FetchRequest>, StoreError> {
        let mut matches = Vec::new();
        for slot in self.all_slots() {
            let record = slot.lock().await;
            if record.status == status {
                matches.push(record.clone());
            }
        }
        matches.sort_by(crate::oldest_first);
        Ok(matches)
    }
}

impl std::fmt::Debug for FileRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRequestStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
