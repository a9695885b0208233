//! Volatile request store backed by a map of per-record mutexes.
//!
//! Nothing is written to disk. Listing clones each record under its own lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use proxyseed_core::{FetchRequest, RecordMutator, RequestStatus, RequestStore, StoreError};
use tokio::sync::Mutex;
use uuid::Uuid;

type Slot = Arc<Mutex<FetchRequest>>;

/// In-process request store.
///
/// Records live only as long as the process; use [`crate::FileRequestStore`]
/// when queued work must survive restarts.
#[derive(Clone, Default)]
pub struct MemoryRequestStore {
    slots: Arc<RwLock<HashMap<Uuid, Slot>>>,
}

impl MemoryRequestStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create(&self, record: FetchRequest) -> Result<(), StoreError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists { id: record.id });
        }
        slots.insert(record.id, Arc::new(Mutex::new(record)));
        drop(slots);
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
