//! Collaborator traits consumed by the pipeline.

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{FetchError, PackageError, SeederError, StoreError, TransitionError};
use crate::model::{FetchRequest, FetchResult, FetchSpec, Package, SeedStats};
use crate::state::RequestStatus;

/// Retrieves remote content.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Execute the upstream request described by `spec`.
    async fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult, FetchError>;
}

/// Turns fetched content into a distributable package.
#[async_trait]
pub trait Packager: Send + Sync {
    /// Store `content` and produce package metadata for it.
    async fn package(&self, content: &FetchResult, request_id: Uuid)
    -> Result<Package, PackageError>;
}

/// Registers packages for peer-to-peer distribution.
#[async_trait]
pub trait Seeder: Send + Sync {
    /// Start seeding a package; adding an already-registered package is a no-op.
    async fn add_package(
        &self,
        package_path: &Path,
        content_path: &Path,
        package_id: &str,
    ) -> Result<(), SeederError>;

    /// Current statistics, or `None` when the package is not registered.
    async fn status(&self, package_id: &str) -> Option<SeedStats>;

    /// Stop seeding a package; default implementation reports lack of support.
    async fn remove(&self, package_id: &str) -> Result<bool, SeederError> {
        let _ = package_id;
        Err(SeederError::Unsupported {
            operation: "remove",
        })
    }
}

/// Read-modify-write closure applied by [`RequestStore::update`].
///
/// Returning an error leaves the stored record untouched.
pub type RecordMutator =
    Box<dyn FnOnce(&mut FetchRequest) -> Result<(), TransitionError> + Send>;

/// Persistence for request records with atomic per-record updates.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new record.
    async fn create(&self, record: FetchRequest) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<FetchRequest>, StoreError>;

    /// Apply `mutator` atomically and return the stored result.
    async fn update(&self, id: Uuid, mutator: RecordMutator) -> Result<FetchRequest, StoreError>;

    /// All records currently in `status`, oldest first.
    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<FetchRequest>, StoreError>;
}
