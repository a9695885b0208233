//! Fake collaborators that record how the pipeline drives them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use proxyseed_content::{ContentMeta, ContentStore};
use proxyseed_core::{
    FetchError, FetchResult, FetchSpec, Fetcher, Package, PackageError, Packager, SeedState,
    SeedStats, Seeder, SeederError,
};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

/// Failure a [`StubFetcher`] route produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubFailure {
    /// [`FetchError::Timeout`].
    Timeout,
    /// [`FetchError::SizeExceeded`].
    SizeExceeded,
    /// [`FetchError::MimeRejected`].
    MimeRejected,
    /// [`FetchError::Transport`].
    Transport,
}

impl StubFailure {
    fn into_error(self, url: &str) -> FetchError {
        match self {
            Self::Timeout => FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: 30,
            },
            Self::SizeExceeded => FetchError::SizeExceeded {
                limit: 1_024,
                observed: Some(4_096),
            },
            Self::MimeRejected => FetchError::MimeRejected {
                content_type: "application/octet-stream".to_string(),
            },
            Self::Transport => FetchError::Transport {
                detail: format!("connection refused: {url}"),
                source: None,
            },
        }
    }
}

#[derive(Clone)]
enum StubRoute {
    Body { content: Bytes, content_type: String },
    Fail(StubFailure),
    Panic,
}

/// Holds fetches until the test releases them.
#[derive(Clone)]
pub struct FetchGate {
    permits: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl FetchGate {
    /// Wait until a fetch is parked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let `count` parked fetches continue.
    pub fn release(&self, count: usize) {
        self.permits.add_permits(count);
    }
}

/// URL-keyed fake [`Fetcher`].
#[derive(Clone, Default)]
pub struct StubFetcher {
    routes: Arc<Mutex<HashMap<String, StubRoute>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
    gate: Option<FetchGate>,
}

impl StubFetcher {
    /// Fetcher with no routes; unknown URLs fail with a transport error.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every fetch.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Park every fetch on a gate; returns the handle that releases them.
    #[must_use]
    pub fn gated(mut self) -> (Self, FetchGate) {
        let gate = FetchGate {
            permits: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        };
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Serve `body` with `content_type` for `url`.
    pub fn respond(&self, url: &str, body: impl Into<Bytes>, content_type: &str) {
        self.route(
            url,
            StubRoute::Body {
                content: body.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    /// Fail fetches of `url`.
    pub fn fail(&self, url: &str, failure: StubFailure) {
        self.route(url, StubRoute::Fail(failure));
    }

    /// Panic while fetching `url`.
    pub fn panic_on(&self, url: &str) {
        self.route(url, StubRoute::Panic);
    }

    /// URLs fetched so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of fetches of `url`.
    #[must_use]
    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    fn route(&self, url: &str, route: StubRoute) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), route);
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult, FetchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.url.clone());

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            let permit = gate
                .permits
                .acquire()
                .await
                .map_err(|err| FetchError::Transport {
                    detail: "fetch gate closed".to_string(),
                    source: Some(Box::new(err)),
                })?;
            permit.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let route = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&spec.url)
            .cloned();
        match route {
            Some(StubRoute::Body {
                content,
                content_type,
            }) => Ok(FetchResult {
                content,
                content_type,
                status_code: 200,
                headers: BTreeMap::new(),
                url: spec.url.clone(),
            }),
            Some(StubRoute::Fail(failure)) => Err(failure.into_error(&spec.url)),
            Some(StubRoute::Panic) => panic!("stub fetcher panicked for {}", spec.url),
            None => Err(StubFailure::Transport.into_error(&spec.url)),
        }
    }
}

/// [`Packager`] that stores content in a real [`ContentStore`] and writes a
/// small marker file as the package.
pub struct StoringPackager {
    store: ContentStore,
    out_dir: PathBuf,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StoringPackager {
    /// Packager writing packages into `out_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `out_dir` cannot be created.
    pub fn new(store: ContentStore, out_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)?;
        Ok(Self {
            store,
            out_dir,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    /// Make subsequent calls fail.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Number of `package` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Underlying content store.
    #[must_use]
    pub const fn store(&self) -> &ContentStore {
        &self.store
    }
}

#[async_trait]
impl Packager for StoringPackager {
    async fn package(
        &self,
        content: &FetchResult,
        _request_id: Uuid,
    ) -> Result<Package, PackageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PackageError::Invalid {
                reason: "packager disabled",
            });
        }
        if content.content.is_empty() {
            return Err(PackageError::Invalid {
                reason: "content is empty",
            });
        }

        let meta = ContentMeta {
            url: content.url.clone(),
            content_type: content.content_type.clone(),
            size: content.content.len() as u64,
            status_code: content.status_code,
            headers: content.headers.clone(),
        };
        let stored = self
            .store
            .put(&content.content, &meta)
            .map_err(|err| PackageError::Failed {
                operation: "content.put",
                source: Box::new(err),
            })?;

        let package_id = stored.digest.as_str()[..40].to_string();
        let package_path = self.out_dir.join(format!("{}.pkg", stored.digest));
        if !package_path.exists() {
            std::fs::write(&package_path, &package_id).map_err(|source| PackageError::Io {
                operation: "package.write",
                path: package_path.clone(),
                source,
            })?;
        }

        Ok(Package {
            package_path,
            package_id,
            content_path: stored.path,
            content_hash: stored.digest.to_string(),
            content_size: meta.size,
        })
    }
}

/// In-memory [`Seeder`] that checks files exist and records registrations.
#[derive(Default)]
pub struct RecordingSeeder {
    packages: Mutex<HashMap<String, (PathBuf, PathBuf)>>,
    adds: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingSeeder {
    /// Empty seeder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent registrations fail.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Number of `add_package` calls, including no-op repeats.
    #[must_use]
    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    /// Whether `package_id` is registered.
    #[must_use]
    pub fn contains(&self, package_id: &str) -> bool {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(package_id)
    }
}

fn require_file(path: &Path) -> Result<(), SeederError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SeederError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl Seeder for RecordingSeeder {
    async fn add_package(
        &self,
        package_path: &Path,
        content_path: &Path,
        package_id: &str,
    ) -> Result<(), SeederError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SeederError::Failed {
                operation: "add_package",
                source: "seeder offline".into(),
            });
        }
        require_file(package_path)?;
        require_file(content_path)?;
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(package_id.to_string())
            .or_insert_with(|| (package_path.to_path_buf(), content_path.to_path_buf()));
        Ok(())
    }

    async fn status(&self, package_id: &str) -> Option<SeedStats> {
        self.contains(package_id).then(|| SeedStats {
            state: SeedState::Seeding,
            progress: 1.0,
            upload_rate: 0,
            download_rate: 0,
            num_peers: 0,
            num_seeds: 0,
            total_upload: 0,
            total_download: 0,
        })
    }

    async fn remove(&self, package_id: &str) -> Result<bool, SeederError> {
        Ok(self
            .packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(package_id)
            .is_some())
    }
}
