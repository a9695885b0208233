//! Drives one request through fetch, package, and seed.
//!
//! # Design
//! - Every stage boundary is a single atomic store update; a record that left
//!   the expected state (cancelled, or already terminal) halts the run without
//!   touching further collaborators.
//! - Stage failures are classified by [`StageError`] and persisted on the
//!   record. Nothing is raised to the worker loop.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use proxyseed_content::ContentDigest;
use proxyseed_core::{
    ContentSummary, FetchRequest, Fetcher, PackageSummary, Packager, RecordMutator,
    RequestStatus, RequestStore, Seeder, StageError, StoreError, TransitionError,
};
use proxyseed_events::{Event, EventBus};
use proxyseed_telemetry::Metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The request reached `Ready`.
    Ready(FetchRequest),
    /// The request failed and was marked `Error`.
    Failed(FetchRequest),
    /// The request was cancelled or became terminal elsewhere mid-run.
    Halted,
    /// Nothing to do: the record is missing or was not queued.
    Skipped,
}

enum Step {
    Continue(FetchRequest),
    Halted,
}

/// Runs the pipeline stages against the injected collaborators.
pub struct PipelineExecutor {
    store: Arc<dyn RequestStore>,
    fetcher: Arc<dyn Fetcher>,
    packager: Arc<dyn Packager>,
    seeder: Arc<dyn Seeder>,
    events: EventBus,
    metrics: Option<Metrics>,
}

impl PipelineExecutor {
    /// Executor over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        fetcher: Arc<dyn Fetcher>,
        packager: Arc<dyn Packager>,
        seeder: Arc<dyn Seeder>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            fetcher,
            packager,
            seeder,
            events,
            metrics: None,
        }
    }

    /// Record pipeline outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Process request `id` to a terminal state.
    pub async fn process(&self, id: Uuid) -> RunOutcome {
        match self.run(id).await {
            Ok(outcome) => outcome,
            Err(err) => self.record_failure(id, &err).await,
        }
    }

    /// Mark `id` as failed with an unexpected error, unless it is already terminal.
    pub async fn fail_unexpected(&self, id: Uuid, detail: impl Into<String>) -> RunOutcome {
        let err = StageError::Unexpected {
            detail: detail.into(),
        };
        self.record_failure(id, &err).await
    }

    async fn run(&self, id: Uuid) -> Result<RunOutcome, StageError> {
        let claimed = match self
            .store
            .update(id, mutator(|record| record.advance(RequestStatus::Fetching, Utc::now())))
            .await
        {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) => {
                debug!(request_id = %id, "request vanished before processing");
                return Ok(RunOutcome::Skipped);
            }
            Err(StoreError::Rejected { source, .. }) => {
                debug!(request_id = %id, reason = %source, "request not claimable");
                return Ok(RunOutcome::Skipped);
            }
            Err(err) => return Err(err.into()),
        };
        self.announce(&claimed);

        let fetched = self.fetcher.fetch(&claimed.spec).await?;
        let content = ContentSummary {
            hash: digest_off_thread(fetched.content.clone()).await?,
            size: fetched.content.len() as u64,
            content_type: fetched.content_type.clone(),
        };
        let Step::Continue(_) = self
            .commit(id, mutator(move |record| record.record_content(content, Utc::now())))
            .await?
        else {
            return Ok(RunOutcome::Halted);
        };

        let Step::Continue(packaging) = self
            .commit(id, mutator(|record| record.advance(RequestStatus::Packaging, Utc::now())))
            .await?
        else {
            return Ok(RunOutcome::Halted);
        };
        self.announce(&packaging);

        let package = self.packager.package(&fetched, id).await?;
        let summary = PackageSummary {
            package_id: package.package_id.clone(),
            package_path: package.package_path.clone(),
        };
        let Step::Continue(_) = self
            .commit(id, mutator(move |record| record.record_package(summary, Utc::now())))
            .await?
        else {
            return Ok(RunOutcome::Halted);
        };

        let Step::Continue(seeding) = self
            .commit(id, mutator(|record| record.advance(RequestStatus::Seeding, Utc::now())))
            .await?
        else {
            return Ok(RunOutcome::Halted);
        };
        self.announce(&seeding);

        self.seeder
            .add_package(&package.package_path, &package.content_path, &package.package_id)
            .await?;

        let Step::Continue(ready) = self
            .commit(id, mutator(|record| record.advance(RequestStatus::Ready, Utc::now())))
            .await?
        else {
            return Ok(RunOutcome::Halted);
        };
        self.announce(&ready);
        self.events.publish(Event::Completed {
            request_id: id,
            package_id: package.package_id,
        });
        self.count_outcome(RequestStatus::Ready);
        info!(request_id = %id, package_id = ready.package_id.as_deref().unwrap_or_default(), "request ready");
        Ok(RunOutcome::Ready(ready))
    }

    /// Apply a stage mutation; a rejection caused by the record turning
    /// terminal halts the run instead of failing it.
    async fn commit(&self, id: Uuid, change: RecordMutator) -> Result<Step, StageError> {
        match self.store.update(id, change).await {
            Ok(record) => Ok(Step::Continue(record)),
            Err(err @ StoreError::Rejected { .. }) => {
                match self.store.get(id).await? {
                    Some(current) if current.is_terminal() => {
                        info!(request_id = %id, status = %current.status, "request left the pipeline mid-run");
                        Ok(Step::Halted)
                    }
                    _ => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn record_failure(&self, id: Uuid, err: &StageError) -> RunOutcome {
        let message = err.error_message();
        let update = {
            let message = message.clone();
            self.store
                .update(id, mutator(move |record| record.fail(message, Utc::now())))
                .await
        };
        match update {
            Ok(record) => {
                warn!(request_id = %id, kind = err.kind(), error = %message, "request failed");
                self.events.publish(Event::Failed {
                    request_id: id,
                    message,
                });
                self.count_outcome(RequestStatus::Error);
                RunOutcome::Failed(record)
            }
            Err(StoreError::Rejected { .. }) => {
                debug!(request_id = %id, kind = err.kind(), "failure ignored; request already terminal");
                RunOutcome::Halted
            }
            Err(store_err) => {
                warn!(request_id = %id, error = %store_err, original = %message, "could not persist request failure");
                RunOutcome::Halted
            }
        }
    }

    fn announce(&self, record: &FetchRequest) {
        debug!(request_id = %record.id, status = %record.status, progress = record.progress, "stage entered");
        self.events.publish(Event::StatusChanged {
            request_id: record.id,
            phase: record.status.into(),
            progress: record.progress,
        });
    }

    fn count_outcome(&self, status: RequestStatus) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_pipeline_outcome(status.as_str());
        }
    }
}

/// SHA-256 of a fetched body, computed on the blocking pool.
async fn digest_off_thread(body: Bytes) -> Result<String, StageError> {
    tokio::task::spawn_blocking(move || ContentDigest::of(&body).to_string())
        .await
        .map_err(|err| StageError::Unexpected {
            detail: format!("content digest task failed: {err}"),
        })
}

fn mutator<F>(change: F) -> RecordMutator
where
    F: FnOnce(&mut FetchRequest) -> Result<(), TransitionError> + Send + 'static,
{
    Box::new(change)
}
