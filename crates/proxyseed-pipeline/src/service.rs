//! Caller-facing operations: submit, status, cancel, and startup recovery.

use std::sync::Arc;

use chrono::Utc;
use proxyseed_config::RequestSettings;
use proxyseed_core::{FetchRequest, FetchSpec, Identity, RequestStatus, RequestStore, StoreError};
use proxyseed_events::{Event, EventBus};
use proxyseed_telemetry::Metrics;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{QueueError, ServiceError, ServiceResult};
use crate::queue::TaskQueue;
use crate::rate_limit::SlidingWindowRateLimiter;

const QUEUE_FULL_MESSAGE: &str = "Unexpected error: task queue is full";
const INTERRUPTED_MESSAGE: &str = "Unexpected error: interrupted by restart";

/// What [`RequestService::recover`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Queued records pushed back onto the task queue.
    pub requeued: usize,
    /// Queued records left waiting because the queue was full.
    pub deferred: usize,
    /// Mid-stage records marked as failed.
    pub interrupted: usize,
}

/// Admission, lookup, and cancellation of fetch requests.
pub struct RequestService {
    store: Arc<dyn RequestStore>,
    limiter: Arc<SlidingWindowRateLimiter>,
    queue: TaskQueue,
    events: EventBus,
    settings: RequestSettings,
    metrics: Option<Metrics>,
}

impl RequestService {
    /// Service over the shared store, limiter, and queue.
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        limiter: Arc<SlidingWindowRateLimiter>,
        queue: TaskQueue,
        events: EventBus,
        settings: RequestSettings,
    ) -> Self {
        Self {
            store,
            limiter,
            queue,
            events,
            settings,
            metrics: None,
        }
    }

    /// Count submissions and throttles in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rate limiter guarding admission.
    #[must_use]
    pub fn limiter(&self) -> &SlidingWindowRateLimiter {
        &self.limiter
    }

    /// Submission limits.
    #[must_use]
    pub const fn settings(&self) -> &RequestSettings {
        &self.settings
    }

    /// Validate, admit, persist, and enqueue a new request.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] for a non-http(s) URL or an oversized TTL.
    /// - [`ServiceError::RateLimitExceeded`] when the identity is throttled.
    /// - [`ServiceError::QueueFull`] when the queue is at capacity; the record
    ///   is persisted as failed so it is never picked up later.
    /// - [`ServiceError::Store`] on persistence failure.
    pub async fn submit(&self, mut spec: FetchSpec, identity: Identity) -> ServiceResult<FetchRequest> {
        self.validate(&spec)?;
        spec.strip_sensitive_headers();

        if let Err(limited) = self.limiter.admit(&identity) {
            if let Some(metrics) = &self.metrics {
                metrics.inc_rate_limit_throttled();
            }
            return Err(limited.into());
        }

        let record = FetchRequest::queued(Uuid::new_v4(), spec, identity, Utc::now());
        let id = record.id;
        let url = record.spec.url.clone();
        self.store.create(record.clone()).await?;

        match self.queue.enqueue(id) {
            Ok(()) => {}
            Err(QueueError::Full { capacity }) => {
                self.reject_unqueued(id).await;
                return Err(ServiceError::QueueFull { capacity });
            }
            Err(QueueError::Closed) => {
                self.reject_unqueued(id).await;
                return Err(ServiceError::QueueFull {
                    capacity: self.queue.capacity(),
                });
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_submitted();
        }
        self.events.publish(Event::RequestQueued { request_id: id, url });
        info!(request_id = %id, "request queued");
        Ok(record)
    }

    /// Current record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for an unknown id.
    pub async fn get_status(&self, id: Uuid) -> ServiceResult<FetchRequest> {
        self.store
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound { id })
    }

    /// Cancel `id`. Cancelling a terminal request returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for an unknown id.
    pub async fn cancel(&self, id: Uuid) -> ServiceResult<FetchRequest> {
        match self
            .store
            .update(id, Box::new(|record| record.cancel(Utc::now())))
            .await
        {
            Ok(record) => {
                info!(request_id = %id, "request cancelled");
                self.events.publish(Event::Cancelled { request_id: id });
                if let Some(metrics) = &self.metrics {
                    metrics.inc_pipeline_outcome(RequestStatus::Cancelled.as_str());
                }
                Ok(record)
            }
            Err(StoreError::NotFound { .. }) => Err(ServiceError::NotFound { id }),
            Err(StoreError::Rejected { .. }) => self.get_status(id).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Re-enqueue persisted `Queued` records and fail records interrupted mid-stage.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] when records cannot be listed or updated.
    pub async fn recover(&self) -> ServiceResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for status in [
            RequestStatus::Fetching,
            RequestStatus::Packaging,
            RequestStatus::Seeding,
        ] {
            for record in self.store.list_by_status(status).await? {
                let outcome = self
                    .store
                    .update(
                        record.id,
                        Box::new(|record| record.fail(INTERRUPTED_MESSAGE, Utc::now())),
                    )
                    .await;
                match outcome {
                    Ok(_) => {
                        report.interrupted += 1;
                        self.events.publish(Event::Failed {
                            request_id: record.id,
                            message: INTERRUPTED_MESSAGE.to_string(),
                        });
                    }
                    Err(StoreError::Rejected { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        for record in self.store.list_by_status(RequestStatus::Queued).await? {
            match self.queue.enqueue(record.id) {
                Ok(()) => report.requeued += 1,
                Err(_) => report.deferred += 1,
            }
        }
        if report.deferred > 0 {
            warn!(deferred = report.deferred, "task queue full during recovery; records stay queued");
        }
        info!(
            requeued = report.requeued,
            interrupted = report.interrupted,
            "recovered persisted requests"
        );
        Ok(report)
    }

    fn validate(&self, spec: &FetchSpec) -> ServiceResult<()> {
        let parsed = Url::parse(&spec.url)
            .map_err(|_| ServiceError::validation("url", "must be an absolute URL", &spec.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServiceError::validation(
                "url",
                "scheme must be http or https",
                &spec.url,
            ));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(ServiceError::validation("url", "host is required", &spec.url));
        }
        if spec.ttl_secs > self.settings.max_ttl_secs {
            return Err(ServiceError::validation(
                "ttl",
                "exceeds the maximum TTL",
                &spec.ttl_secs.to_string(),
            ));
        }
        Ok(())
    }

    async fn reject_unqueued(&self, id: Uuid) {
        if let Err(err) = self
            .store
            .update(id, Box::new(|record| record.fail(QUEUE_FULL_MESSAGE, Utc::now())))
            .await
        {
            warn!(request_id = %id, error = %err, "could not mark unqueued request as failed");
        }
    }
}
