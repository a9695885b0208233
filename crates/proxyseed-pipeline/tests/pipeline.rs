use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proxyseed_config::{RateLimitSettings, RequestSettings};
use proxyseed_content::{ContentDigest, ContentStore};
use proxyseed_core::{FetchRequest, RequestStatus, RequestStore};
use proxyseed_events::{Event, EventBus};
use proxyseed_pipeline::{
    PipelineExecutor, RequestService, RunOutcome, ServiceError, SlidingWindowRateLimiter,
    TaskQueue, WorkerPool,
};
use proxyseed_runtime::MemoryRequestStore;
use proxyseed_test_support::fixtures::{DataDir, fetch_spec, identity, queued_request};
use proxyseed_test_support::mocks::{RecordingSeeder, StoringPackager, StubFailure, StubFetcher};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

const URL: &str = "https://origin.test/page";

struct Harness {
    _dir: DataDir,
    store: Arc<MemoryRequestStore>,
    fetcher: StubFetcher,
    packager: Arc<StoringPackager>,
    seeder: Arc<RecordingSeeder>,
    events: EventBus,
    queue: TaskQueue,
    executor: Arc<PipelineExecutor>,
    service: RequestService,
}

fn open_limits() -> RateLimitSettings {
    RateLimitSettings {
        enabled: true,
        requests_per_minute: 1_000,
        requests_per_hour: 10_000,
        requests_per_ip_minute: 1_000,
        ..RateLimitSettings::default()
    }
}

fn harness(fetcher: StubFetcher, limits: RateLimitSettings, capacity: usize) -> anyhow::Result<Harness> {
    let dir = DataDir::new()?;
    let store = Arc::new(MemoryRequestStore::new());
    let packager = Arc::new(StoringPackager::new(
        ContentStore::open(dir.content())?,
        dir.torrents(),
    )?);
    let seeder = Arc::new(RecordingSeeder::new());
    let events = EventBus::new();
    let queue = TaskQueue::new(capacity);
    let executor = Arc::new(PipelineExecutor::new(
        store.clone(),
        Arc::new(fetcher.clone()),
        packager.clone(),
        seeder.clone(),
        events.clone(),
    ));
    let service = RequestService::new(
        store.clone(),
        Arc::new(SlidingWindowRateLimiter::new(limits)),
        queue.clone(),
        events.clone(),
        RequestSettings::default(),
    );
    Ok(Harness {
        _dir: dir,
        store,
        fetcher,
        packager,
        seeder,
        events,
        queue,
        executor,
        service,
    })
}

fn serving(url: &str, body: &'static str) -> StubFetcher {
    let fetcher = StubFetcher::new();
    fetcher.respond(url, body, "text/html");
    fetcher
}

async fn wait_for_terminal(store: &MemoryRequestStore, id: Uuid) -> anyhow::Result<FetchRequest> {
    timeout(Duration::from_secs(5), async {
        loop {
            match store.get(id).await {
                Ok(Some(record)) if record.is_terminal() => return Ok::<_, anyhow::Error>(record),
                Ok(_) => sleep(Duration::from_millis(10)).await,
                Err(err) => return Err(err.into()),
            }
        }
    })
    .await?
}

#[tokio::test]
async fn third_rapid_submission_is_rate_limited() -> anyhow::Result<()> {
    let limits = RateLimitSettings {
        requests_per_minute: 2,
        ..open_limits()
    };
    let h = harness(serving(URL, "hello"), limits, 16)?;
    let who = identity("u1", "10.0.0.1");

    let first = h.service.submit(fetch_spec(URL), who.clone()).await?;
    let second = h.service.submit(fetch_spec(URL), who.clone()).await?;
    let third = h.service.submit(fetch_spec(URL), who).await;

    assert_eq!(first.status, RequestStatus::Queued);
    assert_eq!(second.status, RequestStatus::Queued);
    assert!(matches!(
        third,
        Err(ServiceError::RateLimitExceeded {
            retry_after_secs: 60
        })
    ));
    assert_eq!(h.queue.len(), 2);
    Ok(())
}

#[tokio::test]
async fn identical_content_is_stored_once() -> anyhow::Result<()> {
    let h = harness(serving(URL, "same bytes"), open_limits(), 16)?;
    let first = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    let second = h.service.submit(fetch_spec(URL), identity("b", "10.0.0.2")).await?;

    let RunOutcome::Ready(first) = h.executor.process(first.id).await else {
        anyhow::bail!("first request did not become ready");
    };
    let RunOutcome::Ready(second) = h.executor.process(second.id).await else {
        anyhow::bail!("second request did not become ready");
    };

    assert!(first.content_hash.is_some());
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.package_id, second.package_id);
    assert_eq!(h.packager.store().writes_total(), 1);
    assert_eq!(h.packager.store().stats()?.objects, 1);
    Ok(())
}

#[tokio::test]
async fn ready_records_carry_every_artifact() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    h.executor.process(submitted.id).await;

    let record = h.service.get_status(submitted.id).await?;
    assert_eq!(record.status, RequestStatus::Ready);
    assert_eq!(record.progress, 100);
    assert_eq!(record.content_size, Some(7));
    let expected_hash = ContentDigest::of(b"payload").to_string();
    assert_eq!(record.content_hash.as_deref(), Some(expected_hash.as_str()));
    assert_eq!(record.content_type.as_deref(), Some("text/html"));
    assert!(record.package_path.is_some());
    assert!(record.completed_at.is_some());
    assert!(record.error_message.is_none());
    assert!(h.seeder.contains(record.package_id.as_deref().unwrap_or_default()));
    Ok(())
}

#[tokio::test]
async fn progress_events_never_decrease() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    let mut stream = h.events.subscribe(None);
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    h.executor.process(submitted.id).await;

    let mut progress = Vec::new();
    loop {
        let envelope = timeout(Duration::from_secs(1), stream.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("event bus closed"))?;
        match envelope.event {
            Event::StatusChanged { progress: value, .. } => progress.push(value),
            Event::Completed { .. } => break,
            _ => {}
        }
    }
    assert_eq!(progress, vec![10, 50, 80, 100]);
    Ok(())
}

#[tokio::test]
async fn cancelled_before_processing_has_no_side_effects() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;

    let cancelled = h.service.cancel(submitted.id).await?;
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(h.executor.process(submitted.id).await, RunOutcome::Skipped);

    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.packager.calls(), 0);
    assert_eq!(h.seeder.adds(), 0);
    assert_eq!(h.service.get_status(submitted.id).await?.status, RequestStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn cancellation_during_fetch_stops_at_the_next_boundary() -> anyhow::Result<()> {
    let (fetcher, gate) = serving(URL, "payload").gated();
    let h = harness(fetcher, open_limits(), 16)?;
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;

    let executor = h.executor.clone();
    let run = tokio::spawn(async move { executor.process(submitted.id).await });
    gate.entered().await;
    h.service.cancel(submitted.id).await?;
    gate.release(1);

    assert_eq!(run.await?, RunOutcome::Halted);
    let record = h.service.get_status(submitted.id).await?;
    assert_eq!(record.status, RequestStatus::Cancelled);
    assert!(record.content_hash.is_none());
    assert_eq!(h.packager.calls(), 0);
    assert_eq!(h.seeder.adds(), 0);
    Ok(())
}

#[tokio::test]
async fn cancelling_a_terminal_request_returns_it_unchanged() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    h.executor.process(submitted.id).await;

    let record = h.service.cancel(submitted.id).await?;
    assert_eq!(record.status, RequestStatus::Ready);
    assert!(matches!(
        h.service.cancel(Uuid::new_v4()).await,
        Err(ServiceError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn stage_failures_are_recorded_with_prefixes() -> anyhow::Result<()> {
    let fetcher = StubFetcher::new();
    fetcher.fail("https://origin.test/slow", StubFailure::Timeout);
    fetcher.fail("https://origin.test/zip", StubFailure::MimeRejected);
    fetcher.respond(URL, "payload", "text/html");
    let h = harness(fetcher, open_limits(), 16)?;

    let slow = h
        .service
        .submit(fetch_spec("https://origin.test/slow"), identity("a", "10.0.0.1"))
        .await?;
    let RunOutcome::Failed(slow) = h.executor.process(slow.id).await else {
        anyhow::bail!("timeout should fail the request");
    };
    assert!(slow.error_message.as_deref().is_some_and(|m| m.starts_with("Timeout: ")));
    assert_eq!(slow.progress, 10);
    assert!(slow.content_hash.is_none());

    let zip = h
        .service
        .submit(fetch_spec("https://origin.test/zip"), identity("a", "10.0.0.1"))
        .await?;
    h.executor.process(zip.id).await;
    let zip = h.service.get_status(zip.id).await?;
    assert!(zip.error_message.as_deref().is_some_and(|m| m.starts_with("Fetch error: ")));

    h.packager.fail_all();
    let packaged = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    h.executor.process(packaged.id).await;
    let packaged = h.service.get_status(packaged.id).await?;
    assert_eq!(packaged.status, RequestStatus::Error);
    assert!(
        packaged
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Packaging error: "))
    );
    assert!(packaged.content_hash.is_some());
    assert_eq!(packaged.progress, 50);
    Ok(())
}

#[tokio::test]
async fn seeder_failures_keep_package_fields() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    h.seeder.fail_all();
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    h.executor.process(submitted.id).await;

    let record = h.service.get_status(submitted.id).await?;
    assert_eq!(record.status, RequestStatus::Error);
    assert!(record.error_message.as_deref().is_some_and(|m| m.starts_with("Seeding error: ")));
    assert!(record.package_id.is_some());
    assert_eq!(record.progress, 80);
    Ok(())
}

#[tokio::test]
async fn worker_pool_drains_the_queue() -> anyhow::Result<()> {
    let fetcher = StubFetcher::new();
    for index in 0..3 {
        fetcher.respond(&format!("https://origin.test/{index}"), format!("body {index}"), "text/plain");
    }
    let h = harness(fetcher, open_limits(), 16)?;
    let pool = WorkerPool::new(h.queue.clone(), h.executor.clone(), Duration::from_millis(20));
    pool.start(2);

    let mut ids = Vec::new();
    for index in 0..3 {
        let record = h
            .service
            .submit(
                fetch_spec(&format!("https://origin.test/{index}")),
                identity("a", "10.0.0.1"),
            )
            .await?;
        ids.push(record.id);
    }
    for id in ids {
        let record = wait_for_terminal(&h.store, id).await?;
        assert_eq!(record.status, RequestStatus::Ready);
    }
    pool.stop().await;
    assert_eq!(pool.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn panicking_runs_are_contained() -> anyhow::Result<()> {
    let fetcher = serving(URL, "payload");
    fetcher.panic_on("https://origin.test/explode");
    let h = harness(fetcher, open_limits(), 16)?;
    let pool = WorkerPool::new(h.queue.clone(), h.executor.clone(), Duration::from_millis(20));
    pool.start(1);

    let boom = h
        .service
        .submit(fetch_spec("https://origin.test/explode"), identity("a", "10.0.0.1"))
        .await?;
    let fine = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;

    let boom = wait_for_terminal(&h.store, boom.id).await?;
    assert_eq!(boom.status, RequestStatus::Error);
    assert!(boom.error_message.as_deref().is_some_and(|m| m.starts_with("Unexpected error: ")));
    assert_eq!(wait_for_terminal(&h.store, fine.id).await?.status, RequestStatus::Ready);
    pool.stop().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_are_processed_once() -> anyhow::Result<()> {
    let fetcher = serving(URL, "payload").with_delay(Duration::from_millis(50));
    let h = harness(fetcher, open_limits(), 16)?;
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    h.queue.enqueue(submitted.id)?;
    h.queue.enqueue(submitted.id)?;

    let pool = WorkerPool::new(h.queue.clone(), h.executor.clone(), Duration::from_millis(10));
    pool.start(3);
    let record = wait_for_terminal(&h.store, submitted.id).await?;
    pool.stop().await;

    assert_eq!(record.status, RequestStatus::Ready);
    assert_eq!(h.fetcher.calls_for(URL), 1);
    Ok(())
}

#[tokio::test]
async fn stop_waits_for_the_in_flight_run() -> anyhow::Result<()> {
    let (fetcher, gate) = serving(URL, "payload").gated();
    let h = harness(fetcher, open_limits(), 16)?;
    let pool = Arc::new(WorkerPool::new(
        h.queue.clone(),
        h.executor.clone(),
        Duration::from_millis(10),
    ));
    pool.start(1);
    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    gate.entered().await;

    let stopping = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.stop().await })
    };
    sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());
    assert_eq!(pool.in_flight(), 1);

    gate.release(1);
    timeout(Duration::from_secs(5), stopping).await??;
    let record = h.service.get_status(submitted.id).await?;
    assert_eq!(record.status, RequestStatus::Ready);
    assert_eq!(record.progress, 100);
    assert_eq!(pool.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn stop_leaves_undequeued_work_queued() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    let pool = WorkerPool::new(h.queue.clone(), h.executor.clone(), Duration::from_millis(10));
    pool.start(1);
    pool.stop().await;

    let submitted = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.service.get_status(submitted.id).await?.status, RequestStatus::Queued);
    assert_eq!(h.queue.len(), 1);
    Ok(())
}

#[tokio::test]
async fn full_queue_rejects_and_fails_the_record() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 1)?;
    h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await?;
    let rejected = h.service.submit(fetch_spec(URL), identity("a", "10.0.0.1")).await;
    assert!(matches!(rejected, Err(ServiceError::QueueFull { capacity: 1 })));

    let failed = h.store.list_by_status(RequestStatus::Error).await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(h.store.list_by_status(RequestStatus::Queued).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn submissions_are_validated_and_sanitised() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;

    let ftp = h
        .service
        .submit(fetch_spec("ftp://origin.test/file"), identity("a", "10.0.0.1"))
        .await;
    assert!(matches!(ftp, Err(ServiceError::Validation { field: "url", .. })));

    let mut long_lived = fetch_spec(URL);
    long_lived.ttl_secs = 86_401;
    let ttl = h.service.submit(long_lived, identity("a", "10.0.0.1")).await;
    assert!(matches!(ttl, Err(ServiceError::Validation { field: "ttl", .. })));

    let mut with_headers = fetch_spec(URL);
    with_headers.headers.insert("Cookie".to_string(), "session=1".to_string());
    with_headers.headers.insert("Accept".to_string(), "text/html".to_string());
    let record = h.service.submit(with_headers, identity("a", "10.0.0.1")).await?;
    assert_eq!(record.spec.headers.len(), 1);
    assert!(record.spec.headers.contains_key("Accept"));
    assert_eq!(h.queue.len(), 1);
    Ok(())
}

#[tokio::test]
async fn recovery_requeues_waiting_and_fails_interrupted_records() -> anyhow::Result<()> {
    let h = harness(serving(URL, "payload"), open_limits(), 16)?;
    let waiting = queued_request(URL);
    let interrupted = queued_request(URL);
    h.store.create(waiting.clone()).await?;
    h.store.create(interrupted.clone()).await?;
    h.store
        .update(
            interrupted.id,
            Box::new(|record| record.advance(RequestStatus::Fetching, Utc::now())),
        )
        .await?;

    let report = h.service.recover().await?;
    assert_eq!(report.requeued, 1);
    assert_eq!(report.interrupted, 1);
    assert_eq!(h.queue.len(), 1);

    let failed = h.service.get_status(interrupted.id).await?;
    assert_eq!(failed.status, RequestStatus::Error);
    assert!(failed.error_message.as_deref().is_some_and(|m| m.starts_with("Unexpected error: ")));
    Ok(())
}
