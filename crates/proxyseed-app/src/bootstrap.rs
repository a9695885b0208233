//! Service wiring and lifecycle.
//!
//! # Design
//! - Startup order: storage directories, stores and collaborators, seeder
//!   restore, record recovery, worker pool, API listener.
//! - Shutdown order: API listener, worker pool (in-flight runs finish), seeder
//!   resume flush.
//! - Background tasks (event log, idle-identity sweep) are aborted once the
//!   listener returns.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use proxyseed_api::{ApiServer, ApiState};
use proxyseed_config::{ServerSettings, ServiceConfig, ServiceConfigLoader};
use proxyseed_content::ContentStore;
use proxyseed_core::RequestStore;
use proxyseed_events::{Event, EventBus, EventEnvelope};
use proxyseed_pipeline::{
    PipelineExecutor, RequestService, SlidingWindowRateLimiter, TaskQueue, WorkerPool,
};
use proxyseed_runtime::FileRequestStore;
use proxyseed_telemetry::{LogFormat, LoggingConfig, Metrics};
use proxyseed_torrent::{HttpFetcher, RegistrySeeder, TorrentPackager};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Long-lived handles assembled at startup.
pub(crate) struct Services {
    config: ServiceConfig,
    telemetry: Metrics,
    events: EventBus,
    queue: TaskQueue,
    service: Arc<RequestService>,
    pool: WorkerPool,
    seeder: Arc<RegistrySeeder>,
}

/// Entry point for the `ProxySeed` boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, dependency construction, or the
/// API listener fails.
pub async fn run_app() -> AppResult<()> {
    let config = ServiceConfigLoader::from_env()
        .load()
        .map_err(|err| AppError::config("config.load", err))?;
    let format = log_format(config.logging.format.as_deref())?;
    proxyseed_telemetry::init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        ..LoggingConfig::default()
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    info!("ProxySeed bootstrap starting");
    let telemetry = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let services = build_services(config, telemetry).await?;
    run_services(services, shutdown_signal()).await
}

fn log_format(label: Option<&str>) -> AppResult<LogFormat> {
    label.map_or(Ok(LogFormat::infer()), |value| {
        value.parse().map_err(|_| AppError::InvalidConfig {
            field: "log_format",
            reason: "unknown_format",
            value: Some(value.to_string()),
        })
    })
}

/// Build stores, collaborators, and the request service from `config`.
pub(crate) async fn build_services(config: ServiceConfig, telemetry: Metrics) -> AppResult<Services> {
    let storage = &config.storage;
    for dir in [
        storage.content_dir(),
        storage.torrents_dir(),
        storage.resume_dir(),
        storage.requests_dir(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| AppError::io("storage.create_dir", Some(dir.clone()), err))?;
    }

    let store: Arc<dyn RequestStore> = Arc::new(
        FileRequestStore::open(storage.requests_dir())
            .await
            .map_err(|err| AppError::store("request_store.open", err))?,
    );
    let content = ContentStore::open(storage.content_dir())
        .map_err(|err| AppError::content("content_store.open", err))?
        .with_metrics(telemetry.clone());
    let packager = Arc::new(
        TorrentPackager::new(content, storage.torrents_dir(), config.torrent.clone())
            .map_err(|err| AppError::packager("packager.new", err))?,
    );
    let fetcher = Arc::new(
        HttpFetcher::new(config.fetcher.clone())
            .map_err(|err| AppError::fetcher("fetcher.new", err))?,
    );
    let seeder = Arc::new(
        RegistrySeeder::new(storage.resume_dir())
            .map_err(|err| AppError::seeder("seeder.new", err))?,
    );
    let restored = seeder
        .restore()
        .await
        .map_err(|err| AppError::seeder("seeder.restore", err))?;
    info!(restored, "seeder registry restored");

    let events = EventBus::new();
    let queue = TaskQueue::with_metrics(config.queue.capacity, telemetry.clone());
    let executor = Arc::new(
        PipelineExecutor::new(
            Arc::clone(&store),
            fetcher,
            packager,
            seeder.clone(),
            events.clone(),
        )
        .with_metrics(telemetry.clone()),
    );
    let pool = WorkerPool::new(queue.clone(), executor, config.queue.poll_interval())
        .with_metrics(telemetry.clone());
    let limiter = Arc::new(SlidingWindowRateLimiter::new(config.rate_limit.clone()));
    let service = Arc::new(
        RequestService::new(
            store,
            limiter,
            queue.clone(),
            events.clone(),
            config.requests.clone(),
        )
        .with_metrics(telemetry.clone()),
    );

    Ok(Services {
        config,
        telemetry,
        events,
        queue,
        service,
        pool,
        seeder,
    })
}

/// Recover persisted work, start the workers, and serve until `shutdown` resolves.
pub(crate) async fn run_services<F>(services: Services, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let Services {
        config,
        telemetry,
        events,
        queue,
        service,
        pool,
        seeder,
    } = services;

    let addr = bind_address(&config.server)?;
    let event_log = spawn_event_logger(&events);
    let report = match service.recover().await {
        Ok(report) => report,
        Err(err) => {
            event_log.abort();
            return Err(AppError::service("request_service.recover", err));
        }
    };
    info!(
        requeued = report.requeued,
        deferred = report.deferred,
        interrupted = report.interrupted,
        "persisted requests recovered"
    );
    pool.start(config.queue.workers);
    let sweeper = spawn_rate_limit_sweeper(Arc::clone(&service), config.rate_limit.sweep_interval());

    let state = ApiState::new(
        service,
        queue,
        config.security.clone(),
        config.torrent.announce_url.clone(),
        config.storage.root(),
        telemetry,
    );
    let api = ApiServer::new(state, &config.server.api_prefix);
    info!(addr = %addr, "launching API listener");
    let serve_result = api.serve(addr, shutdown).await;

    sweeper.abort();
    pool.stop().await;
    let flushed = seeder.shutdown().await;
    event_log.abort();

    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    flushed.map_err(|err| AppError::seeder("seeder.shutdown", err))?;
    info!("ProxySeed shutdown complete");
    Ok(())
}

fn bind_address(server: &ServerSettings) -> AppResult<SocketAddr> {
    let ip: IpAddr = server.host.parse().map_err(|_| AppError::InvalidConfig {
        field: "host",
        reason: "not_an_ip_address",
        value: Some(server.host.clone()),
    })?;
    Ok(SocketAddr::new(ip, server.port))
}

fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            log_event(&envelope);
        }
    })
}

fn log_event(envelope: &EventEnvelope) {
    let event = &envelope.event;
    let request_id = event.request_id();
    match event {
        Event::Failed { message, .. } => warn!(
            event_id = envelope.id,
            kind = event.kind(),
            request_id = %request_id,
            message = %message,
            "pipeline event"
        ),
        Event::Completed { package_id, .. } => info!(
            event_id = envelope.id,
            kind = event.kind(),
            request_id = %request_id,
            package_id = %package_id,
            "pipeline event"
        ),
        _ => debug!(
            event_id = envelope.id,
            kind = event.kind(),
            request_id = %request_id,
            "pipeline event"
        ),
    }
}

fn spawn_rate_limit_sweeper(service: Arc<RequestService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = service.limiter().sweep_idle();
            if removed > 0 {
                debug!(removed, "idle rate-limit identities swept");
            }
        }
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
