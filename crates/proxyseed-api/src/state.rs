//! Shared state handed to every handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use proxyseed_config::SecuritySettings;
use proxyseed_pipeline::{RequestService, TaskQueue};
use proxyseed_telemetry::Metrics;

/// Dependencies the HTTP layer needs from the running service.
pub struct ApiState {
    pub(crate) service: Arc<RequestService>,
    pub(crate) queue: TaskQueue,
    pub(crate) security: SecuritySettings,
    pub(crate) announce_url: String,
    pub(crate) data_dir: PathBuf,
    pub(crate) telemetry: Metrics,
    started: Instant,
}

impl ApiState {
    /// Bundle the service handles for the router.
    #[must_use]
    pub fn new(
        service: Arc<RequestService>,
        queue: TaskQueue,
        security: SecuritySettings,
        announce_url: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        telemetry: Metrics,
    ) -> Self {
        Self {
            service,
            queue,
            security,
            announce_url: announce_url.into(),
            data_dir: data_dir.into(),
            telemetry,
            started: Instant::now(),
        }
    }

    pub(crate) fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
