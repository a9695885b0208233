//! Health and metrics endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use proxyseed_api_models::{HealthCheck, HealthResponse};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::http::constants::METRICS_MEDIA_TYPE;
use crate::http::errors::ApiError;
use crate::state::ApiState;

const HEALTHY: &str = "healthy";
const DEGRADED: &str = "degraded";
const UNHEALTHY: &str = "unhealthy";

pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let mut checks = BTreeMap::new();

    let storage = match tokio::fs::metadata(&state.data_dir).await {
        Ok(meta) if meta.is_dir() => check(HEALTHY, []),
        Ok(_) => check(UNHEALTHY, [("error", json!("data path is not a directory"))]),
        Err(err) => {
            warn!(path = %state.data_dir.display(), error = %err, "storage health check failed");
            check(UNHEALTHY, [("error", json!(err.to_string()))])
        }
    };
    checks.insert("storage".to_string(), storage);

    let queue_size = state.queue.len();
    let queue_status = if queue_size >= state.queue.capacity() {
        DEGRADED
    } else {
        HEALTHY
    };
    checks.insert(
        "task_queue".to_string(),
        check(
            queue_status,
            [
                ("queue_size", json!(queue_size)),
                ("capacity", json!(state.queue.capacity())),
            ],
        ),
    );

    checks.insert(
        "rate_limiter".to_string(),
        check(
            HEALTHY,
            [(
                "tracked_identities",
                json!(state.service.limiter().tracked_identities()),
            )],
        ),
    );

    let status = if checks.values().all(|check| check.status == HEALTHY) {
        HEALTHY
    } else {
        DEGRADED
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.uptime_secs(),
        checks,
    })
}

pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let body = state.telemetry.render().map_err(|err| {
        error!(error = %err, "failed to render metrics");
        ApiError::internal("failed to render metrics")
    })?;
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(METRICS_MEDIA_TYPE));
    Ok(response)
}

fn check<const N: usize>(status: &str, details: [(&str, Value); N]) -> HealthCheck {
    HealthCheck {
        status: status.to_string(),
        details: details
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    }
}
