//! Router construction and server host for the API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    http::{
        HeaderName, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post},
};
use proxyseed_telemetry::build_sha;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::http::auth::require_identity;
use crate::http::constants::{HEADER_REQUEST_ID, HEADER_SIGNATURE};
use crate::http::health::{health, metrics};
use crate::http::requests::{
    cancel_request, create_request, get_magnet, get_request, get_torrent,
};
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;

/// Axum router wrapper that hosts the `ProxySeed` HTTP API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router with every route mounted beneath `api_prefix`.
    ///
    /// `/metrics` stays at the root so scrapers need no prefix knowledge.
    #[must_use]
    pub fn new(state: ApiState, api_prefix: &str) -> Self {
        let telemetry = state.telemetry.clone();
        let state = Arc::new(state);
        let prefix = api_prefix.trim_end_matches('/');

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                CONTENT_TYPE,
                AUTHORIZATION,
                HeaderName::from_static(HEADER_SIGNATURE),
                HeaderName::from_static(HEADER_REQUEST_ID),
            ]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(proxyseed_telemetry::set_request_id_layer())
            .layer(proxyseed_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(telemetry));

        let protected = Router::new()
            .route(&format!("{prefix}/requests"), post(create_request))
            .route(
                &format!("{prefix}/requests/{{id}}"),
                get(get_request).delete(cancel_request),
            )
            .route(&format!("{prefix}/requests/{{id}}/torrent"), get(get_torrent))
            .route(&format!("{prefix}/requests/{{id}}/magnet"), get(get_magnet))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                require_identity,
            ));

        let router = Router::new()
            .route("/metrics", get(metrics))
            .route(&format!("{prefix}/health"), get(health))
            .merge(protected)
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    /// Clone of the assembled router, for in-process callers.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve the API on `addr` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server terminates unexpectedly.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting API on {}", addr);
        let listener = TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        Ok(())
    }
}
