use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use hmac::{Hmac, Mac};
use proxyseed_api::{ApiServer, ApiState};
use proxyseed_config::{RateLimitSettings, RequestSettings, SecuritySettings};
use proxyseed_core::{FetchRequest, RequestStatus, RequestStore};
use proxyseed_events::EventBus;
use proxyseed_pipeline::{RequestService, SlidingWindowRateLimiter, TaskQueue};
use proxyseed_runtime::MemoryRequestStore;
use proxyseed_telemetry::Metrics;
use proxyseed_test_support::fixtures::{DataDir, queued_request};
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

const TOKEN: &str = "test-token-0123456789";
const SECRET: &str = "shared-secret";
const ANNOUNCE: &str = "https://tracker.test/announce";

struct TestApi {
    dir: DataDir,
    store: Arc<MemoryRequestStore>,
    queue: TaskQueue,
    router: Router,
}

fn limits(per_ip_minute: u32) -> RateLimitSettings {
    RateLimitSettings {
        enabled: true,
        requests_per_minute: 1_000,
        requests_per_hour: 10_000,
        requests_per_ip_minute: per_ip_minute,
        ..RateLimitSettings::default()
    }
}

fn security(auth_enabled: bool) -> SecuritySettings {
    SecuritySettings {
        auth_enabled,
        bearer_tokens: vec![TOKEN.to_string()],
        hmac_secret: SECRET.to_string(),
    }
}

fn test_api(auth_enabled: bool, rate_limit: RateLimitSettings, capacity: usize) -> Result<TestApi> {
    let dir = DataDir::new()?;
    let store = Arc::new(MemoryRequestStore::new());
    let queue = TaskQueue::new(capacity);
    let metrics = Metrics::new()?;
    let service = RequestService::new(
        store.clone(),
        Arc::new(SlidingWindowRateLimiter::new(rate_limit)),
        queue.clone(),
        EventBus::new(),
        RequestSettings::default(),
    )
    .with_metrics(metrics.clone());
    let state = ApiState::new(
        Arc::new(service),
        queue.clone(),
        security(auth_enabled),
        ANNOUNCE,
        dir.path(),
        metrics,
    );
    let router = ApiServer::new(state, "/v1").router();
    Ok(TestApi {
        dir,
        store,
        queue,
        router,
    })
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::from(serde_json::to_vec(body)?))?)
}

fn authed(method: Method, uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())?)
}

async fn send(router: &Router, request: Request<Body>) -> Result<Response> {
    Ok(router.clone().oneshot(request).await?)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn insert_ready(api: &TestApi) -> Result<FetchRequest> {
    let torrent_path = api.dir.torrents().join("abc.torrent");
    std::fs::create_dir_all(api.dir.torrents())?;
    std::fs::write(&torrent_path, b"d4:infod6:lengthi1eee")?;

    let mut record = queued_request("https://origin.test/ready");
    record.status = RequestStatus::Ready;
    record.progress = 100;
    record.content_hash = Some("c0ffee".to_string());
    record.content_size = Some(1);
    record.content_type = Some("text/html".to_string());
    record.package_id = Some("a".repeat(40));
    record.package_path = Some(torrent_path);
    api.store.create(record.clone()).await?;
    Ok(record)
}

#[tokio::test]
async fn create_request_returns_created_and_enqueues() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let response = send(
        &api.router,
        post_json("/v1/requests", &json!({"url": "https://origin.test/page"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await?;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["estimated_ready"], 60);
    assert_eq!(api.queue.len(), 1);

    let id = body["id"].as_str().unwrap_or_default().to_string();
    let status = send(&api.router, authed(Method::GET, &format!("/v1/requests/{id}"))?).await?;
    assert_eq!(status.status(), StatusCode::OK);
    let status = json_body(status).await?;
    assert_eq!(status["url"], "https://origin.test/page");
    assert_eq!(status["method"], "GET");
    assert_eq!(status["progress"], 0);
    Ok(())
}

#[tokio::test]
async fn missing_credentials_are_rejected() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/requests")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"url":"https://origin.test/page"}"#))?;
    let response = send(&api.router, request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).map(|v| v.as_bytes()),
        Some(&b"Bearer"[..])
    );
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"application/problem+json"[..])
    );
    let body = json_body(response).await?;
    assert_eq!(body["status"], 401);
    assert_eq!(api.queue.len(), 0);
    Ok(())
}

#[tokio::test]
async fn hmac_signed_bodies_are_accepted() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let payload = br#"{"url":"https://origin.test/signed"}"#;
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid hmac key"))?;
    mac.update(payload);
    let signature = hex::encode(mac.finalize().into_bytes());

    let signed = Request::builder()
        .method(Method::POST)
        .uri("/v1/requests")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-signature", signature)
        .body(Body::from(&payload[..]))?;
    let response = send(&api.router, signed).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let forged = Request::builder()
        .method(Method::POST)
        .uri("/v1/requests")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-signature", "00ff")
        .body(Body::from(&payload[..]))?;
    let response = send(&api.router, forged).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

fn signed_post(payload: &'static [u8], peer: SocketAddr, forwarded_for: &str) -> Result<Request<Body>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid hmac key"))?;
    mac.update(payload);
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/v1/requests")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-signature", hex::encode(mac.finalize().into_bytes()))
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(payload))?;
    request.extensions_mut().insert(ConnectInfo(peer));
    Ok(request)
}

#[tokio::test]
async fn signed_callers_cannot_rotate_identity_through_forwarded_for() -> Result<()> {
    let per_user = RateLimitSettings {
        requests_per_minute: 1,
        ..limits(100)
    };
    let api = test_api(true, per_user, 8)?;
    let peer: SocketAddr = "192.0.2.10:41000".parse()?;
    let payload: &'static [u8] = br#"{"url":"https://origin.test/signed"}"#;

    let first = send(&api.router, signed_post(payload, peer, "203.0.113.1")?).await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let second = send(&api.router, signed_post(payload, peer, "203.0.113.2")?).await?;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let queued = api.store.list_by_status(RequestStatus::Queued).await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].user_id.as_deref(), Some("hmac:192.0.2.10"));
    assert_eq!(queued[0].client_ip, "203.0.113.1");
    Ok(())
}

#[tokio::test]
async fn disabled_auth_admits_anonymous_callers() -> Result<()> {
    let api = test_api(false, limits(100), 8)?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/requests")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::from(r#"{"url":"https://origin.test/page"}"#))?;
    let response = send(&api.router, request).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    let id = body["id"].as_str().unwrap_or_default().parse()?;
    let stored = api.store.get(id).await?;
    assert_eq!(stored.map(|record| record.client_ip), Some("203.0.113.9".to_string()));
    Ok(())
}

#[tokio::test]
async fn invalid_scheme_is_a_validation_problem() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let response = send(
        &api.router,
        post_json("/v1/requests", &json!({"url": "ftp://origin.test/file"}))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await?;
    assert_eq!(body["invalid_params"][0]["pointer"], "/url");
    assert_eq!(api.queue.len(), 0);

    let malformed = send(&api.router, post_json("/v1/requests", &json!({"ttl": 5}))?).await?;
    assert_eq!(malformed.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn throttled_callers_receive_retry_after() -> Result<()> {
    let api = test_api(true, limits(1), 8)?;
    let payload = json!({"url": "https://origin.test/page"});
    let first = send(&api.router, post_json("/v1/requests", &payload)?).await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = send(&api.router, post_json("/v1/requests", &payload)?).await?;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = second
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::parse::<u64>)
        .transpose()?;
    assert!(retry_after.is_some_and(|secs| secs >= 1));
    assert_eq!(api.queue.len(), 1);
    Ok(())
}

#[tokio::test]
async fn full_queue_is_service_unavailable() -> Result<()> {
    let api = test_api(true, limits(100), 1)?;
    let payload = json!({"url": "https://origin.test/page"});
    let first = send(&api.router, post_json("/v1/requests", &payload)?).await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let second = send(&api.router, post_json("/v1/requests", &payload)?).await?;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let missing = uuid::Uuid::new_v4();
    let response = send(&api.router, authed(Method::GET, &format!("/v1/requests/{missing}"))?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await?;
    assert_eq!(body["detail"], format!("Request {missing} not found"));

    let response = send(&api.router, authed(Method::GET, "/v1/requests/not-a-uuid")?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn artifacts_require_a_ready_request() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let record = queued_request("https://origin.test/pending");
    api.store.create(record.clone()).await?;

    for suffix in ["torrent", "magnet"] {
        let uri = format!("/v1/requests/{}/{suffix}", record.id);
        let response = send(&api.router, authed(Method::GET, &uri)?).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await?;
        assert_eq!(body["detail"], "Request not ready (status: queued)");
    }
    Ok(())
}

#[tokio::test]
async fn ready_requests_serve_torrent_and_magnet() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let record = insert_ready(&api).await?;
    let infohash = "a".repeat(40);

    let response = send(
        &api.router,
        authed(Method::GET, &format!("/v1/requests/{}/torrent", record.id))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"application/x-bittorrent"[..])
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert_eq!(disposition, format!("attachment; filename=\"{infohash}.torrent\""));
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"d4:infod6:lengthi1eee");

    let response = send(
        &api.router,
        authed(Method::GET, &format!("/v1/requests/{}/magnet", record.id))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["infohash"], infohash);
    let magnet = body["magnet_link"].as_str().unwrap_or_default();
    assert!(magnet.starts_with(&format!("magnet:?xt=urn:btih:{infohash}")));
    assert!(magnet.contains("dn=c0ffee"));
    assert!(magnet.contains("tr=https%3A%2F%2Ftracker.test%2Fannounce"));
    Ok(())
}

#[tokio::test]
async fn delete_cancels_and_is_idempotent_on_terminal_records() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let record = queued_request("https://origin.test/cancel");
    api.store.create(record.clone()).await?;
    let uri = format!("/v1/requests/{}", record.id);

    let response = send(&api.router, authed(Method::DELETE, &uri)?).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let stored = api.store.get(record.id).await?;
    assert_eq!(stored.map(|record| record.status), Some(RequestStatus::Cancelled));

    let again = send(&api.router, authed(Method::DELETE, &uri)?).await?;
    assert_eq!(again.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn health_reports_checks_without_credentials() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let request = Request::builder().uri("/v1/health").body(Body::empty())?;
    let response = send(&api.router, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["storage"]["status"], "healthy");
    assert_eq!(body["checks"]["task_queue"]["capacity"], 8);
    assert_eq!(body["checks"]["rate_limiter"]["tracked_identities"], 0);
    assert!(body["uptime"].as_f64().is_some());
    Ok(())
}

#[tokio::test]
async fn full_queue_degrades_health() -> Result<()> {
    let api = test_api(true, limits(100), 1)?;
    api.queue.enqueue(uuid::Uuid::new_v4())?;
    let request = Request::builder().uri("/v1/health").body(Body::empty())?;
    let body = json_body(send(&api.router, request).await?).await?;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["task_queue"]["status"], "degraded");
    Ok(())
}

#[tokio::test]
async fn metrics_are_served_at_the_root() -> Result<()> {
    let api = test_api(true, limits(100), 8)?;
    let _created = send(
        &api.router,
        post_json("/v1/requests", &json!({"url": "https://origin.test/page"}))?,
    )
    .await?;

    let request = Request::builder().uri("/metrics").body(Body::empty())?;
    let response = send(&api.router, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let text = String::from_utf8(bytes.to_vec())?;
    assert!(text.contains("/v1/requests"));
    assert!(text.contains("http_request_duration_seconds"));
    Ok(())
}
