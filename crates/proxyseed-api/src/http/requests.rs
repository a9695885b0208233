//! Fetch request handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use proxyseed_api_models::{
    CreateRequestPayload, CreateRequestResponse, MagnetLinkResponse, RequestStatusResponse,
};
use proxyseed_core::{FetchRequest, Identity, RequestStatus};
use proxyseed_torrent::magnet_link;
use tracing::{error, info};
use uuid::Uuid;

use crate::http::constants::TORRENT_MEDIA_TYPE;
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn create_request(
    State(state): State<Arc<ApiState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<CreateRequestPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateRequestResponse>), ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let spec = payload.into_spec(state.service.settings().default_ttl_secs);
    let record = state.service.submit(spec, identity).await?;
    info!(request_id = %record.id, url = %record.spec.url, "request accepted");
    Ok((
        StatusCode::CREATED,
        Json(CreateRequestResponse::from(&record)),
    ))
}

pub(crate) async fn get_request(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<RequestStatusResponse>, ApiError> {
    let record = load(&state, &id).await?;
    Ok(Json(RequestStatusResponse::from(&record)))
}

pub(crate) async fn get_torrent(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = ready(&state, &id).await?;
    let (Some(path), Some(infohash)) = (&record.package_path, &record.package_id) else {
        return Err(ApiError::internal("Torrent file path not set"));
    };
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        error!(request_id = %record.id, path = %path.display(), error = %err, "failed to read torrent file");
        ApiError::internal("Torrent file not found")
    })?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{infohash}.torrent\""))
        .map_err(|_| ApiError::internal("invalid torrent file name"))?;

    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TORRENT_MEDIA_TYPE));
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok(response)
}

pub(crate) async fn get_magnet(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<MagnetLinkResponse>, ApiError> {
    let record = ready(&state, &id).await?;
    let Some(infohash) = record.package_id.clone() else {
        return Err(ApiError::internal("Infohash not set"));
    };
    let name = record.content_hash.as_deref().unwrap_or(&infohash);
    Ok(Json(MagnetLinkResponse {
        id: record.id,
        magnet_link: magnet_link(&infohash, name, &state.announce_url),
        infohash,
    }))
}

pub(crate) async fn cancel_request(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let record = state.service.cancel(id).await?;
    info!(request_id = %id, status = %record.status, "cancel requested");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(format!("Request {raw} not found")))
}

async fn load(state: &ApiState, raw: &str) -> Result<FetchRequest, ApiError> {
    let id = parse_id(raw)?;
    Ok(state.service.get_status(id).await?)
}

async fn ready(state: &ApiState, raw: &str) -> Result<FetchRequest, ApiError> {
    let record = load(state, raw).await?;
    if record.status == RequestStatus::Ready {
        Ok(record)
    } else {
        Err(ApiError::bad_request(format!(
            "Request not ready (status: {})",
            record.status
        )))
    }
}
