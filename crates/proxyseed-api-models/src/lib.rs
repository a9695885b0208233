#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
//! Shared HTTP DTOs for the `ProxySeed` public API.
//!
//! These types are re-used by the CLI for request/response encoding to keep the
//! contract deterministic. Conversions from domain records live here so the
//! mapping stays in one place.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use proxyseed_core::{FetchRequest, FetchSpec, HttpMethod, RequestStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Estimated seconds until a new request is ready, reported on creation.
pub const ESTIMATED_READY_SECS: u32 = 60;

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    /// URI reference identifying the problem type.
    pub kind: String,
    /// Short, human-readable summary of the issue.
    pub title: String,
    /// HTTP status code associated with the error.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Detailed diagnostic message when available.
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Parameters that failed validation, if applicable.
    pub invalid_params: Option<Vec<ProblemInvalidParam>>,
}

/// Invalid parameter pointer surfaced alongside a [`ProblemDetails`] payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemInvalidParam {
    /// JSON Pointer to the offending field.
    pub pointer: String,
    /// Human-readable description of the validation failure.
    pub message: String,
}

/// Body of `POST /requests`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRequestPayload {
    /// Absolute http(s) URL to fetch.
    pub url: String,
    /// Upstream verb.
    #[serde(default)]
    pub method: HttpMethod,
    /// Extra upstream headers; sensitive names are dropped server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Upstream request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Cache lifetime in seconds; the server default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

impl CreateRequestPayload {
    /// Convert into a fetch spec, using `default_ttl_secs` when no TTL was given.
    #[must_use]
    pub fn into_spec(self, default_ttl_secs: u32) -> FetchSpec {
        FetchSpec {
            url: self.url,
            method: self.method,
            headers: self.headers.unwrap_or_default(),
            body: self.body,
            ttl_secs: self.ttl.unwrap_or(default_ttl_secs),
        }
    }
}

/// Response of `POST /requests`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRequestResponse {
    /// Request identifier.
    pub id: Uuid,
    /// Status at creation.
    pub status: RequestStatus,
    /// Rough seconds until ready.
    pub estimated_ready: Option<u32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&FetchRequest> for CreateRequestResponse {
    fn from(record: &FetchRequest) -> Self {
        Self {
            id: record.id,
            status: record.status,
            estimated_ready: Some(ESTIMATED_READY_SECS),
            created_at: record.created_at,
        }
    }
}

/// Response of `GET /requests/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestStatusResponse {
    /// Request identifier.
    pub id: Uuid,
    /// Current status.
    pub status: RequestStatus,
    /// Requested URL.
    pub url: String,
    /// Upstream verb.
    pub method: HttpMethod,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// When the request reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Torrent infohash once packaged.
    pub infohash: Option<String>,
    /// SHA-256 of the content.
    pub content_hash: Option<String>,
    /// Content size in bytes.
    pub content_size: Option<u64>,
    /// Upstream content type.
    pub content_type: Option<String>,
    /// Failure description.
    pub error_message: Option<String>,
    /// Percent complete.
    pub progress: u8,
}

impl From<&FetchRequest> for RequestStatusResponse {
    fn from(record: &FetchRequest) -> Self {
        Self {
            id: record.id,
            status: record.status,
            url: record.spec.url.clone(),
            method: record.spec.method,
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
            infohash: record.package_id.clone(),
            content_hash: record.content_hash.clone(),
            content_size: record.content_size,
            content_type: record.content_type.clone(),
            error_message: record.error_message.clone(),
            progress: record.progress,
        }
    }
}

/// Response of `GET /requests/{id}/magnet`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MagnetLinkResponse {
    /// Request identifier.
    pub id: Uuid,
    /// `magnet:` URI.
    pub magnet_link: String,
    /// Torrent infohash.
    pub infohash: String,
}

/// One component in [`HealthResponse::checks`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    /// `healthy`, `degraded`, or `unhealthy`.
    pub status: String,
    /// Component-specific details.
    #[serde(flatten)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    /// `healthy` when every check is healthy, `degraded` otherwise.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Seconds since start.
    pub uptime: f64,
    /// Per-component results.
    pub checks: BTreeMap<String, HealthCheck>,
}
