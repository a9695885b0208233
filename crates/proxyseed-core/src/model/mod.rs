//! Request records and collaborator DTOs.
//!
//! # Design
//! - `FetchRequest` owns its state-machine operations so every mutation goes
//!   through the transition table and the progress rules.
//! - Set-once fields (`content_*`, `package_*`) reject a second write.
//! - Collaborator DTOs carry only what the pipeline persists or forwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransitionError;
use crate::state::{RequestStatus, progress};

/// Header names never forwarded upstream.
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-signature"];

/// HTTP verbs accepted for upstream fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
}

impl HttpMethod {
    /// Uppercase verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            other => Err(format!("unsupported method '{other}'")),
        }
    }
}

/// What to fetch. Immutable once a request is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
    /// Absolute http(s) URL.
    pub url: String,
    /// Verb used upstream.
    #[serde(default)]
    pub method: HttpMethod,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Optional request body.
    #[serde(default)]
    pub body: Option<String>,
    /// Cache lifetime in seconds.
    pub ttl_secs: u32,
}

impl FetchSpec {
    /// `GET` spec for `url` with the given TTL.
    #[must_use]
    pub fn get(url: impl Into<String>, ttl_secs: u32) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            ttl_secs,
        }
    }

    /// Remove headers listed in [`SENSITIVE_HEADERS`], comparing case-insensitively.
    pub fn strip_sensitive_headers(&mut self) {
        self.headers.retain(|name, _| {
            !SENSITIVE_HEADERS
                .iter()
                .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
        });
    }
}

/// Admission identity of a submitter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Authenticated principal, when known.
    pub user_id: Option<String>,
    /// Client address as seen by the API layer.
    pub client_ip: String,
}

impl Identity {
    /// Identity with a principal.
    #[must_use]
    pub fn user(user_id: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            client_ip: client_ip.into(),
        }
    }

    /// Identity known only by address.
    #[must_use]
    pub fn anonymous(client_ip: impl Into<String>) -> Self {
        Self {
            user_id: None,
            client_ip: client_ip.into(),
        }
    }
}

/// Content fields recorded when the fetch stage completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSummary {
    /// Hex digest of the content bytes.
    pub hash: String,
    /// Byte length.
    pub size: u64,
    /// Upstream content type.
    pub content_type: String,
}

/// Package fields recorded when the packaging stage completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    /// Package identifier (infohash).
    pub package_id: String,
    /// Path of the package file.
    pub package_path: PathBuf,
}

/// Persisted request record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Unique identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: RequestStatus,
    /// Fetch specification.
    #[serde(flatten)]
    pub spec: FetchSpec,
    /// Digest of the fetched bytes.
    pub content_hash: Option<String>,
    /// Size of the fetched bytes.
    pub content_size: Option<u64>,
    /// Upstream content type.
    pub content_type: Option<String>,
    /// Package identifier (infohash).
    pub package_id: Option<String>,
    /// Path of the generated package file.
    pub package_path: Option<PathBuf>,
    /// Failure description, set only on `Error`.
    pub error_message: Option<String>,
    /// Percent complete, 0 to 100.
    pub progress: u8,
    /// Number of retries performed.
    pub retry_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Time the request became ready.
    pub completed_at: Option<DateTime<Utc>>,
    /// Submitting principal.
    pub user_id: Option<String>,
    /// Submitting address.
    pub client_ip: String,
}

impl FetchRequest {
    /// New record in the `Queued` state.
    #[must_use]
    pub fn queued(id: Uuid, spec: FetchSpec, identity: Identity, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: RequestStatus::Queued,
            spec,
            content_hash: None,
            content_size: None,
            content_type: None,
            package_id: None,
            package_path: None,
            error_message: None,
            progress: progress::QUEUED,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            user_id: identity.user_id,
            client_ip: identity.client_ip,
        }
    }

    /// Move forward along the pipeline, raising progress to the entry checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the edge is illegal or when `Ready` is
    /// requested before every artifact field is recorded.
    pub fn advance(&mut self, next: RequestStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if matches!(next, RequestStatus::Error | RequestStatus::Cancelled) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        self.status.check_transition(next)?;
        if next == RequestStatus::Ready {
            self.ensure_artifacts()?;
            self.completed_at = Some(now);
        }
        self.status = next;
        if let Some(checkpoint) = next.entry_progress() {
            self.raise_progress(checkpoint);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record the fetch outcome while in `Fetching`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when not fetching or when content was already recorded.
    pub fn record_content(
        &mut self,
        content: ContentSummary,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != RequestStatus::Fetching {
            return Err(TransitionError::WrongStage {
                field: "content_hash",
                status: self.status,
            });
        }
        if self.content_hash.is_some() {
            return Err(TransitionError::AlreadyRecorded {
                field: "content_hash",
            });
        }
        self.content_hash = Some(content.hash);
        self.content_size = Some(content.size);
        self.content_type = Some(content.content_type);
        self.raise_progress(progress::FETCHED);
        self.updated_at = now;
        Ok(())
    }

    /// Record the packaging outcome while in `Packaging`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when not packaging or when a package was already recorded.
    pub fn record_package(
        &mut self,
        package: PackageSummary,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != RequestStatus::Packaging {
            return Err(TransitionError::WrongStage {
                field: "package_id",
                status: self.status,
            });
        }
        if self.package_id.is_some() {
            return Err(TransitionError::AlreadyRecorded {
                field: "package_id",
            });
        }
        self.package_id = Some(package.package_id);
        self.package_path = Some(package.package_path);
        self.raise_progress(progress::PACKAGED);
        self.updated_at = now;
        Ok(())
    }

    /// Enter `Error`, keeping every field recorded so far.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Illegal`] when the request is already terminal.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status.check_transition(RequestStatus::Error)?;
        self.status = RequestStatus::Error;
        self.error_message = Some(message.into());
        self.updated_at = now;
        Ok(())
    }

    /// Enter `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Illegal`] when the request is already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status.check_transition(RequestStatus::Cancelled)?;
        self.status = RequestStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the record accepts no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn raise_progress(&mut self, checkpoint: u8) {
        self.progress = self.progress.max(checkpoint);
    }

    fn ensure_artifacts(&self) -> Result<(), TransitionError> {
        if self.content_hash.is_none() {
            return Err(TransitionError::MissingArtifact {
                field: "content_hash",
            });
        }
        if self.content_size.unwrap_or(0) == 0 {
            return Err(TransitionError::MissingArtifact {
                field: "content_size",
            });
        }
        if self.package_id.is_none() {
            return Err(TransitionError::MissingArtifact { field: "package_id" });
        }
        if self.package_path.is_none() {
            return Err(TransitionError::MissingArtifact {
                field: "package_path",
            });
        }
        Ok(())
    }
}

/// Successful fetch outcome.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Response body.
    pub content: Bytes,
    /// Normalised content type (lowercase, parameters stripped).
    pub content_type: String,
    /// Upstream status code.
    pub status_code: u16,
    /// Upstream response headers.
    pub headers: BTreeMap<String, String>,
    /// Final URL after redirects.
    pub url: String,
}

/// Packaging outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Path of the package (metainfo) file.
    pub package_path: PathBuf,
    /// Package identifier (infohash).
    pub package_id: String,
    /// Path of the stored content object.
    pub content_path: PathBuf,
    /// Digest of the content.
    pub content_hash: String,
    /// Content length in bytes.
    pub content_size: u64,
}

/// Seeding state reported by a [`crate::Seeder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedState {
    /// Verifying local data.
    Checking,
    /// Available to peers.
    Seeding,
    /// Registered but not announcing.
    Paused,
}

/// Seeding statistics for one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedStats {
    /// Current state.
    pub state: SeedState,
    /// Fraction of data verified, 0.0 to 1.0.
    pub progress: f64,
    /// Bytes per second sent.
    pub upload_rate: u64,
    /// Bytes per second received.
    pub download_rate: u64,
    /// Connected peers.
    pub num_peers: u32,
    /// Connected seeds.
    pub num_seeds: u32,
    /// Total bytes sent.
    pub total_upload: u64,
    /// Total bytes received.
    pub total_download: u64,
}
