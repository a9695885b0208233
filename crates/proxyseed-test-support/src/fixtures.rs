//! Record builders and scratch directories.

use chrono::Utc;
use proxyseed_core::{FetchRequest, FetchSpec, Identity};
use tempfile::TempDir;
use uuid::Uuid;

/// TTL used by fixture specs.
pub const FIXTURE_TTL_SECS: u32 = 3_600;

/// `GET` spec for `url`.
#[must_use]
pub fn fetch_spec(url: &str) -> FetchSpec {
    FetchSpec::get(url, FIXTURE_TTL_SECS)
}

/// Authenticated identity for `user` at `ip`.
#[must_use]
pub fn identity(user: &str, ip: &str) -> Identity {
    Identity::user(user, ip)
}

/// Fresh queued record for `url`.
#[must_use]
pub fn queued_request(url: &str) -> FetchRequest {
    FetchRequest::queued(
        Uuid::new_v4(),
        fetch_spec(url),
        identity("fixture", "127.0.0.1"),
        Utc::now(),
    )
}

/// Scratch data directory laid out like the service's data root.
pub struct DataDir {
    root: TempDir,
}

impl DataDir {
    /// Create an empty scratch directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            root: TempDir::new()?,
        })
    }

    /// Root path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.root.path()
    }

    /// Content-store root.
    #[must_use]
    pub fn content(&self) -> std::path::PathBuf {
        self.root.path().join("content")
    }

    /// Package output directory.
    #[must_use]
    pub fn torrents(&self) -> std::path::PathBuf {
        self.root.path().join("torrents")
    }

    /// Seeder resume directory.
    #[must_use]
    pub fn resume(&self) -> std::path::PathBuf {
        self.root.path().join("resume")
    }

    /// Request record directory.
    #[must_use]
    pub fn requests(&self) -> std::path::PathBuf {
        self.root.path().join("requests")
    }
}
