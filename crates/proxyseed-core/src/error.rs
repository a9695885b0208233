//! Error types shared by the pipeline and its collaborators.

use std::error::Error;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::state::RequestStatus;

/// Boxed source error carried across collaborator boundaries.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Rejected state-machine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Edge not present in the transition table.
    #[error("illegal status transition from {from} to {to}")]
    Illegal {
        /// Current status.
        from: RequestStatus,
        /// Requested status.
        to: RequestStatus,
    },
    /// A set-once field was already populated.
    #[error("field '{field}' is already recorded")]
    AlreadyRecorded {
        /// Field name.
        field: &'static str,
    },
    /// Stage output recorded while the request is in a different stage.
    #[error("cannot record {field} while {status}")]
    WrongStage {
        /// Field name.
        field: &'static str,
        /// Current status.
        status: RequestStatus,
    },
    /// Ready requires every artifact field.
    #[error("request cannot become ready without '{field}'")]
    MissingArtifact {
        /// Missing field name.
        field: &'static str,
    },
    /// Status label not recognised.
    #[error("unknown request status '{value}'")]
    UnknownStatus {
        /// Offending label.
        value: String,
    },
}

/// Failures surfaced by a [`crate::Fetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream did not answer in time.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },
    /// Body exceeded the configured cap.
    #[error("content size exceeds limit of {limit} bytes")]
    SizeExceeded {
        /// Configured limit.
        limit: u64,
        /// Size announced or observed, when known.
        observed: Option<u64>,
    },
    /// Content type not on the whitelist.
    #[error("content type '{content_type}' is not allowed")]
    MimeRejected {
        /// Upstream content type.
        content_type: String,
    },
    /// Transport-level or protocol failure.
    #[error("{detail}")]
    Transport {
        /// Human-readable description.
        detail: String,
        /// Underlying failure.
        #[source]
        source: Option<BoxError>,
    },
}

/// Failures surfaced by a [`crate::Packager`].
#[derive(Debug, Error)]
pub enum PackageError {
    /// Filesystem operation failed.
    #[error("{operation} failed for {}", path.display())]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Affected path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Content cannot be packaged.
    #[error("{reason}")]
    Invalid {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Any other packaging failure.
    #[error("{operation} failed")]
    Failed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}

/// Failures surfaced by a [`crate::Seeder`].
#[derive(Debug, Error)]
pub enum SeederError {
    /// Package or content file missing on disk.
    #[error("file not found: {}", path.display())]
    MissingFile {
        /// Missing path.
        path: PathBuf,
    },
    /// Operation not provided by this seeder.
    #[error("{operation} is not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Any other seeding failure.
    #[error("{operation} failed")]
    Failed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}

/// Failures surfaced by a [`crate::RequestStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the id.
    #[error("request {id} not found")]
    NotFound {
        /// Missing id.
        id: Uuid,
    },
    /// A record already exists for the id.
    #[error("request {id} already exists")]
    AlreadyExists {
        /// Duplicate id.
        id: Uuid,
    },
    /// The mutator refused the change; the record is unchanged.
    #[error("update rejected for request {id}")]
    Rejected {
        /// Target id.
        id: Uuid,
        /// Reason the mutator gave.
        #[source]
        source: TransitionError,
    },
    /// Storage backend failure.
    #[error("request store {operation} failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    /// Transition error carried by a rejected update.
    #[must_use]
    pub const fn rejection(&self) -> Option<&TransitionError> {
        match self {
            Self::Rejected { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Classified failure of one pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Fetch stage failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Package stage failed.
    #[error(transparent)]
    Package(#[from] PackageError),
    /// Seed stage failed.
    #[error(transparent)]
    Seed(#[from] SeederError),
    /// Persistence failed between stages.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Anything not otherwise classified, including worker panics.
    #[error("{detail}")]
    Unexpected {
        /// Human-readable description.
        detail: String,
    },
}

impl StageError {
    /// Message persisted as the request's `error_message`.
    #[must_use]
    pub fn error_message(&self) -> String {
        match self {
            Self::Fetch(err @ FetchError::Timeout { .. }) => format!("Timeout: {err}"),
            Self::Fetch(err) => format!("Fetch error: {err}"),
            Self::Package(err) => format!("Packaging error: {err}"),
            Self::Seed(err) => format!("Seeding error: {err}"),
            Self::Store(err) => format!("Unexpected error: {err}"),
            Self::Unexpected { detail } => format!("Unexpected error: {detail}"),
        }
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::Timeout { .. }) => "fetch_timeout",
            Self::Fetch(FetchError::SizeExceeded { .. }) => "fetch_size_exceeded",
            Self::Fetch(FetchError::MimeRejected { .. }) => "fetch_mime_rejected",
            Self::Fetch(FetchError::Transport { .. }) => "fetch_error",
            Self::Package(_) => "package_error",
            Self::Seed(_) => "seeder_error",
            Self::Store(_) | Self::Unexpected { .. } => "unexpected_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_stage_prefixes() {
        let timeout = StageError::from(FetchError::Timeout {
            url: "https://example.test".to_string(),
            timeout_secs: 30,
        });
        assert_eq!(
            timeout.error_message(),
            "Timeout: request to https://example.test timed out after 30s"
        );
        assert_eq!(timeout.kind(), "fetch_timeout");

        let mime = StageError::from(FetchError::MimeRejected {
            content_type: "application/zip".to_string(),
        });
        assert!(mime.error_message().starts_with("Fetch error: "));

        let package = StageError::from(PackageError::Invalid {
            reason: "content is empty",
        });
        assert_eq!(package.error_message(), "Packaging error: content is empty");

        let seed = StageError::from(SeederError::MissingFile {
            path: PathBuf::from("/tmp/x.torrent"),
        });
        assert!(seed.error_message().starts_with("Seeding error: "));

        let unexpected = StageError::Unexpected {
            detail: "worker panicked".to_string(),
        };
        assert_eq!(unexpected.error_message(), "Unexpected error: worker panicked");
    }

    #[test]
    fn rejected_updates_expose_the_transition_error() {
        let err = StoreError::Rejected {
            id: Uuid::nil(),
            source: TransitionError::Illegal {
                from: RequestStatus::Ready,
                to: RequestStatus::Fetching,
            },
        };
        assert!(matches!(
            err.rejection(),
            Some(TransitionError::Illegal { .. })
        ));
        assert!(StoreError::NotFound { id: Uuid::nil() }.rejection().is_none());
    }
}
