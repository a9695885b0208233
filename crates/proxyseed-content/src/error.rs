//! # Design
//!
//! - Constant-message errors with the failing operation and path as context.
//! - Source errors are preserved, never interpolated into the message.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for content store operations.
pub type ContentResult<T> = Result<T, ContentError>;

/// Errors produced by the content store.
#[derive(Debug, Error)]
pub enum ContentError {
    /// IO failures while interacting with the filesystem.
    #[error("content store io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Sidecar metadata could not be encoded or decoded.
    #[error("content store metadata failure")]
    Json {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Sidecar path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Directory traversal failed while gathering statistics.
    #[error("content store traversal failure")]
    Walk {
        /// Root being walked.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// A digest string was not 64 lowercase hex characters.
    #[error("invalid content digest")]
    InvalidDigest {
        /// Offending value.
        value: String,
    },
}

impl ContentError {
    pub(crate) fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(operation: &'static str, path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}
