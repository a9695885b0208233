//! # Design
//!
//! - Centralize application-level errors for bootstrap and shutdown.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use proxyseed_core::BoxError;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: proxyseed_config::ConfigError,
    },
    /// Configuration values were unusable at startup.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Telemetry setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: BoxError,
    },
    /// Request persistence failed.
    #[error("request store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: proxyseed_core::StoreError,
    },
    /// Content store setup failed.
    #[error("content store operation failed")]
    Content {
        /// Operation identifier.
        operation: &'static str,
        /// Source content error.
        source: proxyseed_content::ContentError,
    },
    /// HTTP fetcher setup failed.
    #[error("fetcher operation failed")]
    Fetcher {
        /// Operation identifier.
        operation: &'static str,
        /// Source fetch error.
        source: proxyseed_core::FetchError,
    },
    /// Packager setup failed.
    #[error("packager operation failed")]
    Packager {
        /// Operation identifier.
        operation: &'static str,
        /// Source packaging error.
        source: proxyseed_core::PackageError,
    },
    /// Seeder setup, restore, or shutdown failed.
    #[error("seeder operation failed")]
    Seeder {
        /// Operation identifier.
        operation: &'static str,
        /// Source seeder error.
        source: proxyseed_core::SeederError,
    },
    /// Request service operations failed.
    #[error("request service operation failed")]
    Service {
        /// Operation identifier.
        operation: &'static str,
        /// Source service error.
        source: proxyseed_pipeline::ServiceError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source server error.
        source: BoxError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: proxyseed_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) fn telemetry(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Telemetry {
            operation,
            source: source.into(),
        }
    }

    pub(crate) const fn store(operation: &'static str, source: proxyseed_core::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn content(
        operation: &'static str,
        source: proxyseed_content::ContentError,
    ) -> Self {
        Self::Content { operation, source }
    }

    pub(crate) const fn fetcher(operation: &'static str, source: proxyseed_core::FetchError) -> Self {
        Self::Fetcher { operation, source }
    }

    pub(crate) const fn packager(
        operation: &'static str,
        source: proxyseed_core::PackageError,
    ) -> Self {
        Self::Packager { operation, source }
    }

    pub(crate) const fn seeder(operation: &'static str, source: proxyseed_core::SeederError) -> Self {
        Self::Seeder { operation, source }
    }

    pub(crate) const fn service(
        operation: &'static str,
        source: proxyseed_pipeline::ServiceError,
    ) -> Self {
        Self::Service { operation, source }
    }

    pub(crate) fn api_server(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::ApiServer {
            operation,
            source: source.into(),
        }
    }

    pub(crate) const fn io(operation: &'static str, path: Option<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }
}
