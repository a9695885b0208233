//! Admission and queue errors surfaced to callers.

use proxyseed_core::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Which window rejected an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Per-user requests per minute.
    UserMinute,
    /// Per-user requests per hour.
    UserHour,
    /// Per-address requests per minute.
    IpMinute,
}

impl LimitScope {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserMinute => "user_minute",
            Self::UserHour => "user_hour",
            Self::IpMinute => "ip_minute",
        }
    }
}

/// Admission denied by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded")]
pub struct RateLimited {
    /// Seconds the caller should wait.
    pub retry_after_secs: u64,
    /// Window that was exhausted.
    pub scope: LimitScope,
}

/// Task queue failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("task queue is full")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
    /// The receiving side is gone.
    #[error("task queue is closed")]
    Closed,
}

/// Errors returned by [`crate::RequestService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Admission denied by the rate limiter.
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        /// Seconds the caller should wait.
        retry_after_secs: u64,
    },
    /// Submission failed validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
        /// Offending value, when safe to echo.
        value: Option<String>,
    },
    /// No record exists for the id.
    #[error("request {id} not found")]
    NotFound {
        /// Missing id.
        id: Uuid,
    },
    /// The task queue cannot take more work.
    #[error("task queue is full")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },
    /// Persistence failure.
    #[error("request store failure")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub(crate) fn validation(field: &'static str, reason: &'static str, value: &str) -> Self {
        Self::Validation {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }
}

impl From<RateLimited> for ServiceError {
    fn from(limited: RateLimited) -> Self {
        Self::RateLimitExceeded {
            retry_after_secs: limited.retry_after_secs,
        }
    }
}

/// Convenience alias for service results.
pub type ServiceResult<T> = Result<T, ServiceError>;
