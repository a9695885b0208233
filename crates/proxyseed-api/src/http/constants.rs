//! Shared HTTP constants (headers, problem URIs, limits).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const HEADER_SIGNATURE: &str = "x-signature";
pub(crate) const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub(crate) const HEADER_REAL_IP: &str = "x-real-ip";

pub(crate) const PROBLEM_INTERNAL: &str = "https://proxyseed.dev/problems/internal";
pub(crate) const PROBLEM_UNAUTHORIZED: &str = "https://proxyseed.dev/problems/unauthorized";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://proxyseed.dev/problems/bad-request";
pub(crate) const PROBLEM_VALIDATION: &str = "https://proxyseed.dev/problems/validation";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://proxyseed.dev/problems/not-found";
pub(crate) const PROBLEM_RATE_LIMITED: &str = "https://proxyseed.dev/problems/rate-limited";
pub(crate) const PROBLEM_SERVICE_UNAVAILABLE: &str =
    "https://proxyseed.dev/problems/service-unavailable";

pub(crate) const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
pub(crate) const UNKNOWN_CLIENT_IP: &str = "unknown";
pub(crate) const TORRENT_MEDIA_TYPE: &str = "application/x-bittorrent";
pub(crate) const METRICS_MEDIA_TYPE: &str = "text/plain; version=0.0.4";
