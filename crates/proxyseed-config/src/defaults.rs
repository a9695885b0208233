//! Baseline values applied when an environment variable is absent.
//!
//! # Design
//! - Every tunable has a named constant so tests and docs agree on defaults.
//! - Limits mirror what the public API advertises (TTL bounds, size caps).

/// Default bind host.
pub const HOST: &str = "0.0.0.0";
/// Default bind port.
pub const PORT: u16 = 8000;
/// Route prefix for the versioned API.
pub const API_PREFIX: &str = "/v1";

/// Per-user submissions allowed per minute.
pub const REQUESTS_PER_MINUTE: u32 = 60;
/// Per-user submissions allowed per hour.
pub const REQUESTS_PER_HOUR: u32 = 1_000;
/// Per-IP submissions allowed per minute.
pub const REQUESTS_PER_IP_MINUTE: u32 = 100;
/// Interval between sweeps of idle rate-limit identities.
pub const RATE_LIMIT_SWEEP_SECS: u64 = 300;

/// Concurrent pipeline workers.
pub const QUEUE_WORKERS: usize = 5;
/// Maximum ids waiting in the task queue.
pub const QUEUE_CAPACITY: usize = 1_024;
/// Worker poll interval in milliseconds.
pub const QUEUE_POLL_MS: u64 = 1_000;

/// Upstream connect timeout in seconds.
pub const FETCH_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Upstream read timeout in seconds.
pub const FETCH_READ_TIMEOUT_SECS: u64 = 30;
/// Maximum fetched body size in bytes.
pub const FETCH_MAX_SIZE: u64 = 50 * 1024 * 1024;
/// MIME types accepted from upstream servers.
pub const FETCH_MIME_WHITELIST: &[&str] = &[
    "text/html",
    "text/plain",
    "application/json",
    "application/xml",
    "image/*",
];
/// User agent sent upstream.
pub const FETCH_USER_AGENT: &str = "ProxySeed/0.1.0";

/// Metainfo piece length in bytes.
pub const TORRENT_PIECE_SIZE: u32 = 256 * 1024;
/// Smallest accepted piece length.
pub const TORRENT_MIN_PIECE_SIZE: u32 = 16 * 1024;
/// Tracker announce URL embedded in metainfo and magnet links.
pub const TORRENT_ANNOUNCE_URL: &str = "http://localhost:8000/announce";
/// Value recorded in the metainfo `created by` field.
pub const TORRENT_CREATED_BY: &str = "ProxySeed/0.1.0";

/// Root directory for persisted data.
pub const DATA_DIR: &str = "./data";

/// TTL applied when a submission omits one.
pub const REQUEST_DEFAULT_TTL_SECS: u32 = 3_600;
/// Largest TTL a submission may request.
pub const REQUEST_MAX_TTL_SECS: u32 = 86_400;

/// Length of the generated HMAC secret when none is configured.
pub const GENERATED_SECRET_LEN: usize = 64;

/// Log level when neither `RUST_LOG` nor configuration specify one.
pub const LOG_LEVEL: &str = "info";
