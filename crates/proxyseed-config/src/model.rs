//! Typed configuration sections.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Admission rate limits.
    pub rate_limit: RateLimitSettings,
    /// Worker pool sizing.
    pub queue: QueueSettings,
    /// Upstream fetch policy.
    pub fetcher: FetcherSettings,
    /// Metainfo generation options.
    pub torrent: TorrentSettings,
    /// On-disk layout.
    pub storage: StorageSettings,
    /// Submission limits.
    pub requests: RequestSettings,
    /// Authentication material.
    pub security: SecuritySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Prefix for versioned routes, always starting with `/`.
    pub api_prefix: String,
}

impl ServerSettings {
    /// `host:port` pair suitable for socket address parsing.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            api_prefix: defaults::API_PREFIX.to_string(),
        }
    }
}

/// Admission rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// When false every submission is admitted.
    pub enabled: bool,
    /// Per-user submissions per minute.
    pub requests_per_minute: u32,
    /// Per-user submissions per hour.
    pub requests_per_hour: u32,
    /// Per-IP submissions per minute.
    pub requests_per_ip_minute: u32,
    /// Seconds between idle-identity sweeps.
    pub sweep_interval_secs: u64,
}

impl RateLimitSettings {
    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: defaults::REQUESTS_PER_MINUTE,
            requests_per_hour: defaults::REQUESTS_PER_HOUR,
            requests_per_ip_minute: defaults::REQUESTS_PER_IP_MINUTE,
            sweep_interval_secs: defaults::RATE_LIMIT_SWEEP_SECS,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Maximum ids waiting for a worker.
    pub capacity: usize,
    /// Worker poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl QueueSettings {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: defaults::QUEUE_WORKERS,
            capacity: defaults::QUEUE_CAPACITY,
            poll_interval_ms: defaults::QUEUE_POLL_MS,
        }
    }
}

/// Upstream fetch policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherSettings {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_timeout_secs: u64,
    /// Maximum body size in bytes.
    pub max_size: u64,
    /// Accepted MIME types; `type/*` entries match any subtype.
    pub mime_whitelist: Vec<String>,
    /// Verify upstream TLS certificates.
    pub verify_tls: bool,
    /// User agent sent upstream.
    pub user_agent: String,
    /// Optional upstream proxy URL.
    pub proxy: Option<String>,
}

impl FetcherSettings {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::FETCH_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: defaults::FETCH_READ_TIMEOUT_SECS,
            max_size: defaults::FETCH_MAX_SIZE,
            mime_whitelist: defaults::FETCH_MIME_WHITELIST
                .iter()
                .map(ToString::to_string)
                .collect(),
            verify_tls: true,
            user_agent: defaults::FETCH_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

/// Metainfo generation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentSettings {
    /// Set the private flag in the info dictionary.
    pub private: bool,
    /// Piece length in bytes; a power of two.
    pub piece_size: u32,
    /// Tracker announce URL.
    pub announce_url: String,
    /// Value for the `created by` field.
    pub created_by: String,
}

impl Default for TorrentSettings {
    fn default() -> Self {
        Self {
            private: true,
            piece_size: defaults::TORRENT_PIECE_SIZE,
            announce_url: defaults::TORRENT_ANNOUNCE_URL.to_string(),
            created_by: defaults::TORRENT_CREATED_BY.to_string(),
        }
    }
}

/// On-disk layout rooted at a single data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root data directory.
    pub data_dir: PathBuf,
}

impl StorageSettings {
    /// Content-addressable object store root.
    #[must_use]
    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join("content")
    }

    /// Directory holding generated `.torrent` files.
    #[must_use]
    pub fn torrents_dir(&self) -> PathBuf {
        self.data_dir.join("torrents")
    }

    /// Directory holding seeder resume records.
    #[must_use]
    pub fn resume_dir(&self) -> PathBuf {
        self.data_dir.join("resume")
    }

    /// Directory holding persisted request records.
    #[must_use]
    pub fn requests_dir(&self) -> PathBuf {
        self.data_dir.join("requests")
    }

    /// Root data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
        }
    }
}

/// Submission limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSettings {
    /// TTL applied when omitted.
    pub default_ttl_secs: u32,
    /// Largest accepted TTL.
    pub max_ttl_secs: u32,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: defaults::REQUEST_DEFAULT_TTL_SECS,
            max_ttl_secs: defaults::REQUEST_MAX_TTL_SECS,
        }
    }
}

/// Authentication material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Require credentials on request routes.
    pub auth_enabled: bool,
    /// Accepted bearer tokens.
    #[serde(skip_serializing)]
    pub bearer_tokens: Vec<String>,
    /// Shared secret for `X-Signature` body signing.
    #[serde(skip_serializing)]
    pub hmac_secret: String,
}

impl fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("auth_enabled", &self.auth_enabled)
            .field("bearer_tokens", &self.bearer_tokens.len())
            .field("hmac_secret", &"<redacted>")
            .finish()
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            bearer_tokens: Vec::new(),
            hmac_secret: String::new(),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format label (`json` or `pretty`); inferred when absent.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: None,
        }
    }
}
