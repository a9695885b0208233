//! Environment-variable loader for [`ServiceConfig`].
//!
//! # Design
//! - Variables are captured once into a map; loading never reads the process
//!   environment directly.
//! - Unset variables keep the defaults from [`crate::defaults`].
//! - A missing HMAC secret is replaced with a random alphanumeric one.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::defaults;
use crate::error::ConfigResult;
use crate::model::ServiceConfig;
use crate::validate::{parse_bool, parse_list, parse_number, validate};

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "PROXYSEED_";

/// Builds a validated [`ServiceConfig`] from `PROXYSEED_*` variables.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfigLoader {
    vars: HashMap<String, String>,
}

impl ServiceConfigLoader {
    /// Capture the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Capture an explicit set of variables. Keys without the prefix are ignored.
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|suffix| (suffix.to_string(), value))
            })
            .collect();
        Self { vars }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Resolve every section, apply defaults, and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::InvalidField`] for the first variable that
    /// fails to parse or for the first cross-field rule that is violated.
    pub fn load(&self) -> ConfigResult<ServiceConfig> {
        let mut config = ServiceConfig::default();
        self.apply_server(&mut config)?;
        self.apply_rate_limit(&mut config)?;
        self.apply_queue(&mut config)?;
        self.apply_fetcher(&mut config)?;
        self.apply_torrent(&mut config)?;
        self.apply_storage(&mut config);
        self.apply_security(&mut config)?;
        self.apply_logging(&mut config);

        validate(&config)?;
        Ok(config)
    }

    fn apply_server(&self, config: &mut ServiceConfig) -> ConfigResult<()> {
        if let Some(host) = self.get("HOST") {
            config.server.host = host.trim().to_string();
        }
        if let Some(port) = self.get("PORT") {
            config.server.port = parse_number(port, "server", "port")?;
        }
        if let Some(prefix) = self.get("API_PREFIX") {
            config.server.api_prefix = prefix.trim().to_string();
        }
        Ok(())
    }

    fn apply_rate_limit(&self, config: &mut ServiceConfig) -> ConfigResult<()> {
        let limits = &mut config.rate_limit;
        if let Some(raw) = self.get("RATE_LIMIT_ENABLED") {
            limits.enabled = parse_bool(raw, "rate_limit", "enabled")?;
        }
        if let Some(raw) = self.get("RATE_LIMIT_PER_MINUTE") {
            limits.requests_per_minute = parse_number(raw, "rate_limit", "requests_per_minute")?;
        }
        if let Some(raw) = self.get("RATE_LIMIT_PER_HOUR") {
            limits.requests_per_hour = parse_number(raw, "rate_limit", "requests_per_hour")?;
        }
        if let Some(raw) = self.get("RATE_LIMIT_PER_IP_MINUTE") {
            limits.requests_per_ip_minute =
                parse_number(raw, "rate_limit", "requests_per_ip_minute")?;
        }
        if let Some(raw) = self.get("RATE_LIMIT_SWEEP_SECS") {
            limits.sweep_interval_secs = parse_number(raw, "rate_limit", "sweep_interval_secs")?;
        }
        Ok(())
    }

    fn apply_queue(&self, config: &mut ServiceConfig) -> ConfigResult<()> {
        if let Some(raw) = self.get("QUEUE_WORKERS") {
            config.queue.workers = parse_number(raw, "queue", "workers")?;
        }
        if let Some(raw) = self.get("QUEUE_CAPACITY") {
            config.queue.capacity = parse_number(raw, "queue", "capacity")?;
        }
        if let Some(raw) = self.get("QUEUE_POLL_MS") {
            config.queue.poll_interval_ms = parse_number(raw, "queue", "poll_interval_ms")?;
        }
        if let Some(raw) = self.get("REQUEST_DEFAULT_TTL") {
            config.requests.default_ttl_secs = parse_number(raw, "requests", "default_ttl_secs")?;
        }
        if let Some(raw) = self.get("REQUEST_MAX_TTL") {
            config.requests.max_ttl_secs = parse_number(raw, "requests", "max_ttl_secs")?;
        }
        Ok(())
    }

    fn apply_fetcher(&self, config: &mut ServiceConfig) -> ConfigResult<()> {
        let fetcher = &mut config.fetcher;
        if let Some(raw) = self.get("FETCH_CONNECT_TIMEOUT_SECS") {
            fetcher.connect_timeout_secs = parse_number(raw, "fetcher", "connect_timeout_secs")?;
        }
        if let Some(raw) = self.get("FETCH_READ_TIMEOUT_SECS") {
            fetcher.read_timeout_secs = parse_number(raw, "fetcher", "read_timeout_secs")?;
        }
        if let Some(raw) = self.get("FETCH_MAX_SIZE") {
            fetcher.max_size = parse_number(raw, "fetcher", "max_size")?;
        }
        if let Some(raw) = self.get("FETCH_MIME_WHITELIST") {
            fetcher.mime_whitelist = parse_list(raw)
                .into_iter()
                .map(|mime| mime.to_ascii_lowercase())
                .collect();
        }
        if let Some(raw) = self.get("FETCH_VERIFY_TLS") {
            fetcher.verify_tls = parse_bool(raw, "fetcher", "verify_tls")?;
        }
        if let Some(raw) = self.get("FETCH_USER_AGENT") {
            fetcher.user_agent = raw.to_string();
        }
        if let Some(raw) = self.get("FETCH_PROXY") {
            fetcher.proxy = Some(raw.trim().to_string());
        }
        Ok(())
    }

    fn apply_torrent(&self, config: &mut ServiceConfig) -> ConfigResult<()> {
        let torrent = &mut config.torrent;
        if let Some(raw) = self.get("TORRENT_PRIVATE") {
            torrent.private = parse_bool(raw, "torrent", "private")?;
        }
        if let Some(raw) = self.get("TORRENT_PIECE_SIZE") {
            torrent.piece_size = parse_number(raw, "torrent", "piece_size")?;
        }
        if let Some(raw) = self.get("TORRENT_ANNOUNCE_URL") {
            torrent.announce_url = raw.trim().to_string();
        }
        if let Some(raw) = self.get("TORRENT_CREATED_BY") {
            torrent.created_by = raw.to_string();
        }
        Ok(())
    }

    fn apply_storage(&self, config: &mut ServiceConfig) {
        if let Some(raw) = self.get("DATA_DIR") {
            config.storage.data_dir = PathBuf::from(raw.trim());
        }
    }

    fn apply_security(&self, config: &mut ServiceConfig) -> ConfigResult<()> {
        let security = &mut config.security;
        if let Some(raw) = self.get("AUTH_ENABLED") {
            security.auth_enabled = parse_bool(raw, "security", "auth_enabled")?;
        }
        if let Some(raw) = self.get("BEARER_TOKENS") {
            security.bearer_tokens = parse_list(raw);
        }
        security.hmac_secret = self
            .get("HMAC_SECRET")
            .map_or_else(generate_secret, ToString::to_string);
        Ok(())
    }

    fn apply_logging(&self, config: &mut ServiceConfig) {
        if let Some(level) = self.get("LOG_LEVEL") {
            config.logging.level = level.trim().to_string();
        }
        if let Some(format) = self.get("LOG_FORMAT") {
            config.logging.format = Some(format.trim().to_ascii_lowercase());
        }
    }
}

fn generate_secret() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(defaults::GENERATED_SECRET_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_environment_yields_defaults() -> anyhow::Result<()> {
        let config = ServiceConfigLoader::from_vars(Vec::<(String, String)>::new()).load()?;
        assert_eq!(config.server.port, defaults::PORT);
        assert_eq!(config.queue.workers, defaults::QUEUE_WORKERS);
        assert_eq!(config.security.hmac_secret.len(), defaults::GENERATED_SECRET_LEN);
        Ok(())
    }

    #[test]
    fn unprefixed_and_blank_values_are_ignored() -> anyhow::Result<()> {
        let config = ServiceConfigLoader::from_vars([
            ("PORT", "9999"),
            ("PROXYSEED_PORT", "  "),
        ])
        .load()?;
        assert_eq!(config.server.port, defaults::PORT);
        Ok(())
    }

    #[test]
    fn generated_secrets_differ_between_loads() -> anyhow::Result<()> {
        let loader = ServiceConfigLoader::default();
        let first = loader.load()?;
        let second = loader.load()?;
        assert_ne!(first.security.hmac_secret, second.security.hmac_secret);
        Ok(())
    }
}
