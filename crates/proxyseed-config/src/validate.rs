//! Parsing helpers and cross-field validation.

use std::str::FromStr;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::ServiceConfig;

#[allow(clippy::redundant_pub_crate)]
pub(crate) fn parse_number<T: FromStr>(
    raw: &str,
    section: &'static str,
    field: &'static str,
) -> ConfigResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(section, field, raw.to_string(), "must be a number"))
}

#[allow(clippy::redundant_pub_crate)]
pub(crate) fn parse_bool(
    raw: &str,
    section: &'static str,
    field: &'static str,
) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            section,
            field,
            raw.to_string(),
            "must be a boolean",
        )),
    }
}

/// Split a comma-separated list, dropping blank entries.
#[allow(clippy::redundant_pub_crate)]
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[allow(clippy::redundant_pub_crate)]
pub(crate) fn validate(config: &ServiceConfig) -> ConfigResult<()> {
    validate_server(config)?;
    validate_limits(config)?;
    validate_queue(config)?;
    validate_fetcher(config)?;
    validate_torrent(config)?;
    validate_requests(config)?;
    validate_security(config)
}

fn validate_server(config: &ServiceConfig) -> ConfigResult<()> {
    if config.server.port == 0 {
        return Err(ConfigError::invalid(
            "server",
            "port",
            "0".to_string(),
            "must be between 1 and 65535",
        ));
    }
    if !config.server.api_prefix.starts_with('/') || config.server.api_prefix.ends_with('/') {
        return Err(ConfigError::invalid(
            "server",
            "api_prefix",
            config.server.api_prefix.clone(),
            "must start with '/' and must not end with '/'",
        ));
    }
    Ok(())
}

fn validate_limits(config: &ServiceConfig) -> ConfigResult<()> {
    let limits = &config.rate_limit;
    if limits.enabled
        && (limits.requests_per_minute == 0
            || limits.requests_per_hour == 0
            || limits.requests_per_ip_minute == 0)
    {
        return Err(ConfigError::invalid(
            "rate_limit",
            "requests_per_minute",
            None::<String>,
            "limits must be positive while rate limiting is enabled",
        ));
    }
    if limits.sweep_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "rate_limit",
            "sweep_interval_secs",
            "0".to_string(),
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_queue(config: &ServiceConfig) -> ConfigResult<()> {
    if config.queue.workers == 0 {
        return Err(ConfigError::invalid(
            "queue",
            "workers",
            "0".to_string(),
            "must be positive",
        ));
    }
    if config.queue.capacity == 0 {
        return Err(ConfigError::invalid(
            "queue",
            "capacity",
            "0".to_string(),
            "must be positive",
        ));
    }
    if config.queue.poll_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "queue",
            "poll_interval_ms",
            "0".to_string(),
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_fetcher(config: &ServiceConfig) -> ConfigResult<()> {
    let fetcher = &config.fetcher;
    if fetcher.max_size == 0 {
        return Err(ConfigError::invalid(
            "fetcher",
            "max_size",
            "0".to_string(),
            "must be positive",
        ));
    }
    if fetcher.connect_timeout_secs == 0 || fetcher.read_timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "fetcher",
            "timeouts",
            None::<String>,
            "must be positive",
        ));
    }
    if fetcher.mime_whitelist.is_empty() {
        return Err(ConfigError::invalid(
            "fetcher",
            "mime_whitelist",
            None::<String>,
            "must name at least one type",
        ));
    }
    if let Some(proxy) = fetcher.proxy.as_deref()
        && url::Url::parse(proxy).is_err()
    {
        return Err(ConfigError::invalid(
            "fetcher",
            "proxy",
            proxy.to_string(),
            "must be an absolute URL",
        ));
    }
    Ok(())
}

fn validate_torrent(config: &ServiceConfig) -> ConfigResult<()> {
    let piece = config.torrent.piece_size;
    if piece < defaults::TORRENT_MIN_PIECE_SIZE || !piece.is_power_of_two() {
        return Err(ConfigError::invalid(
            "torrent",
            "piece_size",
            piece.to_string(),
            "must be a power of two of at least 16 KiB",
        ));
    }
    if url::Url::parse(&config.torrent.announce_url).is_err() {
        return Err(ConfigError::invalid(
            "torrent",
            "announce_url",
            config.torrent.announce_url.clone(),
            "must be an absolute URL",
        ));
    }
    Ok(())
}

fn validate_requests(config: &ServiceConfig) -> ConfigResult<()> {
    if config.requests.default_ttl_secs > config.requests.max_ttl_secs {
        return Err(ConfigError::invalid(
            "requests",
            "default_ttl_secs",
            config.requests.default_ttl_secs.to_string(),
            "must not exceed max_ttl_secs",
        ));
    }
    Ok(())
}

fn validate_security(config: &ServiceConfig) -> ConfigResult<()> {
    if config.security.auth_enabled
        && config.security.bearer_tokens.is_empty()
        && config.security.hmac_secret.is_empty()
    {
        return Err(ConfigError::invalid(
            "security",
            "bearer_tokens",
            None::<String>,
            "authentication requires a bearer token or an hmac secret",
        ));
    }

    Ok(())
}
