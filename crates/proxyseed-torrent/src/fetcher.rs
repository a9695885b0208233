//! `reqwest`-backed [`Fetcher`].
//!
//! # Design
//! - One pooled client per fetcher, configured once from [`FetcherSettings`].
//! - The content type is checked before the body is read; an announced
//!   `Content-Length` over the cap is rejected without reading.
//! - Bodies are read chunk by chunk and abandoned as soon as the cap is crossed.
//! - Upstream status codes are passed through untouched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::BytesMut;
use proxyseed_config::FetcherSettings;
use proxyseed_core::{BoxError, FetchError, FetchResult, FetchSpec, Fetcher, HttpMethod};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, Proxy, Response};
use tracing::debug;

/// HTTP fetcher enforcing size, MIME, and timeout limits.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    settings: FetcherSettings,
}

impl HttpFetcher {
    /// Build a fetcher from `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] when the proxy URL is invalid or the
    /// client cannot be constructed.
    pub fn new(settings: FetcherSettings) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.connect_timeout() + settings.read_timeout())
            .danger_accept_invalid_certs(!settings.verify_tls);
        if let Some(proxy) = settings.proxy.as_deref() {
            let proxy = Proxy::all(proxy).map_err(|err| transport("invalid upstream proxy", err))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| transport("failed to build http client", err))?;
        Ok(Self { client, settings })
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &FetcherSettings {
        &self.settings
    }

    const fn timeout_secs(&self) -> u64 {
        self.settings.connect_timeout_secs + self.settings.read_timeout_secs
    }

    fn map_reqwest(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout_secs(),
            }
        } else {
            let detail = if err.is_connect() {
                format!("connection to {url} failed")
            } else {
                format!("request to {url} failed")
            };
            transport(detail, err)
        }
    }

    async fn read_body(&self, url: &str, mut response: Response) -> Result<BytesMut, FetchError> {
        let limit = self.settings.max_size;
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| self.map_reqwest(url, err))?
        {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::SizeExceeded {
                    limit,
                    observed: None,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult, FetchError> {
        let url = spec.url.as_str();
        let mut request = self.client.request(to_method(spec.method), url);
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        debug!(url, method = %spec.method, "fetching upstream");
        let response = request
            .send()
            .await
            .map_err(|err| self.map_reqwest(url, err))?;

        let status_code = response.status().as_u16();
        let content_type = normalize_content_type(response.headers());
        if !mime_allowed(&content_type, &self.settings.mime_whitelist) {
            return Err(FetchError::MimeRejected { content_type });
        }
        if let Some(length) = response.content_length()
            && length > self.settings.max_size
        {
            return Err(FetchError::SizeExceeded {
                limit: self.settings.max_size,
                observed: Some(length),
            });
        }

        let headers = collect_headers(response.headers());
        let final_url = response.url().to_string();
        let content = self.read_body(url, response).await?.freeze();
        debug!(url, status_code, size = content.len(), "upstream fetched");

        Ok(FetchResult {
            content,
            content_type,
            status_code,
            headers,
            url: final_url,
        })
    }
}

const fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
    }
}

fn normalize_content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Whether `content_type` is accepted by `whitelist`.
///
/// Entries ending in `/*` match any subtype. An empty content type never matches.
#[must_use]
pub fn mime_allowed(content_type: &str, whitelist: &[String]) -> bool {
    if content_type.is_empty() {
        return false;
    }
    whitelist.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        entry.strip_suffix('*').map_or_else(
            || entry == content_type,
            |prefix| prefix.ends_with('/') && content_type.starts_with(prefix),
        )
    })
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn transport(detail: impl Into<String>, err: reqwest::Error) -> FetchError {
    let source: BoxError = Box::new(err);
    FetchError::Transport {
        detail: detail.into(),
        source: Some(source),
    }
}
