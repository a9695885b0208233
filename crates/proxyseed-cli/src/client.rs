//! Shared client utilities and error types for the CLI.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::anyhow;
use proxyseed_api_models::ProblemDetails;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode, Url};

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Build the HTTP client shared by every command.
pub(crate) fn build_client(timeout_secs: u64, trace_id: &str) -> CliResult<Client> {
    let mut default_headers = HeaderMap::new();
    let request_id = HeaderValue::from_str(trace_id)
        .map_err(|_| CliError::failure(anyhow!("trace identifier contains invalid characters")))?;
    default_headers.insert(HEADER_REQUEST_ID, request_id);

    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(default_headers)
        .build()
        .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))
}

/// Application context passed to command handlers.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) client: Client,
    pub(crate) base_url: Url,
    pub(crate) token: Option<String>,
}

impl AppContext {
    /// Resolve `path` beneath the API base URL, keeping any prefix the base carries.
    pub(crate) fn endpoint(&self, path: &str) -> CliResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
            .parse()
            .map_err(|err| CliError::failure(anyhow!("invalid endpoint '{path}': {err}")))
    }

    /// Attach the bearer token, when one was supplied.
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Send `request`, turning transport errors into failures that name `path`.
    pub(crate) async fn send(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> CliResult<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| CliError::failure(anyhow!("request to {path} failed: {err}")))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_problem(response).await)
        }
    }
}

/// Parse the API URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}

/// Parse a `name=value` header argument.
pub(crate) fn parse_header(input: &str) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| format!("header '{input}' must be provided as name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name cannot be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Classify an HTTP response into a CLI error.
pub(crate) async fn classify_problem(response: reqwest::Response) -> CliError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await.unwrap_or_default();

    let body_text = String::from_utf8_lossy(&bytes).to_string();
    let problem = serde_json::from_slice::<ProblemDetails>(&bytes).ok();

    let message = problem
        .as_ref()
        .and_then(|p| p.detail.clone())
        .unwrap_or_else(|| {
            problem
                .as_ref()
                .map_or_else(|| body_text.trim().to_string(), |p| p.title.clone())
        });

    if matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
    ) {
        CliError::validation(message)
    } else {
        let mut detail = if let Some(problem) = problem {
            format!("{} (status {})", message, problem.status)
        } else if !body_text.is_empty() {
            format!("{message} (status {status})")
        } else {
            format!("request failed with status {status}")
        };
        if let Some(seconds) = retry_after {
            detail.push_str(&format!("; retry after {seconds}s"));
        }
        CliError::failure(anyhow!(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use httpmock::prelude::*;

    fn context(base: &str) -> Result<AppContext> {
        Ok(AppContext {
            client: Client::new(),
            base_url: base.parse()?,
            token: Some("secret-token".to_string()),
        })
    }

    #[test]
    fn endpoint_keeps_the_api_prefix() -> Result<()> {
        let ctx = context("http://localhost:8000/v1")?;
        assert_eq!(
            ctx.endpoint("requests")?.as_str(),
            "http://localhost:8000/v1/requests"
        );
        let ctx = context("http://localhost:8000/v1/")?;
        assert_eq!(
            ctx.endpoint("/health")?.as_str(),
            "http://localhost:8000/v1/health"
        );
        Ok(())
    }

    #[test]
    fn header_arguments_split_on_the_first_equals() {
        assert_eq!(
            parse_header("Accept=text/html"),
            Ok(("Accept".to_string(), "text/html".to_string()))
        );
        assert_eq!(
            parse_header("X-Query=a=b"),
            Ok(("X-Query".to_string(), "a=b".to_string()))
        );
        assert!(parse_header("missing").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(CliError::validation("bad").exit_code(), 2);
        assert_eq!(CliError::failure(anyhow!("down")).exit_code(), 3);
    }

    #[tokio::test]
    async fn problems_surface_detail_and_retry_after() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/v1/limited");
            then.status(429)
                .header("content-type", "application/problem+json")
                .header("retry-after", "42")
                .json_body(serde_json::json!({
                    "type": "https://proxyseed.dev/problems/rate-limited",
                    "title": "rate limit exceeded",
                    "status": 429,
                    "detail": "Too many requests"
                }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/invalid");
            then.status(422).json_body(serde_json::json!({
                "type": "https://proxyseed.dev/problems/validation",
                "title": "validation failed",
                "status": 422,
                "detail": "invalid url: scheme must be http or https"
            }));
        });

        let ctx = context(&server.url("/v1"))?;
        let limited = ctx
            .send(ctx.client.get(ctx.endpoint("limited")?), "/limited")
            .await;
        let Err(err) = limited else {
            return Err(anyhow!("expected rate limit failure"));
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.display_message(),
            "Too many requests (status 429); retry after 42s"
        );

        let invalid = ctx
            .send(ctx.client.get(ctx.endpoint("invalid")?), "/invalid")
            .await;
        let Err(err) = invalid else {
            return Err(anyhow!("expected validation failure"));
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.display_message(), "invalid url: scheme must be http or https");
        Ok(())
    }
}
