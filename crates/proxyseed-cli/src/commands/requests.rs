//! Handlers for the request lifecycle commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use proxyseed_api_models::{
    CreateRequestPayload, CreateRequestResponse, MagnetLinkResponse, RequestStatusResponse,
};
use proxyseed_core::RequestStatus;
use reqwest::header::CONTENT_DISPOSITION;
use serde::de::DeserializeOwned;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::cli::{DownloadArgs, OutputFormat, RequestIdArgs, SubmitArgs};
use crate::client::{AppContext, CliError, CliResult};
use crate::output::{render_created, render_magnet, render_status};

pub(crate) async fn handle_submit(
    ctx: &AppContext,
    args: SubmitArgs,
    output: OutputFormat,
) -> CliResult<()> {
    let url = args.url.trim().to_string();
    if url.is_empty() {
        return Err(CliError::validation("url must not be empty"));
    }
    let payload = CreateRequestPayload {
        url,
        method: args.method,
        headers: (!args.headers.is_empty()).then(|| args.headers.into_iter().collect()),
        body: args.body,
        ttl: args.ttl,
    };

    let path = "requests";
    let response = ctx
        .send(ctx.client.post(ctx.endpoint(path)?).json(&payload), path)
        .await?;
    let created: CreateRequestResponse = decode(response, path).await?;
    if !args.wait {
        return render_created(&created, output);
    }

    let status = wait_for_terminal(
        ctx,
        created.id,
        Duration::from_secs(args.poll_interval.max(1)),
        Duration::from_secs(args.wait_timeout),
    )
    .await?;
    render_status(&status, output)?;
    match status.status {
        RequestStatus::Ready => Ok(()),
        RequestStatus::Cancelled => Err(CliError::failure(anyhow!(
            "request {} was cancelled",
            status.id
        ))),
        _ => Err(CliError::failure(anyhow!(
            "request {} failed: {}",
            status.id,
            status.error_message.as_deref().unwrap_or("no error recorded")
        ))),
    }
}

pub(crate) async fn handle_status(
    ctx: &AppContext,
    args: RequestIdArgs,
    output: OutputFormat,
) -> CliResult<()> {
    let status = fetch_status(ctx, args.id).await?;
    render_status(&status, output)
}

pub(crate) async fn handle_cancel(ctx: &AppContext, args: RequestIdArgs) -> CliResult<()> {
    let path = format!("requests/{}", args.id);
    ctx.send(ctx.client.delete(ctx.endpoint(&path)?), &path)
        .await?;
    println!("Cancellation requested (id: {})", args.id);
    Ok(())
}

pub(crate) async fn handle_magnet(
    ctx: &AppContext,
    args: RequestIdArgs,
    output: OutputFormat,
) -> CliResult<()> {
    let path = format!("requests/{}/magnet", args.id);
    let response = ctx.send(ctx.client.get(ctx.endpoint(&path)?), &path).await?;
    let magnet: MagnetLinkResponse = decode(response, &path).await?;
    render_magnet(&magnet, output)
}

pub(crate) async fn handle_download(ctx: &AppContext, args: DownloadArgs) -> CliResult<()> {
    let path = format!("requests/{}/torrent", args.id);
    let response = ctx.send(ctx.client.get(ctx.endpoint(&path)?), &path).await?;
    let destination = args.out.unwrap_or_else(|| {
        let name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| format!("{}.torrent", args.id));
        PathBuf::from(name)
    });
    let bytes = response
        .bytes()
        .await
        .map_err(|err| CliError::failure(anyhow!("failed to read torrent body: {err}")))?;
    tokio::fs::write(&destination, &bytes).await.map_err(|err| {
        CliError::failure(anyhow!(
            "failed to write torrent file '{}': {err}",
            destination.display()
        ))
    })?;
    println!(
        "Saved torrent to {} ({} bytes)",
        destination.display(),
        bytes.len()
    );
    Ok(())
}

async fn fetch_status(ctx: &AppContext, id: Uuid) -> CliResult<RequestStatusResponse> {
    let path = format!("requests/{id}");
    let response = ctx.send(ctx.client.get(ctx.endpoint(&path)?), &path).await?;
    decode(response, &path).await
}

async fn wait_for_terminal(
    ctx: &AppContext,
    id: Uuid,
    poll_interval: Duration,
    wait_timeout: Duration,
) -> CliResult<RequestStatusResponse> {
    let deadline = Instant::now() + wait_timeout;
    loop {
        let status = fetch_status(ctx, id).await?;
        if status.status.is_terminal() {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            return Err(CliError::failure(anyhow!(
                "request {id} still {} after {}s",
                status.status,
                wait_timeout.as_secs()
            )));
        }
        sleep(poll_interval).await;
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> CliResult<T> {
    response.json::<T>().await.map_err(|err| {
        CliError::failure(anyhow!("failed to decode response from {path}: {err}"))
    })
}

fn attachment_filename(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("filename="))
        .map(|name| name.trim_matches('"'))
        .find(|name| !name.is_empty() && !name.contains(['/', '\\']))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    const ID: &str = "5f0c7a4e-1c53-4b7a-9a3b-2f4a1f0a9c11";

    fn context(server: &MockServer) -> Result<AppContext> {
        Ok(AppContext {
            client: Client::new(),
            base_url: server.url("/v1").parse()?,
            token: Some("secret-token".to_string()),
        })
    }

    fn status_body(status: &str) -> Value {
        let error_message = if status == "error" {
            json!("Fetch error: boom")
        } else {
            Value::Null
        };
        json!({
            "id": ID,
            "status": status,
            "url": "https://origin.test/page",
            "method": "GET",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:05Z",
            "completed_at": null,
            "infohash": null,
            "content_hash": null,
            "content_size": null,
            "content_type": null,
            "error_message": error_message,
            "progress": 10
        })
    }

    fn submit_args(wait: bool) -> SubmitArgs {
        SubmitArgs {
            url: "https://origin.test/page".to_string(),
            method: proxyseed_core::HttpMethod::Get,
            headers: vec![("Accept".to_string(), "text/html".to_string())],
            body: None,
            ttl: Some(120),
            wait,
            poll_interval: 1,
            wait_timeout: 5,
        }
    }

    #[test]
    fn attachment_names_are_extracted() {
        assert_eq!(
            attachment_filename("attachment; filename=\"abc.torrent\""),
            Some("abc.torrent".to_string())
        );
        assert_eq!(attachment_filename("attachment; filename=\"../x\""), None);
        assert_eq!(attachment_filename("inline"), None);
    }

    #[tokio::test]
    async fn submit_posts_payload_with_bearer_token() -> Result<()> {
        let server = MockServer::start_async().await;
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/requests")
                .header("authorization", "Bearer secret-token")
                .json_body(json!({
                    "url": "https://origin.test/page",
                    "method": "GET",
                    "headers": {"Accept": "text/html"},
                    "ttl": 120
                }));
            then.status(201).json_body(json!({
                "id": ID,
                "status": "queued",
                "estimated_ready": 60,
                "created_at": "2026-01-01T00:00:00Z"
            }));
        });

        let ctx = context(&server)?;
        handle_submit(&ctx, submit_args(false), OutputFormat::Json).await?;
        create.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn submit_wait_reports_failed_requests() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/v1/requests");
            then.status(201).json_body(json!({
                "id": ID,
                "status": "queued",
                "estimated_ready": 60,
                "created_at": "2026-01-01T00:00:00Z"
            }));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path(format!("/v1/requests/{ID}"));
            then.status(200).json_body(status_body("error"));
        });

        let ctx = context(&server)?;
        let result = handle_submit(&ctx, submit_args(true), OutputFormat::Table).await;
        let Err(err) = result else {
            return Err(anyhow::anyhow!("expected a failed request"));
        };
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("Fetch error: boom"));
        poll.assert_calls_async(1).await;
        Ok(())
    }

    #[tokio::test]
    async fn not_ready_magnet_is_a_validation_error() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(format!("/v1/requests/{ID}/magnet"));
            then.status(400).json_body(json!({
                "type": "https://proxyseed.dev/problems/bad-request",
                "title": "bad request",
                "status": 400,
                "detail": "Request not ready (status: fetching)"
            }));
        });

        let ctx = context(&server)?;
        let result = handle_magnet(&ctx, RequestIdArgs { id: ID.parse()? }, OutputFormat::Json).await;
        let Err(err) = result else {
            return Err(anyhow::anyhow!("expected a validation error"));
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.display_message(), "Request not ready (status: fetching)");
        Ok(())
    }

    #[tokio::test]
    async fn cancel_sends_delete() -> Result<()> {
        let server = MockServer::start_async().await;
        let delete = server.mock(|when, then| {
            when.method(DELETE).path(format!("/v1/requests/{ID}"));
            then.status(204);
        });

        let ctx = context(&server)?;
        handle_cancel(&ctx, RequestIdArgs { id: ID.parse()? }).await?;
        delete.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn download_writes_the_torrent_file() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(format!("/v1/requests/{ID}/torrent"));
            then.status(200)
                .header("content-type", "application/x-bittorrent")
                .header("content-disposition", "attachment; filename=\"abc.torrent\"")
                .body("d4:infod6:lengthi1eee");
        });

        let dir = TempDir::new()?;
        let out = dir.path().join("saved.torrent");
        let ctx = context(&server)?;
        handle_download(
            &ctx,
            DownloadArgs {
                id: ID.parse()?,
                out: Some(out.clone()),
            },
        )
        .await?;
        assert_eq!(std::fs::read(&out)?, b"d4:infod6:lengthi1eee");
        Ok(())
    }
}
