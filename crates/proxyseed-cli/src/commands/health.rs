//! Server health command.

use anyhow::anyhow;
use proxyseed_api_models::HealthResponse;

use crate::cli::OutputFormat;
use crate::client::{AppContext, CliError, CliResult};
use crate::output::render_health;

pub(crate) async fn handle_health(ctx: &AppContext, output: OutputFormat) -> CliResult<()> {
    let path = "health";
    let response = ctx.send(ctx.client.get(ctx.endpoint(path)?), path).await?;
    let health: HealthResponse = response
        .json()
        .await
        .map_err(|err| CliError::failure(anyhow!("failed to decode health response: {err}")))?;
    render_health(&health, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;

    #[tokio::test]
    async fn health_is_fetched_under_the_prefix() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/health");
            then.status(200).json_body(json!({
                "status": "degraded",
                "version": "0.1.0",
                "uptime": 12.5,
                "checks": {
                    "storage": {"status": "healthy"},
                    "task_queue": {"status": "degraded", "queue_size": 8, "capacity": 8}
                }
            }));
        });

        let ctx = AppContext {
            client: Client::new(),
            base_url: server.url("/v1").parse()?,
            token: None,
        };
        handle_health(&ctx, OutputFormat::Table).await?;
        mock.assert_async().await;
        Ok(())
    }
}
