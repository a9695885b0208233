//! Argument parsing and command dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use proxyseed_core::HttpMethod;
use reqwest::Url;
use uuid::Uuid;

use crate::client::{AppContext, CliResult, build_client, parse_header, parse_url};
use crate::commands::health::handle_health;
use crate::commands::requests::{
    handle_cancel, handle_download, handle_magnet, handle_status, handle_submit,
};

const DEFAULT_API_URL: &str = "http://localhost:8000/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_SECS: u64 = 2;
const DEFAULT_WAIT_SECS: u64 = 300;

/// Parses CLI arguments and executes the requested command. Returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn execute(cli: Cli) -> CliResult<()> {
    let trace_id = Uuid::new_v4().to_string();
    let ctx = AppContext {
        client: build_client(cli.timeout, &trace_id)?,
        base_url: cli.api_url,
        token: cli.token.filter(|token| !token.trim().is_empty()),
    };
    dispatch(&ctx, cli.command, cli.output).await
}

pub(crate) async fn dispatch(
    ctx: &AppContext,
    command: Command,
    output: OutputFormat,
) -> CliResult<()> {
    match command {
        Command::Submit(args) => handle_submit(ctx, args, output).await,
        Command::Status(args) => handle_status(ctx, args, output).await,
        Command::Cancel(args) => handle_cancel(ctx, args).await,
        Command::Magnet(args) => handle_magnet(ctx, args, output).await,
        Command::Download(args) => handle_download(ctx, args).await,
        Command::Health => handle_health(ctx, output).await,
    }
}

#[derive(Parser)]
#[command(
    name = "proxyseed",
    about = "Submit URLs to a ProxySeed server and retrieve their torrents"
)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "PROXYSEED_API_URL",
        value_parser = parse_url,
        default_value = DEFAULT_API_URL
    )]
    pub(crate) api_url: Url,
    #[arg(long, global = true, env = "PROXYSEED_TOKEN", hide_env_values = true)]
    pub(crate) token: Option<String>,
    #[arg(
        long,
        global = true,
        env = "PROXYSEED_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub(crate) timeout: u64,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Json,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Queue a URL for fetching and packaging.
    Submit(SubmitArgs),
    /// Show the current state of a request.
    Status(RequestIdArgs),
    /// Cancel a request.
    Cancel(RequestIdArgs),
    /// Print the magnet link of a ready request.
    Magnet(RequestIdArgs),
    /// Save the .torrent file of a ready request.
    Download(DownloadArgs),
    /// Show server health.
    Health,
}

#[derive(Args)]
pub(crate) struct SubmitArgs {
    /// Absolute http(s) URL to fetch.
    pub(crate) url: String,
    #[arg(long, value_parser = parse_method, default_value = "GET")]
    pub(crate) method: HttpMethod,
    /// Upstream header as `name=value`; repeatable.
    #[arg(long = "header", value_parser = parse_header)]
    pub(crate) headers: Vec<(String, String)>,
    #[arg(long)]
    pub(crate) body: Option<String>,
    /// Cache lifetime in seconds.
    #[arg(long)]
    pub(crate) ttl: Option<u32>,
    /// Poll until the request reaches a terminal state.
    #[arg(long)]
    pub(crate) wait: bool,
    #[arg(long, default_value_t = DEFAULT_POLL_SECS)]
    pub(crate) poll_interval: u64,
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    pub(crate) wait_timeout: u64,
}

#[derive(Args)]
pub(crate) struct RequestIdArgs {
    pub(crate) id: Uuid,
}

#[derive(Args)]
pub(crate) struct DownloadArgs {
    pub(crate) id: Uuid,
    /// Destination file; defaults to `<infohash>.torrent` in the working directory.
    #[arg(long)]
    pub(crate) out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Table,
}

fn parse_method(input: &str) -> Result<HttpMethod, String> {
    input.parse()
}
