//! Output renderers and formatting helpers for CLI commands.

use anyhow::anyhow;
use proxyseed_api_models::{
    CreateRequestResponse, HealthResponse, MagnetLinkResponse, RequestStatusResponse,
};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

pub(crate) fn render_created(created: &CreateRequestResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(created)?,
        OutputFormat::Table => {
            println!("id: {}", created.id);
            println!("status: {}", created.status);
            if let Some(secs) = created.estimated_ready {
                println!("estimated ready: {secs}s");
            }
        }
    }
    Ok(())
}

pub(crate) fn render_status(status: &RequestStatusResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(status)?,
        OutputFormat::Table => {
            println!("id: {}", status.id);
            println!("status: {} ({}%)", status.status, status.progress);
            println!("url: {} {}", status.method, status.url);
            if let Some(infohash) = &status.infohash {
                println!("infohash: {infohash}");
            }
            if let Some(hash) = &status.content_hash {
                println!("content hash: {hash}");
            }
            if let Some(size) = status.content_size {
                println!(
                    "content: {} ({})",
                    format_bytes(size),
                    status.content_type.as_deref().unwrap_or("unknown type")
                );
            }
            if let Some(message) = &status.error_message {
                println!("error: {message}");
            }
            println!("created: {}", status.created_at);
            println!("updated: {}", status.updated_at);
            if let Some(completed) = status.completed_at {
                println!("completed: {completed}");
            }
        }
    }
    Ok(())
}

pub(crate) fn render_magnet(magnet: &MagnetLinkResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(magnet)?,
        OutputFormat::Table => println!("{}", magnet.magnet_link),
    }
    Ok(())
}

pub(crate) fn render_health(health: &HealthResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(health)?,
        OutputFormat::Table => {
            println!(
                "status: {} (version {}, up {:.0}s)",
                health.status, health.version, health.uptime
            );
            for (name, check) in &health.checks {
                println!("  {name:<14} {}", check.status);
            }
        }
    }
    Ok(())
}

#[must_use]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}
