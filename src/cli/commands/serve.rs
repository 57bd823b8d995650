//! Dev server commands
//!
//! `kiln port` prints the port the dev server would use; `kiln serve` picks
//! it and runs the configured `[serve] command` in the foreground.

use anyhow::{bail, Context, Result};
use tokio::process::Command;

use super::CommandContext;
use crate::core::project::ServeConfig;
use crate::error::{ConfigError, KilnError};
use crate::infra::port::{select_port, ScanDirection};

/// Placeholder in `[serve] command` replaced with the selected port
const PORT_PLACEHOLDER: &str = "{port}";

/// Execute `kiln port`
pub fn execute_port(
    ctx: &CommandContext,
    start: Option<u16>,
    direction: Option<ScanDirection>,
    count: Option<u16>,
) -> Result<()> {
    let config = ctx.load_project()?;
    let serve = ServeConfig {
        port: start.unwrap_or(config.serve.port),
        direction: direction.unwrap_or(config.serve.direction),
        count: count.unwrap_or(config.serve.count),
        ..config.serve
    };

    let port = pick(&serve)?;
    if ctx.output.json {
        ctx.output.json(&serde_json::json!({
            "host": serve.host,
            "port": port,
        }))?;
    } else if !ctx.output.quiet {
        println!("{port}");
    }
    Ok(())
}

/// Execute `kiln serve`
pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_project()?;
    let serve = &config.serve;
    if serve.command.is_empty() {
        return Err(KilnError::from(ConfigError::Invalid {
            message: "[serve] command is not set".to_string(),
        })
        .into());
    }

    let port = pick(serve)?;
    let argv = with_port(&serve.command, port);
    let Some((program, args)) = argv.split_first() else {
        bail!("[serve] command is empty");
    };

    ctx.output.success(&format!("Serving on http://{}:{port}", serve.host));
    tracing::info!(port, program = %program, "starting dev server");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&ctx.project_dir)
        .env("KILN_PORT", port.to_string())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start dev server '{program}'"))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for dev server")?;
            if !status.success() {
                bail!("Dev server exited with {status}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("interrupt received, stopping dev server");
            child.kill().await.context("Failed to stop dev server")?;
        }
    }
    Ok(())
}

fn pick(serve: &ServeConfig) -> Result<u16> {
    let port = select_port(&serve.host, serve.port, serve.direction, serve.count)
        .map_err(KilnError::from)?;
    Ok(port)
}

/// Replace the port placeholder in every argument
fn with_port(command: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    command
        .iter()
        .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
        .collect()
}
