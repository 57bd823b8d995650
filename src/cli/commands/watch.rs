//! Watch command implementation
//!
//! Builds once, then rebuilds whenever the watched paths settle after a change.
//! Ctrl-C stops scheduling; a rebuild in progress is allowed to finish.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{build, CommandContext};
use crate::core::pipeline::BuildRequest;
use crate::core::watch::{run_watch_loop, WatchOptions};
use crate::infra::watcher::{FsWatcher, IgnoreRules};

/// Execute `kiln watch`
pub async fn execute(ctx: &CommandContext, dev: bool) -> Result<()> {
    let pipeline = ctx.pipeline()?;
    let config = pipeline.config();

    let paths: Vec<PathBuf> = config
        .watch_paths()
        .iter()
        .map(|p| ctx.project_dir.join(p))
        .collect();
    let rules = IgnoreRules::new(&ctx.project_dir, &config.generated_paths());
    let (_watcher, events) =
        FsWatcher::start(&paths, rules).context("Failed to start file watcher")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received");
                cancel.cancel();
            }
        }
    });

    let options = WatchOptions {
        debounce: Duration::from_millis(config.watch.debounce_ms),
        initial_run: true,
    };
    ctx.output.info(&format!(
        "Watching {} for changes (Ctrl-C to stop)",
        paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let request = BuildRequest::full(dev);
    let pipeline = &pipeline;
    let outcome = run_watch_loop(events, options, cancel, move || {
        build::run_reported(ctx, pipeline, request)
    })
    .await;

    tracing::info!(runs = outcome.runs, failures = outcome.failures, "watch finished");
    ctx.output.info(&format!(
        "Stopped after {} build(s), {} failed",
        outcome.runs, outcome.failures
    ));
    Ok(())
}
