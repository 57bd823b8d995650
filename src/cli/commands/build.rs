//! Build, pack and export commands
//!
//! All three drive the same pipeline from different entry points.

use anyhow::Result;
use std::sync::Arc;

use super::CommandContext;
use crate::cli::output::{print_failure, print_report};
use crate::core::pipeline::{BuildRequest, EntryPoint, Pipeline, PipelineReport};
use crate::core::stage::StageName;

/// Execute `kiln build`, `kiln pack` or `kiln export`
pub async fn execute(ctx: &CommandContext, request: BuildRequest) -> Result<()> {
    let pipeline = ctx.pipeline()?;
    run_reported(ctx, &pipeline, request).await.map(|_| ())
}

/// Run the pipeline once with a spinner, printing the report or failure
pub async fn run_reported(
    ctx: &CommandContext,
    pipeline: &Pipeline,
    request: BuildRequest,
) -> Result<PipelineReport> {
    let verb = match request.entry {
        EntryPoint::Full => "Building",
        EntryPoint::PackOnly => "Packing",
        EntryPoint::ExportOnly => "Exporting",
    };
    tracing::info!(
        project = %pipeline.config().project.name,
        entry = ?request.entry,
        dev = request.dev,
        "starting pipeline"
    );

    let spinner = ctx
        .output
        .spinner(&format!("{verb} {}...", pipeline.config().project.name));
    let pipeline = match &spinner {
        Some(pb) => {
            let pb = pb.clone();
            pipeline.clone().with_observer(Arc::new(move |stage: StageName| {
                pb.set_message(format!("{stage}..."));
            }))
        }
        None => pipeline.clone(),
    };

    let result = pipeline.run(&request).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    match result {
        Ok(report) => {
            print_report(&ctx.output, &report)?;
            Ok(report)
        }
        Err(failure) => {
            print_failure(&ctx.output, &failure)?;
            Err(failure.into())
        }
    }
}
