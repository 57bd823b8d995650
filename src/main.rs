//! kiln - cached, staged builds
//!
//! Entry point for the kiln command-line application.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::cli::output::display_error;
use kiln::cli::Cli;
use kiln::core::pipeline::PipelineFailure;
use kiln::error::KilnError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = cli.output();
    if let Err(e) = cli.run().await {
        display_error(&e, &output);
        std::process::exit(exit_code(&e));
    }
}

/// Map an error chain to the process exit code
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<PipelineFailure>()
                .map(PipelineFailure::exit_code)
                .or_else(|| cause.downcast_ref::<KilnError>().map(KilnError::exit_code))
        })
        .unwrap_or(1)
}
