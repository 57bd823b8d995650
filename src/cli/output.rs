//! Output formatting and progress indicators
//!
//! Human output goes to stdout with status symbols; `--json` replaces it
//! with one JSON document per command; `--quiet` leaves only errors.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::core::cache::format_size;
use crate::core::pipeline::{EntryPoint, PipelineFailure, PipelineReport};
use crate::core::stage::StageStatus;

/// Output preferences from the global flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Only errors
    pub quiet: bool,
    /// Machine-readable output
    pub json: bool,
    /// Verbosity level
    pub verbose: u8,
}

impl OutputConfig {
    /// Create from the global flags
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Whether human-readable messages are printed
    pub fn is_human(&self) -> bool {
        !self.quiet && !self.json
    }

    /// Spinner for a long-running operation, unless output is suppressed
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        self.is_human().then(|| create_spinner(message))
    }

    /// Print a success line
    pub fn success(&self, message: &str) {
        if self.is_human() {
            println!("{} {message}", status::SUCCESS);
        }
    }

    /// Print an informational line
    pub fn info(&self, message: &str) {
        if self.is_human() {
            println!("{message}");
        }
    }

    /// Print a warning to stderr
    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {message}", status::WARNING);
        }
    }

    /// Print a value as JSON on stdout
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Format milliseconds for display
#[allow(clippy::cast_precision_loss)]
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Print the summary of a successful pipeline run
pub fn print_report(output: &OutputConfig, report: &PipelineReport) -> anyhow::Result<()> {
    if output.json {
        return output.json(&serde_json::json!({
            "status": "ok",
            "report": report,
        }));
    }
    if output.quiet {
        return Ok(());
    }

    println!(
        "{} {} complete in {}",
        status::SUCCESS,
        entry_label(report.entry),
        format_duration(report.elapsed_ms)
    );
    match &report.fingerprint {
        Some(fp) => println!("  Dependencies: cache {:?} ({fp})", report.cache),
        None => println!("  Dependencies: skipped"),
    }
    for stage in &report.stages {
        let timing = match stage.status {
            StageStatus::Skipped => "skipped".to_string(),
            _ => format_duration(stage.duration_ms),
        };
        println!("  {:<22}{timing}", stage.name.as_str());
    }
    println!(
        "  Artifact: {} ({})",
        report.artifact.display(),
        format_size(report.artifact_size)
    );
    if output.verbose > 0 {
        let states: Vec<String> = report.states.iter().map(|s| format!("{s:?}")).collect();
        println!("  States: {}", states.join(" → "));
    }
    Ok(())
}

fn entry_label(entry: EntryPoint) -> &'static str {
    match entry {
        EntryPoint::Full => "Build",
        EntryPoint::PackOnly => "Pack",
        EntryPoint::ExportOnly => "Export",
    }
}

/// Print a failed pipeline run; the error itself goes through [`display_error`]
pub fn print_failure(output: &OutputConfig, failure: &PipelineFailure) -> anyhow::Result<()> {
    if output.json {
        return output.json(&serde_json::json!({
            "status": "failed",
            "stage": failure.stage,
            "exit_code": failure.exit_code(),
            "error": failure.source.to_string(),
            "states": failure.states,
            "stages": failure.stages,
        }));
    }
    if output.quiet {
        return Ok(());
    }
    if let Some(log) = failure.stages.last().and_then(|r| r.log.as_ref()) {
        eprintln!("  Full log: {}", log.display());
    }
    Ok(())
}

/// Display an error with its chain of causes
pub fn display_error(err: &anyhow::Error, output: &OutputConfig) {
    if output.json {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        eprintln!(
            "{}",
            serde_json::json!({ "error": err.to_string(), "causes": chain })
        );
        return;
    }

    eprintln!("{} {err}", status::ERROR);
    let mut previous = err.to_string();
    for cause in err.chain().skip(1) {
        let message = cause.to_string();
        // Wrapper errors often repeat their source verbatim
        if !previous.contains(&message) {
            eprintln!("  caused by: {message}");
        }
        previous = message;
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}
