//! Stage definitions
//!
//! A stage is data: a name, an action (external command or in-process
//! function), a timeout and optional input/output paths relative to the
//! build workspace. The orchestrator never branches on what a command does.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::project::StageConfig;

/// Names of the pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Lock and populate the build workspace
    PrepareWorkspace,
    /// Restore dependencies from cache or run the installer
    ResolveDependencies,
    /// Run the source compiler
    Compile,
    /// Run the packager
    Pack,
    /// Publish the bundle into the export directory
    Export,
}

impl StageName {
    /// All stages in execution order
    pub const ALL: [StageName; 5] = [
        Self::PrepareWorkspace,
        Self::ResolveDependencies,
        Self::Compile,
        Self::Pack,
        Self::Export,
    ];

    /// Stable kebab-case name, also used for log file names
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrepareWorkspace => "prepare-workspace",
            Self::ResolveDependencies => "resolve-dependencies",
            Self::Compile => "compile",
            Self::Pack => "pack",
            Self::Export => "export",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Program name or path
    pub program: String,
    /// Arguments passed on every run
    pub args: Vec<String>,
    /// Arguments appended in development mode
    pub dev_args: Vec<String>,
}

impl StageCommand {
    /// Build from an argv-style list; `None` if the list is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            dev_args: Vec::new(),
        })
    }

    /// Set development-mode arguments
    #[must_use]
    pub fn with_dev_args(mut self, dev_args: Vec<String>) -> Self {
        self.dev_args = dev_args;
        self
    }

    /// Arguments for a run in the given mode
    pub fn args_for(&self, dev: bool) -> Vec<String> {
        let mut args = self.args.clone();
        if dev {
            args.extend(self.dev_args.iter().cloned());
        }
        args
    }
}

/// What an in-process stage sees when it runs
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Build workspace root
    pub workspace: PathBuf,
    /// Absolute declared input, if any
    pub input: Option<PathBuf>,
    /// Absolute declared output, if any
    pub output: Option<PathBuf>,
    /// Development mode
    pub dev: bool,
}

/// In-process stage body
pub type StageFn = Arc<dyn Fn(&StageContext) -> Result<(), String> + Send + Sync>;

/// What a stage does when it runs
#[derive(Clone)]
pub enum StageAction {
    /// Spawn an external process
    Command(StageCommand),
    /// Call a function on a blocking thread
    InProcess(StageFn),
}

impl std::fmt::Debug for StageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Self::InProcess(_) => f.write_str("InProcess"),
        }
    }
}

/// A single unit of pipeline work
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage name
    pub name: StageName,
    /// What to execute
    pub action: StageAction,
    /// Hard limit on execution time
    pub timeout: Duration,
    /// Input path, relative to the workspace
    pub input: Option<PathBuf>,
    /// Output path, relative to the workspace
    pub output: Option<PathBuf>,
}

impl Stage {
    /// Create a stage running an external command
    pub fn command(name: StageName, command: StageCommand, timeout: Duration) -> Self {
        Self {
            name,
            action: StageAction::Command(command),
            timeout,
            input: None,
            output: None,
        }
    }

    /// Create a stage running an in-process function
    pub fn in_process<F>(name: StageName, timeout: Duration, f: F) -> Self
    where
        F: Fn(&StageContext) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name,
            action: StageAction::InProcess(Arc::new(f)),
            timeout,
            input: None,
            output: None,
        }
    }

    /// Build a command stage from its `kiln.toml` section.
    ///
    /// Returns `None` when the configured command is empty.
    pub fn from_config(name: StageName, config: &StageConfig) -> Option<Self> {
        let command =
            StageCommand::from_argv(&config.command)?.with_dev_args(config.dev_args.clone());
        Some(
            Self::command(name, command, Duration::from_secs(config.timeout_secs))
                .with_input(config.input.clone())
                .with_output(Some(config.output.clone())),
        )
    }

    /// Set the declared input
    #[must_use]
    pub fn with_input(mut self, input: Option<PathBuf>) -> Self {
        self.input = input;
        self
    }

    /// Set the declared output
    #[must_use]
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    /// Resolve the declared input and output against a workspace
    pub fn context(&self, workspace: &Path, dev: bool) -> StageContext {
        StageContext {
            workspace: workspace.to_path_buf(),
            input: self.input.as_ref().map(|p| workspace.join(p)),
            output: self.output.as_ref().map(|p| workspace.join(p)),
            dev,
        }
    }
}

/// Outcome of one stage in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Ran and succeeded
    Succeeded,
    /// Ran and failed (or timed out)
    Failed,
    /// Not executed for this entry point
    Skipped,
}

/// Record of a stage execution within a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    /// Stage name
    pub name: StageName,
    /// Status
    pub status: StageStatus,
    /// Start time relative to the beginning of the run
    pub started_after_ms: u64,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Exit code of the external process, if any
    pub exit_code: Option<i32>,
    /// Bounded tail of the captured output
    pub output: String,
    /// Full log file, if one was written
    pub log: Option<PathBuf>,
}

impl StageRecord {
    /// A record for a stage that was not executed
    pub fn skipped(name: StageName, started_after: Duration) -> Self {
        Self {
            name,
            status: StageStatus::Skipped,
            started_after_ms: millis(started_after),
            duration_ms: 0,
            exit_code: None,
            output: String::new(),
            log: None,
        }
    }

    /// A record for a stage that failed
    pub fn failed(name: StageName, started_after: Duration, duration: Duration) -> Self {
        Self {
            name,
            status: StageStatus::Failed,
            started_after_ms: millis(started_after),
            duration_ms: millis(duration),
            exit_code: None,
            output: String::new(),
            log: None,
        }
    }

    /// Duration as a [`Duration`]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Saturating conversion to whole milliseconds
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
