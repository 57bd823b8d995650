//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod cache;
pub mod clean;
pub mod init;
pub mod serve;
pub mod watch;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::output::OutputConfig;
use crate::core::global_config::GlobalConfig;
use crate::core::pipeline::{BuildRequest, EntryPoint, Pipeline};
use crate::core::project::ProjectConfig;
use crate::error::KilnError;
use crate::infra::dirs::KilnDirs;
use crate::infra::port::ScanDirection;

/// Everything a command needs from the global flags
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Project root
    pub project_dir: PathBuf,
    /// Scratch root from `--scratch-dir` / `KILN_SCRATCH_DIR`
    pub scratch_dir: Option<PathBuf>,
    /// Output preferences
    pub output: OutputConfig,
}

impl CommandContext {
    /// Load `kiln.toml` from the project directory
    pub fn load_project(&self) -> Result<ProjectConfig> {
        ProjectConfig::load(&self.project_dir)
            .map_err(KilnError::from)
            .with_context(|| format!("Failed to load project in {}", self.project_dir.display()))
    }

    /// Load the user-level configuration
    pub fn load_global(&self) -> Result<GlobalConfig> {
        GlobalConfig::load(&KilnDirs::new())
            .map_err(KilnError::from)
            .context("Failed to load global configuration")
    }

    /// Effective scratch root
    pub fn scratch_root(&self, global: &GlobalConfig) -> PathBuf {
        KilnDirs::scratch_dir(self.scratch_dir.as_deref(), global.scratch.dir.as_deref())
    }

    /// Pipeline for the current project
    pub fn pipeline(&self) -> Result<Pipeline> {
        let config = self.load_project()?;
        let global = self.load_global()?;
        let scratch = self.scratch_root(&global);
        tracing::debug!(scratch = %scratch.display(), "resolved scratch root");
        Ok(Pipeline::new(&self.project_dir, config, scratch)
            .with_cache_max_age(global.cache_max_age()))
    }
}

/// Port scan direction on the command line
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DirectionArg {
    Ascending,
    Descending,
}

impl From<DirectionArg> for ScanDirection {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Ascending => Self::Ascending,
            DirectionArg::Descending => Self::Descending,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline: dependencies, compile, pack, export
    Build {
        /// Development mode (adds each stage's dev_args)
        #[arg(long)]
        dev: bool,
    },

    /// Build, then rebuild whenever sources change
    Watch {
        /// Development mode (adds each stage's dev_args)
        #[arg(long)]
        dev: bool,
    },

    /// Pack and export the last compile output
    Pack {
        /// Development mode (adds each stage's dev_args)
        #[arg(long)]
        dev: bool,
    },

    /// Export the last pack output
    Export,

    /// Start the dev server on a free port
    Serve,

    /// Print the first free port for the dev server
    Port {
        /// First port to try (defaults to [serve] port)
        #[arg(long)]
        start: Option<u16>,

        /// Scan direction (defaults to [serve] direction)
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,

        /// Number of ports to try (defaults to [serve] count)
        #[arg(long)]
        count: Option<u16>,
    },

    /// Create a kiln.toml in the project directory
    Init {
        /// Project name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Overwrite an existing kiln.toml
        #[arg(short, long)]
        force: bool,
    },

    /// Remove promoted artifacts, logs and the export directory
    Clean,

    /// Manage the dependency cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show this project's cache entries
    Info,

    /// Remove all of this project's cache entries
    Clean,

    /// Remove entries older than the given age
    Evict {
        /// Age threshold in days
        #[arg(long, value_name = "DAYS")]
        older_than_days: u64,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        match self {
            Self::Build { dev } => build::execute(ctx, BuildRequest::full(dev)).await,
            Self::Pack { dev } => {
                build::execute(
                    ctx,
                    BuildRequest {
                        entry: EntryPoint::PackOnly,
                        dev,
                    },
                )
                .await
            }
            Self::Export => {
                build::execute(
                    ctx,
                    BuildRequest {
                        entry: EntryPoint::ExportOnly,
                        dev: false,
                    },
                )
                .await
            }
            Self::Watch { dev } => watch::execute(ctx, dev).await,
            Self::Serve => serve::execute(ctx).await,
            Self::Port {
                start,
                direction,
                count,
            } => serve::execute_port(ctx, start, direction.map(Into::into), count),
            Self::Init { name, force } => init::execute(ctx, name, force),
            Self::Clean => clean::execute(ctx),
            Self::Cache { command } => match command {
                CacheCommands::Info => cache::execute_info(ctx),
                CacheCommands::Clean => cache::execute_clean(ctx),
                CacheCommands::Evict { older_than_days } => {
                    cache::execute_evict(ctx, older_than_days)
                }
            },
        }
    }
}
