//! Project file (kiln.toml) parsing and validation
//!
//! The project file declares which manifests key the dependency cache, the
//! commands for each stage and the paths they read and write.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::config::defaults;
use crate::error::ConfigError;
use crate::infra::port::ScanDirection;

/// Project file name
pub const PROJECT_FILE: &str = "kiln.toml";

/// The project file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project-level settings
    pub project: ProjectSection,

    /// Dependency installation
    pub dependencies: DependenciesConfig,

    /// Compile and pack stages
    pub stages: StagesConfig,

    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Dev server settings
    #[serde(default)]
    pub serve: ServeConfig,
}

/// `[project]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSection {
    /// Project identifier, used in scratch directory names
    pub name: String,

    /// Source tree copied into the workspace, relative to the project root
    #[serde(default = "default_source")]
    pub source: PathBuf,

    /// Manifest files whose contents key the dependency cache
    pub manifests: Vec<PathBuf>,

    /// Paths excluded from the workspace copy and from watching,
    /// relative to the project root
    #[serde(default)]
    pub exclude: Vec<PathBuf>,

    /// Directory for promoted artifacts and logs
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Where the final bundle is published
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

fn default_source() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(defaults::STATE_DIR)
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(defaults::EXPORT_DIR)
}

/// `[dependencies]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependenciesConfig {
    /// Directory the installer produces, relative to the workspace root
    #[serde(default = "default_dependencies_dir")]
    pub dir: PathBuf,

    /// Installer command
    pub command: Vec<String>,

    /// Installer timeout
    #[serde(default = "default_install_timeout")]
    pub timeout_secs: u64,
}

fn default_dependencies_dir() -> PathBuf {
    PathBuf::from(defaults::DEPENDENCIES_DIR)
}

fn default_install_timeout() -> u64 {
    defaults::INSTALL_TIMEOUT_SECS
}

/// `[stages]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagesConfig {
    /// Compiler stage
    pub compile: StageConfig,

    /// Packager stage
    pub pack: StageConfig,
}

/// A single command stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    /// Command line
    pub command: Vec<String>,

    /// Extra arguments in development mode
    #[serde(default)]
    pub dev_args: Vec<String>,

    /// Input path inside the workspace
    #[serde(default)]
    pub input: Option<PathBuf>,

    /// Output path inside the workspace
    pub output: PathBuf,

    /// Stage timeout
    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,
}

fn default_stage_timeout() -> u64 {
    defaults::STAGE_TIMEOUT_SECS
}

/// `[watch]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Paths to observe; empty means the project source
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Trailing debounce window
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    defaults::DEBOUNCE_MS
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// `[serve]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServeConfig {
    /// Preferred first port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Scan direction from the preferred port
    #[serde(default)]
    pub direction: ScanDirection,

    /// Number of ports to try
    #[serde(default = "default_port_count")]
    pub count: u16,

    /// Address to check for free ports
    #[serde(default = "default_host")]
    pub host: String,

    /// Dev server command; `{port}` is replaced with the selected port
    #[serde(default)]
    pub command: Vec<String>,
}

fn default_port() -> u16 {
    defaults::SERVE_PORT
}

fn default_port_count() -> u16 {
    defaults::SERVE_PORT_COUNT
}

fn default_host() -> String {
    defaults::SERVE_HOST.to_string()
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            direction: ScanDirection::default(),
            count: default_port_count(),
            host: default_host(),
            command: Vec::new(),
        }
    }
}

impl ProjectConfig {
    /// Load and validate `kiln.toml` from a project directory
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = project_dir.join(PROJECT_FILE);
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            error: e.to_string(),
        })?;

        let config = Self::from_toml(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check the invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.project.name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return invalid(format!(
                "project name '{name}' must be non-empty and contain only ASCII letters, digits, '-', '_' or '.'"
            ));
        }

        if self.project.manifests.is_empty() {
            return invalid("at least one manifest must be declared".to_string());
        }

        for (what, command) in [
            ("dependencies.command", &self.dependencies.command),
            ("stages.compile.command", &self.stages.compile.command),
            ("stages.pack.command", &self.stages.pack.command),
        ] {
            if command.is_empty() {
                return invalid(format!("{what} must not be empty"));
            }
        }

        let mut paths: Vec<(&str, &Path)> = vec![
            ("project.source", self.project.source.as_path()),
            ("project.state_dir", self.project.state_dir.as_path()),
            ("project.export_dir", self.project.export_dir.as_path()),
            ("dependencies.dir", self.dependencies.dir.as_path()),
            ("stages.compile.output", self.stages.compile.output.as_path()),
            ("stages.pack.output", self.stages.pack.output.as_path()),
        ];
        paths.extend(self.project.manifests.iter().map(|p| ("project.manifests", p.as_path())));
        paths.extend(self.project.exclude.iter().map(|p| ("project.exclude", p.as_path())));
        paths.extend(self.watch.paths.iter().map(|p| ("watch.paths", p.as_path())));
        if let Some(input) = &self.stages.compile.input {
            paths.push(("stages.compile.input", input.as_path()));
        }
        if let Some(input) = &self.stages.pack.input {
            paths.push(("stages.pack.input", input.as_path()));
        }

        for (what, path) in paths {
            if !is_contained_relative(path) {
                return invalid(format!(
                    "{what} '{}' must be a relative path inside the project",
                    path.display()
                ));
            }
        }

        for (what, output) in [
            ("stages.compile.output", &self.stages.compile.output),
            ("stages.pack.output", &self.stages.pack.output),
            ("dependencies.dir", &self.dependencies.dir),
        ] {
            if output.file_name().is_none() {
                return invalid(format!("{what} must name a file or directory"));
            }
        }

        Ok(())
    }

    /// Absolute manifest paths, in declared order
    pub fn manifest_paths(&self, project_dir: &Path) -> Vec<PathBuf> {
        self.project
            .manifests
            .iter()
            .map(|m| project_dir.join(m))
            .collect()
    }

    /// Input of the pack stage; defaults to the compile output
    pub fn pack_input(&self) -> PathBuf {
        self.stages
            .pack
            .input
            .clone()
            .unwrap_or_else(|| self.stages.compile.output.clone())
    }

    /// Paths to observe in watch mode, relative to the project root
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        if self.watch.paths.is_empty() {
            vec![self.project.source.clone()]
        } else {
            self.watch.paths.clone()
        }
    }

    /// Project-relative paths that never count as sources
    pub fn generated_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.project.state_dir.clone(),
            self.project.export_dir.clone(),
            self.dependencies.dir.clone(),
        ];
        paths.extend(self.project.exclude.iter().cloned());
        paths
    }
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid { message })
}

/// Relative, no `..`, no root or prefix
fn is_contained_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
