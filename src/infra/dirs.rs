//! Platform-specific directory management
//!
//! Resolves the user configuration directory and the scratch root under
//! which build workspaces and dependency cache entries live.
//!
//! Environment variables can override default directories:
//! - `KILN_SCRATCH_DIR` - Override scratch root
//! - `KILN_CONFIG_DIR` - Override config directory

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable names for directory overrides
pub const ENV_SCRATCH_DIR: &str = "KILN_SCRATCH_DIR";
pub const ENV_CONFIG_DIR: &str = "KILN_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "kiln";

/// Directory provider for kiln
#[derive(Debug, Clone)]
pub struct KilnDirs {
    config_dir: PathBuf,
}

impl KilnDirs {
    /// Create a new `KilnDirs` instance
    ///
    /// Checks environment variables first, then falls back to platform defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Use an explicit config directory
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Get the config directory path
    ///
    /// - Linux: `$XDG_CONFIG_HOME/kiln` or `~/.config/kiln`
    /// - macOS: `~/Library/Application Support/kiln`
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Resolve the scratch root.
    ///
    /// Precedence: explicit override (the `--scratch-dir` flag, which clap
    /// already fills from `KILN_SCRATCH_DIR`), then the environment, then
    /// the global config, then the system temporary directory.
    #[must_use]
    pub fn scratch_dir(explicit: Option<&Path>, configured: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(path) = env::var_os(ENV_SCRATCH_DIR).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        if let Some(path) = configured {
            return path.to_path_buf();
        }
        env::temp_dir()
    }

    fn resolve_config_dir() -> PathBuf {
        if let Some(path) = env::var_os(ENV_CONFIG_DIR).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }

        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"));
        base.join(APP_NAME)
    }
}

impl Default for KilnDirs {
    fn default() -> Self {
        Self::new()
    }
}
