//! Global configuration management
//!
//! Reads user-level settings from `config.toml` in the config directory:
//! the default scratch root and the optional cache age bound.

use crate::error::ConfigError;
use crate::infra::dirs::KilnDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for kiln
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Scratch root settings
    #[serde(default)]
    pub scratch: ScratchConfig,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Scratch root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Directory for workspaces and cache entries
    pub dir: Option<PathBuf>,
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Evict entries older than this many days after each successful build
    pub max_age_days: Option<u64>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` if the config file exists but
    /// contains invalid TOML.
    pub fn load(dirs: &KilnDirs) -> Result<Self, ConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Save global configuration to a specific path
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Effective cache age bound, if configured
    #[must_use]
    pub fn cache_max_age(&self) -> Option<Duration> {
        self.cache
            .max_age_days
            .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = GlobalConfig::load_from_path(&temp_dir.path().join("config.toml")).unwrap();
        assert!(config.scratch.dir.is_none());
        assert!(config.cache_max_age().is_none());
    }

    #[test]
    fn test_load_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[scratch]\ndir = \"/var/tmp/kiln\"\n\n[cache]\nmax_age_days = 2\n",
        )
        .unwrap();

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        assert_eq!(config.scratch.dir, Some(PathBuf::from("/var/tmp/kiln")));
        assert_eq!(config.cache_max_age(), Some(Duration::from_secs(2 * 86_400)));
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid toml [[[").unwrap();

        assert!(matches!(
            GlobalConfig::load_from_path(&config_path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/config.toml");
        let config = GlobalConfig {
            scratch: ScratchConfig {
                dir: Some(PathBuf::from("/scratch")),
            },
            cache: CacheConfig {
                max_age_days: Some(30),
            },
        };

        config.save_to_path(&config_path).unwrap();
        let loaded = GlobalConfig::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.scratch.dir, config.scratch.dir);
        assert_eq!(loaded.cache.max_age_days, Some(30));
    }
}
