//! Error types for kiln
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::stage::StageName;

/// Project configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// kiln.toml not found
    #[error("No kiln.toml found at '{path}'. Run 'kiln init' to create one.")]
    NotFound { path: PathBuf },

    /// kiln.toml could not be read
    #[error("Failed to read '{path}': {error}")]
    ReadError { path: PathBuf, error: String },

    /// kiln.toml could not be parsed
    #[error("Failed to parse '{path}': {error}")]
    ParseError { path: PathBuf, error: String },

    /// Semantic validation failed
    #[error("Invalid project configuration: {message}")]
    Invalid { message: String },
}

/// Manifest fingerprinting errors
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// A declared manifest file does not exist
    #[error("Manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    /// A manifest exists but could not be read
    #[error("Failed to read manifest '{path}': {error}")]
    ReadError { path: PathBuf, error: String },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to copy a file or tree
    #[error("Failed to copy '{from}' to '{to}': {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Failed to rename
    #[error("Failed to rename '{from}' to '{to}': {error}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

/// Cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Entry directory exists but was never completed
    #[error("Cache entry '{path}' is incomplete (no completion marker)")]
    CacheCorrupt { path: PathBuf },

    /// Source directory handed to commit does not exist
    #[error("Cannot commit '{path}': source directory does not exist")]
    MissingSource { path: PathBuf },

    /// Filesystem failure while reading or writing the cache
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Exit information for a failed external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitInfo {
    /// Process exited with a status code
    Code(i32),
    /// Process was terminated by a signal (no exit code)
    Signal,
    /// In-process step returned an error
    Internal(String),
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal => write!(f, "terminated by signal"),
            Self::Internal(message) => write!(f, "{message}"),
        }
    }
}

/// Stage execution errors
#[derive(Error, Debug)]
pub enum StageError {
    /// Stage ran and failed
    #[error("Stage '{stage}' failed ({exit}); full log: {}\n{output}", log.display())]
    StageFailure {
        stage: StageName,
        exit: ExitInfo,
        log: PathBuf,
        output: String,
    },

    /// Stage exceeded its declared timeout
    #[error("Stage '{stage}' timed out after {}s", timeout.as_secs())]
    StageTimeout { stage: StageName, timeout: Duration },

    /// Entry point skipped a stage whose artifact is not there
    #[error("Stage '{stage}' needs '{}' from a previous build, but it does not exist", path.display())]
    PrecedingArtifactMissing { stage: StageName, path: PathBuf },

    /// Stage succeeded but did not produce its declared output
    #[error("Stage '{stage}' did not produce its declared output '{}'", path.display())]
    OutputMissing { stage: StageName, path: PathBuf },

    /// External program could not be started
    #[error("Stage '{stage}' could not start '{program}': {error}")]
    Spawn {
        stage: StageName,
        program: String,
        error: String,
    },
}

/// Build workspace errors
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// Lock file could not be opened or locked
    #[error("Failed to lock workspace '{path}': {error}")]
    LockFailed { path: PathBuf, error: String },

    /// Filesystem failure while preparing the workspace
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Port selection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// Every candidate in the scanned range was taken
    #[error("No port available: scanned {count} port(s) starting at {start}")]
    NoPortAvailable { start: u16, count: u16 },
}

/// Project initialization errors
#[derive(Error, Debug)]
pub enum InitError {
    /// Target directory does not exist
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// kiln.toml already present
    #[error("'{path}' already exists. Use --force to overwrite.")]
    AlreadyExists { path: PathBuf },

    /// The generated template failed to load
    #[error("Generated kiln.toml is invalid: {error}")]
    InvalidTemplate { error: String },

    /// I/O error while writing files
    #[error("Failed to write '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Top-level kiln error type
#[derive(Error, Debug)]
pub enum KilnError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fingerprint error
    #[error("{0}")]
    Fingerprint(#[from] FingerprintError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Stage error
    #[error("{0}")]
    Stage(#[from] StageError),

    /// Workspace error
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Port error
    #[error("{0}")]
    Port(#[from] PortError),

    /// Init error
    #[error("Init error: {0}")]
    Init(#[from] InitError),
}

impl KilnError {
    /// Process exit code for this error: `2` for invalid invocation, `1` otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::Fingerprint(FingerprintError::ManifestNotFound { .. })
            | Self::Init(InitError::AlreadyExists { .. }) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_manifest_is_invalid_invocation() {
        let err = KilnError::from(FingerprintError::ManifestNotFound {
            path: PathBuf::from("package.json"),
        });
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("package.json"));
    }

    #[test]
    fn test_stage_failure_exit_code() {
        let err = KilnError::from(StageError::StageTimeout {
            stage: StageName::Compile,
            timeout: Duration::from_secs(3),
        });
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "Stage 'compile' timed out after 3s");
    }

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::Code(2).to_string(), "exit code 2");
        assert_eq!(ExitInfo::Signal.to_string(), "terminated by signal");
    }
}
