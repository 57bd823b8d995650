//! Clean logic
//!
//! Removes the project's state directory (promoted artifacts and logs) and
//! its export directory.

use std::path::Path;

use crate::core::project::ProjectConfig;
use crate::error::FilesystemError;

/// Result of clean operation
#[derive(Debug, Default)]
pub struct CleanResult {
    /// Directories that were removed
    pub removed: Vec<String>,
    /// Directories that didn't exist (skipped)
    pub skipped: Vec<String>,
}

/// Remove the state and export directories of a project
pub fn clean_project(
    project_path: &Path,
    config: &ProjectConfig,
) -> Result<CleanResult, FilesystemError> {
    let mut result = CleanResult::default();

    for dir in [&config.project.state_dir, &config.project.export_dir] {
        let dir_path = project_path.join(dir);
        let name = dir.display().to_string();

        if dir_path.exists() {
            crate::infra::filesystem::remove_path(&dir_path)?;
            tracing::debug!(path = %dir_path.display(), "removed");
            result.removed.push(name);
        } else {
            result.skipped.push(name);
        }
    }

    Ok(result)
}
