//! Project initialization logic
//!
//! Writes a commented `kiln.toml` template and adds kiln's generated
//! directories to `.gitignore`.

use std::path::{Path, PathBuf};

use crate::core::project::{ProjectConfig, PROJECT_FILE};
use crate::error::InitError;

/// Entries to add to .gitignore
pub const GITIGNORE_ENTRIES: &[&str] = &[".kiln/", "out/", "node_modules/"];

/// Marker comment for kiln section in .gitignore
pub const GITIGNORE_MARKER: &str = "# kiln";

/// Options for project initialization
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Project name; derived from the directory when absent
    pub name: Option<String>,
    /// Overwrite an existing kiln.toml
    pub force: bool,
}

/// Result of initialization
#[derive(Debug)]
pub struct InitResult {
    /// Path to the created project file
    pub project_file: PathBuf,
    /// Project name written
    pub name: String,
    /// Whether .gitignore was created or updated
    pub gitignore_updated: bool,
}

/// Generate the default project file with comments
pub fn generate_project_file(project_name: &str) -> String {
    format!(
        r#"# kiln project configuration

[project]
name = "{project_name}"
# Source tree copied into the build workspace
source = "."
# Files whose contents key the dependency cache, in order
manifests = ["package.json", "package-lock.json"]
# Never copied into the workspace nor watched
exclude = [".git"]
state_dir = ".kiln"
export_dir = "out"

[dependencies]
dir = "node_modules"
command = ["npm", "ci"]
timeout_secs = 600

[stages.compile]
command = ["npx", "babel", "src", "-d", "dist"]
dev_args = ["--source-maps"]
input = "src"
output = "dist"
timeout_secs = 300

[stages.pack]
command = ["npx", "webpack", "--entry", "./dist/index.js", "--output-path", "bundle"]
# input defaults to the compile output
output = "bundle"
timeout_secs = 300

[watch]
paths = ["src"]
debounce_ms = 200

[serve]
port = 9999
direction = "descending"
count = 100
# {{port}} is replaced with the selected port
# command = ["python3", "-m", "http.server", "{{port}}", "-d", "out"]
"#
    )
}

/// Generate .gitignore content for kiln
pub fn generate_gitignore_content() -> String {
    let mut content = String::from(GITIGNORE_MARKER);
    content.push('\n');
    for entry in GITIGNORE_ENTRIES {
        content.push_str(entry);
        content.push('\n');
    }
    content
}

/// Append kiln entries to existing .gitignore content
pub fn append_gitignore_entries(existing: &str) -> String {
    if existing.contains(GITIGNORE_MARKER) {
        return existing.to_string();
    }

    let mut result = existing.to_string();
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    if !result.is_empty() {
        result.push('\n');
    }
    result.push_str(&generate_gitignore_content());
    result
}

/// Derive a valid project name from a directory
pub fn derive_project_name(path: &Path) -> String {
    let raw = path
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_matches('-');

    if name.is_empty() {
        "my-app".to_string()
    } else {
        name.to_string()
    }
}

/// Create `kiln.toml` (and update `.gitignore`) in `path`
pub fn init_project(path: &Path, options: &InitOptions) -> Result<InitResult, InitError> {
    if !path.is_dir() {
        return Err(InitError::DirectoryNotFound {
            path: path.to_path_buf(),
        });
    }

    let project_file = path.join(PROJECT_FILE);
    if project_file.exists() && !options.force {
        return Err(InitError::AlreadyExists { path: project_file });
    }

    let name = options
        .name
        .clone()
        .unwrap_or_else(|| derive_project_name(path));
    let content = generate_project_file(&name);

    // The template must always load
    ProjectConfig::from_toml(&content)
        .map_err(|e| e.to_string())
        .and_then(|c| c.validate().map_err(|e| e.to_string()))
        .map_err(|error| InitError::InvalidTemplate { error })?;

    write(&project_file, &content)?;

    let gitignore = path.join(".gitignore");
    let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
    let updated = append_gitignore_entries(&existing);
    let gitignore_updated = updated != existing;
    if gitignore_updated {
        write(&gitignore, &updated)?;
    }

    tracing::info!(path = %project_file.display(), "initialized project");
    Ok(InitResult {
        project_file,
        name,
        gitignore_updated,
    })
}

fn write(path: &Path, content: &str) -> Result<(), InitError> {
    std::fs::write(path, content).map_err(|e| InitError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}
