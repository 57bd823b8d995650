//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests. The sample
//! project's stages are POSIX shell one-liners, so tests using it are unix-only.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

use kiln::core::pipeline::Pipeline;
use kiln::core::project::ProjectConfig;

/// File at the project root the sample installer appends to on every run
pub const INSTALL_RUNS_FILE: &str = "install-runs.log";

/// Default compile script: copies `src/` to `dist/`
pub const COPY_COMPILE: &str = "mkdir -p dist && cp -R src/. dist/";

/// Stage scripts of the sample project
#[derive(Debug, Clone)]
pub struct StageScripts {
    pub compile: String,
    pub compile_timeout_secs: u64,
}

impl Default for StageScripts {
    fn default() -> Self {
        Self {
            compile: COPY_COMPILE.to_string(),
            compile_timeout_secs: 30,
        }
    }
}

/// Test project context
///
/// A temporary project directory plus its own scratch root and config
/// directory, so tests never touch the user's cache or configuration.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
    /// Scratch root for workspaces and the dependency cache
    pub scratch: TempDir,
    /// Global config directory
    pub config: TempDir,
}

impl TestProject {
    /// Create an empty test project (no kiln.toml)
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            scratch: TempDir::new().expect("Failed to create scratch directory"),
            config: TempDir::new().expect("Failed to create config directory"),
        }
    }

    /// Create the sample project: sources, manifests and kiln.toml
    pub fn new() -> Self {
        let project = Self::empty();
        project.create_file("src/main.js", "console.log('hi')\n");
        project.create_file("package.json", r#"{"name":"app","version":"1.0.0"}"#);
        project.create_file("package-lock.json", r#"{"lockfileVersion":3}"#);
        project.write_kiln_toml(&StageScripts::default());
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Get the scratch root
    pub fn scratch_path(&self) -> PathBuf {
        self.scratch.path().to_path_buf()
    }

    /// Rewrite kiln.toml with different stage scripts
    pub fn write_kiln_toml(&self, scripts: &StageScripts) {
        let runs = self.dir.path().join(INSTALL_RUNS_FILE);
        let content = format!(
            r#"[project]
name = "app"
manifests = ["package.json", "package-lock.json"]
exclude = ["{INSTALL_RUNS_FILE}"]

[dependencies]
command = ["sh", "-c", '''echo run >> "{runs}" && mkdir -p node_modules/dep && cp package.json node_modules/dep/''']
timeout_secs = 30

[stages.compile]
command = ["sh", "-c", '''{compile}''']
input = "src"
output = "dist"
timeout_secs = {timeout}

[stages.pack]
command = ["sh", "-c", '''test -d node_modules/dep && mkdir -p bundle && cp -R dist/. bundle/''']
output = "bundle"
timeout_secs = 30

[watch]
debounce_ms = 100
"#,
            runs = runs.display(),
            compile = scripts.compile,
            timeout = scripts.compile_timeout_secs,
        );
        self.create_file("kiln.toml", &content);
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Number of times the installer ran
    pub fn install_runs(&self) -> usize {
        std::fs::read_to_string(self.dir.path().join(INSTALL_RUNS_FILE))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Pipeline over this project's current kiln.toml
    pub fn pipeline(&self) -> Pipeline {
        let config = ProjectConfig::load(self.dir.path()).expect("Failed to load kiln.toml");
        Pipeline::new(self.path(), config, self.scratch_path())
    }

    /// Entries in the scratch root whose name starts with `prefix`
    pub fn scratch_entries(&self, prefix: &str) -> Vec<String> {
        list_prefixed(self.scratch.path(), prefix)
    }

    /// `kiln` command isolated to this project
    pub fn kiln(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiln"));
        cmd.current_dir(self.dir.path())
            .env("KILN_SCRATCH_DIR", self.scratch.path())
            .env("KILN_CONFIG_DIR", self.config.path())
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run `kiln` with arguments
    pub fn run(&self, args: &[&str]) -> Output {
        self.kiln()
            .args(args)
            .output()
            .expect("Failed to execute kiln")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

fn list_prefixed(dir: &Path, prefix: &str) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.starts_with(prefix))
                .collect()
        })
        .unwrap_or_default()
}

/// Stdout of a command as a string
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Stderr of a command as a string
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
