//! Test utilities for unit and property-based tests
//!
//! Provides a shell-driven sample project and proptest generators.

#[cfg(test)]
use std::path::{Path, PathBuf};

#[cfg(test)]
use crate::core::project::{
    DependenciesConfig, ProjectConfig, ProjectSection, StageConfig, StagesConfig,
};

/// File the sample installer appends to on every run
#[cfg(test)]
pub const INSTALL_RUNS_FILE: &str = "install-runs.log";

#[cfg(test)]
fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// A project whose stages are small POSIX shell scripts
#[cfg(test)]
pub fn sample_config(name: &str) -> ProjectConfig {
    ProjectConfig {
        project: ProjectSection {
            name: name.to_string(),
            source: PathBuf::from("."),
            manifests: vec![PathBuf::from("package.json"), PathBuf::from("package-lock.json")],
            exclude: vec![PathBuf::from(INSTALL_RUNS_FILE)],
            state_dir: PathBuf::from(".kiln"),
            export_dir: PathBuf::from("out"),
        },
        dependencies: DependenciesConfig {
            dir: PathBuf::from("node_modules"),
            command: sh("mkdir -p node_modules/dep && cp package.json node_modules/dep/package.json"),
            timeout_secs: 30,
        },
        stages: StagesConfig {
            compile: StageConfig {
                command: sh("mkdir -p dist && cp -R src/. dist/"),
                dev_args: vec![],
                input: Some(PathBuf::from("src")),
                output: PathBuf::from("dist"),
                timeout_secs: 30,
            },
            pack: StageConfig {
                command: sh("test -d node_modules/dep && mkdir -p bundle && cp -R dist/. bundle/"),
                dev_args: vec![],
                input: None,
                output: PathBuf::from("bundle"),
                timeout_secs: 30,
            },
        },
        watch: crate::core::project::WatchConfig::default(),
        serve: crate::core::project::ServeConfig::default(),
    }
}

/// Write the sample project into `dir` and return its configuration.
///
/// The installer records each run in [`INSTALL_RUNS_FILE`] at the project root.
#[cfg(test)]
pub fn write_project(dir: &Path, name: &str) -> ProjectConfig {
    let mut config = sample_config(name);
    let runs = dir.join(INSTALL_RUNS_FILE);
    config.dependencies.command = sh(&format!(
        "echo run >> '{}' && mkdir -p node_modules/dep && cp package.json node_modules/dep/package.json",
        runs.display()
    ));

    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("src/main.js"), "console.log('hi')\n").unwrap();
    std::fs::write(dir.join("package.json"), r#"{"name":"app","version":"1.0.0"}"#).unwrap();
    std::fs::write(dir.join("package-lock.json"), r#"{"lockfileVersion":3}"#).unwrap();
    std::fs::write(
        dir.join(crate::core::project::PROJECT_FILE),
        config.to_toml().unwrap(),
    )
    .unwrap();
    config
}

/// Number of times the sample installer ran in `dir`
#[cfg(test)]
pub fn install_runs(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join(INSTALL_RUNS_FILE))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid project name
    pub fn project_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.-]{0,30}"
    }

    /// Generate an invalid project name (contains a path separator or space)
    pub fn invalid_project_name() -> impl Strategy<Value = String> {
        ("[a-z]{1,8}", prop_oneof![Just("/"), Just(" "), Just("\\")], "[a-z]{0,8}")
            .prop_map(|(a, sep, b)| format!("{a}{sep}{b}"))
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sample_config_is_valid() {
        sample_config("app").validate().unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_valid_project_names_pass_validation(name in project_name()) {
            prop_assert!(sample_config(&name).validate().is_ok());
        }

        #[test]
        fn test_invalid_project_names_fail_validation(name in invalid_project_name()) {
            prop_assert!(sample_config(&name).validate().is_err());
        }
    }
}
