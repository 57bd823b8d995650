//! Integration tests for the kiln command line
//!
//! Exit codes, JSON output and the project-management commands.

#![cfg(unix)]

mod common;

use assert_fs::prelude::*;
use common::{stderr, stdout, StageScripts, TestProject};
use predicates::prelude::*;
use std::process::{Command, Stdio};
use std::time::Duration;

#[test]
fn test_build_succeeds_and_exports() {
    let project = TestProject::new();
    let output = project.run(&["build"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Build complete"));
    assert!(project.file_exists("out/main.js"));
}

#[test]
fn test_build_json_report() {
    let project = TestProject::new();
    project.run(&["build"]);
    let output = project.run(&["build", "--json"]);

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["report"]["cache"], "hit");
    assert_eq!(json["report"]["states"][0], "IDLE");
    assert!(json["report"]["fingerprint"].is_string());
}

#[test]
fn test_stage_failure_exits_one_with_diagnostics() {
    let project = TestProject::new();
    project.write_kiln_toml(&StageScripts {
        compile: "echo 'unexpected token' >&2; exit 4".to_string(),
        ..StageScripts::default()
    });

    let output = project.run(&["build"]);

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("compile"));
    assert!(err.contains("unexpected token"));
}

#[test]
fn test_stage_failure_json() {
    let project = TestProject::new();
    project.write_kiln_toml(&StageScripts {
        compile: "exit 4".to_string(),
        ..StageScripts::default()
    });

    let output = project.run(&["build", "--json"]);

    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["stage"], "compile");
    assert_eq!(json["states"].as_array().unwrap().last().unwrap(), "FAILED");
}

#[test]
fn test_watch_reports_a_failed_build_once() {
    let project = TestProject::new();
    project.write_kiln_toml(&StageScripts {
        compile: "echo 'unexpected token' >&2; exit 4".to_string(),
        ..StageScripts::default()
    });

    let mut child = project
        .kiln()
        .arg("watch")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    std::thread::sleep(Duration::from_secs(3));
    child.kill().unwrap();
    let output = child.wait_with_output().unwrap();

    let err = stderr(&output);
    assert_eq!(err.matches("unexpected token").count(), 1, "stderr: {err}");
    assert!(err.contains("Full log"));
}

#[test]
fn test_missing_manifest_exits_two() {
    let project = TestProject::new();
    std::fs::remove_file(project.path().join("package-lock.json")).unwrap();

    let output = project.run(&["build"]);

    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("package-lock.json"));
}

#[test]
fn test_missing_project_file_exits_two() {
    let project = TestProject::empty();
    let output = project.run(&["build"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(predicate::str::contains("kiln init").eval(&stderr(&output)));
}

#[test]
fn test_invalid_project_file_exits_two() {
    let project = TestProject::new();
    project.create_file("kiln.toml", "[project]\nname = \"\"\n");

    let output = project.run(&["build"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unknown_flag_exits_two() {
    let project = TestProject::new();
    let output = project.run(&["build", "--frobnicate"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_project_dir_flag() {
    let project = TestProject::new();
    let elsewhere = tempfile::TempDir::new().unwrap();

    let output = project
        .kiln()
        .current_dir(elsewhere.path())
        .arg("-C")
        .arg(project.path())
        .arg("build")
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(project.file_exists("out/main.js"));
}

#[test]
fn test_init_creates_loadable_project() {
    let project = TestProject::empty();

    let output = project.run(&["init", "--name", "web"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(project.read_file("kiln.toml").contains("name = \"web\""));
    assert!(project.read_file(".gitignore").contains(".kiln/"));

    let again = project.run(&["init"]);
    assert_eq!(again.status.code(), Some(2));
    assert!(stderr(&again).contains("--force"));

    let forced = project.run(&["init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn test_init_derives_name_from_directory() {
    let parent = assert_fs::TempDir::new().unwrap();
    let dir = parent.child("My Site");
    dir.create_dir_all().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .current_dir(dir.path())
        .env("KILN_CONFIG_DIR", parent.path().join("config"))
        .arg("init")
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    dir.child("kiln.toml")
        .assert(predicate::str::contains("name = \"my-site\""));
    dir.child(".gitignore")
        .assert(predicate::str::contains("# kiln").and(predicate::str::contains("out/")));
}

#[test]
fn test_port_json() {
    let project = TestProject::new();
    let output = project.run(&["port", "--start", "20000", "--count", "50", "--json"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let port = json["port"].as_u64().unwrap();
    assert!((19951..=20000).contains(&port));
}

#[test]
fn test_serve_without_command_exits_two() {
    let project = TestProject::new();
    let output = project.run(&["serve"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_cache_info_clean_cycle() {
    let project = TestProject::new();
    project.run(&["build"]);

    let info = project.run(&["cache", "info", "--json"]);
    assert!(info.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&info)).unwrap();
    assert_eq!(json["item_count"], 1);

    let clean = project.run(&["cache", "clean", "--json"]);
    assert!(clean.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&clean)).unwrap();
    assert!(json["freed_bytes"].as_u64().unwrap() > 0);
    assert!(project.scratch_entries("app-vendor-").is_empty());
}

#[test]
fn test_cache_evict_keeps_fresh_entries() {
    let project = TestProject::new();
    project.run(&["build"]);

    let output = project.run(&["cache", "evict", "--older-than-days", "1", "--json"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["entries"], 0);
    assert_eq!(project.scratch_entries("app-vendor-").len(), 1);
}

#[test]
fn test_clean_removes_state_and_export() {
    let project = TestProject::new();
    project.run(&["build"]);
    assert!(project.file_exists(".kiln"));

    let output = project.run(&["clean"]);
    assert!(output.status.success());
    assert!(!project.file_exists(".kiln"));
    assert!(!project.file_exists("out"));
    assert_eq!(project.scratch_entries("app-vendor-").len(), 1);
}

#[test]
fn test_pack_and_export_name_what_completed() {
    let project = TestProject::new();
    project.run(&["build"]);

    let pack = project.run(&["pack"]);
    assert!(pack.status.success(), "stderr: {}", stderr(&pack));
    assert!(stdout(&pack).contains("Pack complete"));

    let export = project.run(&["export"]);
    assert!(export.status.success(), "stderr: {}", stderr(&export));
    assert!(stdout(&export).contains("Export complete"));
    assert!(!stdout(&export).contains("Build complete"));
}

#[test]
fn test_export_without_pack_artifact_fails() {
    let project = TestProject::new();
    let output = project.run(&["export"]);
    assert_eq!(output.status.code(), Some(1));
}
