//! Integration tests for the chunkshift CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Command isolated from the user's own configuration
fn chunkshift(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("chunkshift").unwrap();
    cmd.current_dir(dir.path()).env("HOME", dir.path()).env_remove("RUST_LOG");
    cmd
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/a.js"), "const a = require('a');\n").unwrap();
    fs::write(dir.path().join("src/b.js"), "const b = require('b');\n").unwrap();
    fs::write(dir.path().join("src/c.js"), "export const c = 1;\n").unwrap();
    dir
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    chunkshift(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply"));
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    chunkshift(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chunkshift"));
}

#[test]
fn test_invalid_subcommand() {
    let dir = TempDir::new().unwrap();
    chunkshift(&dir)
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_apply_rewrites_and_backs_up() {
    let dir = workspace();
    chunkshift(&dir)
        .args(["apply", "--rule", "require(=import(", "--chunk-size", "2"])
        .args(["src/a.js", "src/b.js", "src/c.js"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All files transformed"));

    assert_eq!(
        fs::read_to_string(dir.path().join("src/a.js")).unwrap(),
        "const a = import('a');\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("src/c.js")).unwrap(),
        "export const c = 1;\n"
    );

    let runs: Vec<_> = fs::read_dir(dir.path().join(".chunkshift/backups"))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(runs.len(), 1);
    let backup = runs[0].path().join("src/a.js");
    assert_eq!(fs::read_to_string(backup).unwrap(), "const a = require('a');\n");
}

#[test]
fn test_apply_json_output() {
    let dir = workspace();
    let output = chunkshift(&dir)
        .args(["apply", "--rule", "require(=import(", "--format", "json", "src/a.js", "src/c.js"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["files_processed"], 2);
    assert_eq!(result["stats"]["changed_files"], 1);
    assert_eq!(result["backup_paths"].as_array().unwrap().len(), 2);
}

#[test]
fn test_apply_dry_run_leaves_files() {
    let dir = workspace();
    chunkshift(&dir)
        .args(["apply", "--dry-run", "--rule", "require(=import(", "src/a.js"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run summary"))
        .stdout(predicate::str::contains("no file was modified"));

    assert!(
        fs::read_to_string(dir.path().join("src/a.js"))
            .unwrap()
            .contains("require(")
    );
}

#[test]
fn test_apply_verbose_lists_chunk_detail() {
    let dir = workspace();
    chunkshift(&dir)
        .args(["-v", "apply", "--rule", "require(=import(", "--chunk-size", "2"])
        .args(["src/a.js", "src/b.js", "src/c.js"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chunk parallelism"))
        .stdout(predicate::str::contains("Backed up"));

    chunkshift(&dir)
        .args(["apply", "--rule", "import(=require(", "src/a.js"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chunk parallelism").not());
}

#[test]
fn test_apply_files_from_and_repo_config() {
    let dir = workspace();
    fs::write(
        dir.path().join("chunkshift.toml"),
        "[[rules]]\nfrom = \"const\"\nto = \"let\"\n",
    )
    .unwrap();
    fs::write(dir.path().join("worklist.txt"), "# targets\nsrc/b.js\nsrc/c.js\n").unwrap();

    chunkshift(&dir)
        .args(["-q", "apply", "--files-from", "worklist.txt"])
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(dir.path().join("src/b.js")).unwrap(),
        "let b = require('b');\n"
    );
    assert!(
        fs::read_to_string(dir.path().join("src/a.js"))
            .unwrap()
            .starts_with("const")
    );
}

#[test]
fn test_apply_missing_file_is_fatal() {
    let dir = workspace();
    chunkshift(&dir)
        .args(["apply", "--rule", "a=b", "src/a.js", "src/nope.js"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("discovery failed"));

    assert!(
        fs::read_to_string(dir.path().join("src/a.js"))
            .unwrap()
            .contains("require(")
    );
}

#[test]
fn test_apply_without_rules_fails() {
    let dir = workspace();
    chunkshift(&dir)
        .args(["apply", "src/a.js"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no rules configured"));
}

#[test]
fn test_config_show_and_get() {
    let dir = TempDir::new().unwrap();
    chunkshift(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chunk_size"));

    chunkshift(&dir)
        .args(["config", "get", "monitor.max_samples"])
        .assert()
        .success()
        .stdout(predicate::str::contains("100"));
}

#[test]
fn test_env_overrides_config() {
    let dir = TempDir::new().unwrap();
    chunkshift(&dir)
        .env("CHUNKSHIFT_CHUNK_SIZE", "17")
        .args(["config", "get", "chunk_size"])
        .assert()
        .success()
        .stdout(predicate::str::contains("17"));
}

#[test]
fn test_config_validate_rejects_bad_thresholds() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[monitor]\nwarning = 900\ncleanup = 800\ncritical = 1000\n").unwrap();

    chunkshift(&dir)
        .args(["config", "validate", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("strictly increasing"));
}

#[test]
fn test_status() {
    let dir = TempDir::new().unwrap();
    chunkshift(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Critical"))
        .stdout(predicate::str::contains("I/O workers"))
        .stdout(predicate::str::contains("CPU workers"));
}
