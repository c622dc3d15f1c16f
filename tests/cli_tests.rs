//! CLI smoke tests.
//!
//! Exercise the binary surface: help output, config generation and
//! validation, and error reporting for malformed invocations.

use assert_cmd::Command;
use predicates::prelude::*;

fn terravault() -> Command {
    Command::cargo_bin("terravault").expect("binary builds")
}

#[test]
fn test_help_lists_commands() {
    terravault()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("register"));
}

#[test]
fn test_init_writes_config() {
    let dir = tempfile::tempdir().unwrap();

    terravault()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("terravault.yaml"));

    assert!(dir.path().join("terravault.yaml").is_file());

    // A second init refuses to clobber the existing file
    terravault()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_validate_generated_config() {
    let dir = tempfile::tempdir().unwrap();

    terravault()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    terravault()
        .current_dir(dir.path())
        .args(["validate", "terravault.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_validate_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.yaml"), "ingestion: [not, a, map]").unwrap();

    terravault()
        .current_dir(dir.path())
        .args(["validate", "broken.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_ingest_rejects_malformed_triple() {
    let dir = tempfile::tempdir().unwrap();

    terravault()
        .current_dir(dir.path())
        .env("XDG_DATA_HOME", dir.path())
        .args(["ingest", "not-a-triple", "--version", "1.0.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NAMESPACE/MODULE/PROVIDER"));
}
