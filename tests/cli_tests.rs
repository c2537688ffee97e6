// Binary-level checks for the tasker CLI

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_no_arguments_shows_getting_started() {
    let mut cmd = Command::cargo_bin("tasker").unwrap();

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Tasker - Concurrency-safe task mutation pipeline"))
        .stdout(predicate::str::contains("tasker demo"))
        .stdout(predicate::str::contains("tasker transitions"));
}

#[test]
fn test_transitions_lists_default_matrix() {
    let mut cmd = Command::cargo_bin("tasker").unwrap();

    cmd.arg("transitions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Default status transitions"))
        .stdout(predicate::str::contains("TODO"))
        .stdout(predicate::str::contains("IN_PROGRESS"))
        .stdout(predicate::str::contains("ARCHIVED"));
}

#[test]
fn test_config_init_refuses_to_overwrite_without_force() {
    let temp_dir = TempDir::new().unwrap();

    Command::cargo_bin("tasker")
        .unwrap()
        .current_dir(temp_dir.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default configuration"));
    assert!(temp_dir.path().join("tasker.toml").exists());

    Command::cargo_bin("tasker")
        .unwrap()
        .current_dir(temp_dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("already exists"));

    Command::cargo_bin("tasker")
        .unwrap()
        .current_dir(temp_dir.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_demo_runs_every_scenario() {
    let mut cmd = Command::cargo_bin("tasker").unwrap();

    cmd.arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stale version is rejected"))
        .stdout(predicate::str::contains("Crashed holder's lock expires"))
        .stdout(predicate::str::contains("All scenarios behaved as expected"));
}

#[test]
fn test_unknown_command_is_rejected() {
    let mut cmd = Command::cargo_bin("tasker").unwrap();

    cmd.arg("frobnicate").assert().failure();
}
