//! Integration tests for the strata CLI surface: help, version and list.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn strata() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("strata"));
    cmd.env("NO_COLOR", "1").env_remove("STRATA_BASE_DIR");
    cmd
}

// --- Help and version tests ---

#[test]
fn test_cli_no_args_shows_help_and_exits_two() {
    strata().assert().code(2).stderr(predicate::str::contains(
        "Ordered terraform and ansible workflows",
    ));
}

#[test]
fn test_cli_help_lists_commands() {
    strata()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn test_run_help_documents_base_dir_and_steps() {
    strata()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--base-dir"))
        .stdout(predicate::str::contains("--steps"))
        .stdout(predicate::str::contains("--resume"))
        .stdout(predicate::str::contains("STRATA_BASE_DIR"));
}

#[test]
fn test_cli_version_flag_shows_version() {
    strata()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("strata"));
}

#[test]
fn test_version_command_shows_version() {
    strata()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("strata 0.1.0"));
}

#[test]
fn test_version_command_json_outputs_valid_json() {
    let out = strata()
        .args(["version", "--json"])
        .output()
        .expect("run strata");
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).expect("valid JSON");
    assert_eq!(value["version"], "0.1.0");
}

#[test]
fn test_unknown_command_fails() {
    strata()
        .arg("deploy")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// --- list ---

#[test]
fn test_list_without_base_dir_is_a_validation_error() {
    strata()
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No base directory given"));
}

#[test]
fn test_list_empty_base_dir_reports_nothing_found() {
    let base = TempDir::new().expect("tempdir");
    strata()
        .args(["list", "-b"])
        .arg(base.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no deployments found"));
}

#[test]
fn test_list_reads_base_dir_from_environment() {
    let base = TempDir::new().expect("tempdir");
    strata()
        .arg("list")
        .env("STRATA_BASE_DIR", base.path())
        .assert()
        .success();
}

fn seed_deployment(base: &std::path::Path, module: &str, project: &str, marker: &str) {
    let dir = base.join(module).join(project);
    std::fs::create_dir_all(&dir).expect("workspace dir");
    std::fs::write(dir.join("deployment.json"), marker).expect("marker");
    std::fs::write(dir.join("export.tfvars"), "vpc_id = \"vpc-1\"\n").expect("export");
}

#[test]
fn test_list_shows_deployments_grouped_by_module() {
    let base = TempDir::new().expect("tempdir");
    seed_deployment(
        base.path(),
        "vpc",
        "staging",
        r#"{"last_completed_step":"ansible","outputs_captured":true,"pending_steps":[],"author":"ci@runner"}"#,
    );
    seed_deployment(base.path(), "app", "staging", "{}");

    strata()
        .args(["list", "-v", "-b"])
        .arg(base.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc"))
        .stdout(predicate::str::contains("last: ansible"))
        .stdout(predicate::str::contains("ci@runner"))
        .stdout(predicate::str::contains("export.tfvars"));
}

#[test]
fn test_list_json_filters_by_module() {
    let base = TempDir::new().expect("tempdir");
    seed_deployment(base.path(), "vpc", "staging", "{}");
    seed_deployment(base.path(), "app", "staging", "{}");

    let out = strata()
        .args(["list", "--json", "-m", "app", "-b"])
        .arg(base.path())
        .output()
        .expect("run strata");
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).expect("valid JSON");
    let deployments = value["deployments"].as_array().expect("deployments array");
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0]["module"], "app");
    assert_eq!(deployments[0]["locked"], false);
}

#[test]
fn test_list_corrupt_marker_is_listed_with_a_warning() {
    let base = TempDir::new().expect("tempdir");
    seed_deployment(base.path(), "vpc", "staging", "not json");

    strata()
        .args(["list", "-b"])
        .arg(base.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("staging"))
        .stdout(predicate::str::contains("never run"));
}

#[test]
fn test_conventional_no_color_values_do_not_break_commands() {
    for value in ["1", "true", "yes"] {
        strata()
            .env("NO_COLOR", value)
            .args(["version", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"version\""));
    }
}
