//! Integration tests for `strata run` paths that fail validation or need no
//! external tool.

#![allow(clippy::expect_used)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A working directory with one module repository and an empty state root.
struct Workspace {
    cwd: TempDir,
    base: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let cwd = TempDir::new().expect("cwd");
        let base = TempDir::new().expect("base");
        let module = cwd.path().join("modules").join("vpc");
        std::fs::create_dir_all(&module).expect("module dir");
        std::fs::write(
            module.join("strata.yaml"),
            "name: vpc\nexport_outputs: [vpc_id]\n",
        )
        .expect("module file");
        Self { cwd, base }
    }

    fn strata(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("strata"));
        cmd.env("NO_COLOR", "1")
            .env_remove("STRATA_BASE_DIR")
            .env_remove("STRATA_MODULE_REPOSITORY")
            .env_remove("STRATA_VAR_FILES")
            .env_remove("STRATA_YES")
            .current_dir(self.cwd.path());
        cmd
    }

    /// `strata run` with the state root and module repository set.
    fn run(&self) -> Command {
        let mut cmd = self.strata();
        cmd.arg("run")
            .arg("-b")
            .arg(self.base.path())
            .args(["-r", "modules"]);
        cmd
    }

    fn state(&self) -> &Path {
        self.base.path()
    }
}

#[test]
fn test_run_without_base_dir_is_a_validation_error() {
    let ws = Workspace::new();
    ws.strata()
        .args(["run", "vpc", "test", "-r", "modules"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No base directory given"));
}

#[test]
fn test_run_refuses_a_stray_terraform_state_file() {
    let ws = Workspace::new();
    std::fs::write(ws.cwd.path().join("terraform.tfstate"), "{}").expect("stray state");
    ws.run()
        .args(["vpc", "test"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("terraform.tfstate"));
}

#[test]
fn test_run_unknown_module_lists_choices() {
    let ws = Workspace::new();
    ws.run()
        .args(["db", "test"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "Unknown module: db, available choices: vpc",
        ));
}

#[test]
fn test_run_unknown_step_lists_choices() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "test", "--steps", "plan,deploy"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown step: deploy"));
    assert!(
        !ws.state().join("vpc").exists(),
        "nothing is written before the steps validate"
    );
}

#[test]
fn test_run_invalid_project_name_is_rejected() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "../escape"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid project name"));
}

#[test]
fn test_run_steps_conflicts_with_resume() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "test", "--steps", "plan", "--resume"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_run_rejects_malformed_parent_reference() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "test", "--parent", "no-slash"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("MODULE/PROJECT"));
}

#[test]
fn test_run_parent_for_a_module_without_one_is_a_dependency_error() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "test", "--parent", "net/test", "--steps", "pull"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("has no parent module"));
}

#[test]
fn test_run_pull_with_local_state_is_a_noop() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "test", "--steps", "pull"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to pull"));
    assert!(!ws.cwd.path().join("state-vpc-test").exists());
}

#[test]
fn test_run_cleanup_of_an_empty_workspace_succeeds() {
    let ws = Workspace::new();
    ws.run()
        .args(["vpc", "test", "--steps", "cleanup", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to clean up"));
    assert!(
        !ws.state().join("vpc").join("test").join(".lock").exists(),
        "lock is released"
    );
}

#[test]
fn test_run_cleanup_non_interactive_keeps_files() {
    let ws = Workspace::new();
    let dir = ws.state().join("vpc").join("test");
    std::fs::create_dir_all(&dir).expect("workspace");
    std::fs::write(dir.join("vpc.tfstate"), "{}").expect("state");

    // Without a terminal the prompt takes its default, which is "no".
    ws.run()
        .args(["vpc", "test", "--steps", "cleanup"])
        .env("CI", "true")
        .assert()
        .success()
        .stdout(predicate::str::contains("cleanup cancelled"));
    assert!(dir.join("vpc.tfstate").is_file());

    ws.run()
        .args(["vpc", "test", "--steps", "cleanup"])
        .env("STRATA_YES", "true")
        .assert()
        .success();
    assert!(!dir.join("vpc.tfstate").exists());
}

#[test]
fn test_run_held_lock_exits_with_the_lock_code() {
    let ws = Workspace::new();
    let dir = ws.state().join("vpc").join("test");
    std::fs::create_dir_all(&dir).expect("workspace");
    let lock = std::fs::File::create(dir.join(".lock")).expect("lock file");
    fs2::FileExt::try_lock_exclusive(&lock).expect("hold lock");

    ws.run()
        .args(["vpc", "test", "--steps", "pull"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("is locked by"));

    fs2::FileExt::unlock(&lock).expect("unlock");
}
