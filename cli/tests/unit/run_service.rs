//! End-to-end runs of the `run` service over local storage.

#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::Value;
use strata_cli::application::ports::{LockAttempt, StorageProvider};
use strata_cli::domain::deployment::ParentRef;
use strata_cli::domain::error::{
    DependencyError, ExitClass, StateError, StepError, ValidationError,
};

use crate::helpers::{Fixture, Harness, host_outputs, request, with_steps};
use crate::mocks::FakeProvisioner;

const VPC: &str = "name: vpc\nexport_outputs: [vpc_id]\n";
const APP: &str = "name: app\ndepends_on: vpc\n";

fn vpc_provisioner() -> FakeProvisioner {
    let mut outputs = host_outputs();
    outputs.push(("vpc_id", Value::from("vpc-123")));
    FakeProvisioner::with_outputs(&outputs)
}

fn parent(s: &str) -> Option<ParentRef> {
    Some(s.parse().expect("valid parent ref"))
}

// ── Default workflow ──────────────────────────────────────────────────────────

#[tokio::test]
async fn default_run_captures_outputs_and_writes_export_file() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC)]);
    let h = Harness::new(vpc_provisioner());

    let report = fx.run(&h, &repo, &request("vpc", "test")).await.expect("run");

    assert_eq!(report.completed, vec!["plan", "apply", "output", "ansible"]);
    assert_eq!(h.provisioner.calls(), vec!["plan", "show", "apply", "output"]);
    assert_eq!(fx.read("vpc", "test", "export.tfvars"), "vpc_id = \"vpc-123\"\n");
    assert_eq!(
        fx.read("vpc", "test", "hosts"),
        "[all]\nweb-1 ansible_host=10.0.0.5\n"
    );
    assert_eq!(fx.read("vpc", "test", "ssh_config"), "Host web-1\n  User admin\n");
    assert!(fx.file("vpc", "test", "vpc.tfstate").is_file());
    assert!(fx.file("vpc", "test", "vpc.tfplan").is_file());

    let runs = h.config.playbook_runs();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].inventory.ends_with("hosts"));
    assert!(runs[0].playbook.ends_with("ansible/play.yml"));
    assert!(h.config.installs.lock().expect("lock").is_empty());

    let marker = fx.marker("vpc", "test");
    assert_eq!(marker.last_completed_step.as_deref(), Some("ansible"));
    assert!(marker.pending_steps.is_empty());
    assert!(marker.outputs_captured);
    assert_eq!(marker.author, "tester@ci");

    // The lock is gone once the run ends.
    assert!(!fx.file("vpc", "test", ".lock").exists());
}

#[tokio::test]
async fn plan_variables_are_cached_and_exported_with_prefix() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module(
        "vpc",
        "name: vpc\nexport_prefix: vpc_\nexport_outputs: [vpc_id]\n",
    )]);
    let mut provisioner = vpc_provisioner();
    provisioner.plan_variables = [
        ("region".to_string(), Value::from("eu-west-1")),
        ("azs".to_string(), Value::from(3)),
    ]
    .into_iter()
    .collect();
    let h = Harness::new(provisioner);

    fx.run(&h, &repo, &request("vpc", "test")).await.expect("run");

    assert_eq!(
        fx.read("vpc", "test", "variables.tfvars"),
        "azs = \"3\"\nregion = \"eu-west-1\"\n"
    );
    assert_eq!(
        fx.read("vpc", "test", "export.tfvars"),
        "vpc_azs = \"3\"\nvpc_region = \"eu-west-1\"\nvpc_id = \"vpc-123\"\n"
    );
}

#[tokio::test]
async fn requirements_are_installed_once_when_present() {
    let fx = Fixture::new();
    let module = fx.module("vpc", VPC);
    std::fs::create_dir_all(module.module_dir.join("ansible")).expect("ansible dir");
    std::fs::write(module.requirements(), "- src: geerlingguy.docker\n").expect("requirements");
    let repo = fx.repository(vec![module]);
    let h = Harness::new(vpc_provisioner());

    fx.run(&h, &repo, &request("vpc", "test")).await.expect("run");

    assert_eq!(h.config.installs.lock().expect("lock").len(), 1);
    assert_eq!(h.config.playbook_runs().len(), 1);
}

#[tokio::test]
async fn git_branch_is_passed_even_when_unknown() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module(
        "vpc",
        "name: vpc\nterraform_vars: { region: eu-west-1 }\n",
    )]);
    let h = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));

    fx.run(&h, &repo, &with_steps(request("vpc", "test"), &["plan"]))
        .await
        .expect("run");

    let target = h.provisioner.last_target();
    assert_eq!(target.variables.get("region").map(String::as_str), Some("eu-west-1"));
    assert_eq!(target.variables.get("git_branch").map(String::as_str), Some(""));
}

// ── Parents ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn child_without_provisioned_parent_fails_before_any_tool_runs() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC), fx.module("app", APP)]);
    let h = Harness::new(vpc_provisioner());

    let mut req = request("app", "test");
    req.parent = parent("vpc/test");
    let err = fx.run(&h, &repo, &req).await.expect_err("parent missing");

    assert!(matches!(
        err.downcast_ref::<DependencyError>(),
        Some(DependencyError::ParentNotProvisioned { parent, .. }) if parent == "vpc/test"
    ));
    assert_eq!(ExitClass::of(&err), ExitClass::Dependency);
    assert!(h.provisioner.calls().is_empty());
    assert!(!fx.file("app", "test", ".lock").exists());
}

#[tokio::test]
async fn child_imports_parent_export_and_plans_with_it() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC), fx.module("app", APP)]);
    let h = Harness::new(vpc_provisioner());
    fx.run(&h, &repo, &request("vpc", "test")).await.expect("parent run");

    let child = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));
    let mut req = request("app", "prod");
    req.parent = parent("vpc/test");
    fx.run(&child, &repo, &req).await.expect("child run");

    assert_eq!(fx.read("app", "prod", "parent.tfvars"), "vpc_id = \"vpc-123\"\n");
    let plan_target = child.provisioner.targets.lock().expect("lock")[0].clone();
    assert!(
        plan_target
            .var_files
            .iter()
            .any(|f| f.ends_with("parent.tfvars")),
        "plan must read the imported parent file: {:?}",
        plan_target.var_files
    );
}

#[tokio::test]
async fn child_without_parent_reference_is_rejected_when_planning() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC), fx.module("app", APP)]);
    let h = Harness::new(vpc_provisioner());

    let err = fx.run(&h, &repo, &request("app", "test")).await.expect_err("no parent");
    assert!(matches!(
        err.downcast_ref::<DependencyError>(),
        Some(DependencyError::MissingParent { parent, .. }) if parent == "vpc"
    ));
}

#[tokio::test]
async fn child_steps_without_plan_do_not_need_a_parent() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC), fx.module("app", APP)]);
    let h = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));

    let report = fx
        .run(&h, &repo, &with_steps(request("app", "test"), &["output"]))
        .await
        .expect("output needs no parent");
    assert_eq!(report.completed, vec!["output"]);
}

// ── Failures and state ────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_required_output_fails_before_writing_anything() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let h = Harness::new(FakeProvisioner::with_outputs(&[(
        "ansible_hosts",
        Value::from("[all]\n"),
    )]));

    let err = fx.run(&h, &repo, &request("vpc", "test")).await.expect_err("missing");

    assert!(matches!(
        err.downcast_ref::<StepError>(),
        Some(StepError::MissingRequiredOutput { missing }) if missing == &["ssh_config"]
    ));
    assert_eq!(ExitClass::of(&err), ExitClass::Validation);
    assert!(!fx.file("vpc", "test", "outputs.json").exists());
    assert!(!fx.file("vpc", "test", "hosts").exists());
    assert!(h.config.playbook_runs().is_empty());

    let marker = fx.marker("vpc", "test");
    assert_eq!(marker.last_completed_step.as_deref(), Some("apply"));
    assert_eq!(marker.pending_steps, vec!["output", "ansible"]);
    assert!(!fx.file("vpc", "test", ".lock").exists(), "lock released on failure");
}

#[tokio::test]
async fn missing_export_output_keeps_previous_captures() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC)]);
    fx.run(&Harness::new(vpc_provisioner()), &repo, &request("vpc", "test"))
        .await
        .expect("first run");
    let outputs_before = fx.read("vpc", "test", "outputs.json");

    let h = Harness::new(FakeProvisioner::with_outputs(&[
        ("ansible_hosts", Value::from("[all]\nNEW\n")),
        ("ssh_config", Value::from("Host new\n")),
    ]));
    let err = fx
        .run(&h, &repo, &with_steps(request("vpc", "test"), &["output"]))
        .await
        .expect_err("vpc_id is exported but not produced");

    assert!(matches!(
        err.downcast_ref::<StepError>(),
        Some(StepError::MissingRequiredOutput { missing }) if missing == &["vpc_id"]
    ));
    assert_eq!(
        fx.read("vpc", "test", "hosts"),
        "[all]\nweb-1 ansible_host=10.0.0.5\n"
    );
    assert_eq!(fx.read("vpc", "test", "ssh_config"), "Host web-1\n  User admin\n");
    assert_eq!(fx.read("vpc", "test", "outputs.json"), outputs_before);
    assert_eq!(fx.read("vpc", "test", "export.tfvars"), "vpc_id = \"vpc-123\"\n");
}

#[tokio::test]
async fn resume_continues_from_the_failed_step() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let mut failing = FakeProvisioner::with_outputs(&host_outputs());
    failing.fail = Some("output");
    let h = Harness::new(failing);
    fx.run(&h, &repo, &request("vpc", "test")).await.expect_err("output fails");

    let fixed = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));
    let mut req = request("vpc", "test");
    req.resume = true;
    let report = fx.run(&fixed, &repo, &req).await.expect("resume");

    assert_eq!(report.completed, vec!["output", "ansible"]);
    assert_eq!(fixed.provisioner.calls(), vec!["output"]);
    assert!(fx.marker("vpc", "test").pending_steps.is_empty());
}

#[tokio::test]
async fn resume_with_nothing_pending_is_a_noop() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let h = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));

    let mut req = request("vpc", "test");
    req.resume = true;
    let report = fx.run(&h, &repo, &req).await.expect("noop");

    assert!(report.completed.is_empty());
    assert!(h.provisioner.calls().is_empty());
    assert_eq!(h.reporter.warnings().len(), 1);
}

#[tokio::test]
async fn apply_failure_still_persists_state() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let mut provisioner = FakeProvisioner::with_outputs(&host_outputs());
    provisioner.fail = Some("apply");
    let h = Harness::new(provisioner);

    let err = fx.run(&h, &repo, &request("vpc", "test")).await.expect_err("apply fails");

    assert_eq!(ExitClass::of(&err), ExitClass::ExternalTool);
    assert!(format!("{err:#}").contains("Error: simulated failure"));
    assert_eq!(fx.read("vpc", "test", "vpc.tfstate"), "{\"serial\": 1}");
    assert_eq!(
        fx.marker("vpc", "test").pending_steps,
        vec!["apply", "output", "ansible"]
    );
}

#[tokio::test]
async fn locked_workspace_is_rejected() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let h = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));

    let LockAttempt::Acquired(held) = fx
        .storage
        .acquire_lock("vpc/test", "alice@laptop")
        .await
        .expect("lock")
    else {
        panic!("fresh workspace must be lockable");
    };

    let err = fx.run(&h, &repo, &request("vpc", "test")).await.expect_err("locked");
    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::DeploymentLocked { holder, .. }) if holder == "alice@laptop"
    ));
    assert_eq!(ExitClass::of(&err), ExitClass::Locked);
    assert!(h.provisioner.calls().is_empty());

    fx.storage.release_lock(held).await.expect("release");
    fx.run(&h, &repo, &request("vpc", "test")).await.expect("runs once released");
}

#[tokio::test]
async fn interrupt_stops_between_steps() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let flag = Arc::new(AtomicBool::new(false));
    let mut provisioner = FakeProvisioner::with_outputs(&host_outputs());
    provisioner.interrupt_during = Some(("apply", Arc::clone(&flag)));
    let h = Harness::new(provisioner);

    let report = strata_cli::application::services::run::run_deployment(
        h.ports(&fx.storage),
        &fx.ctx,
        &repo,
        &request("vpc", "test"),
        "tester@ci",
        &flag,
    )
    .await;
    let err = report.expect_err("interrupted");

    assert!(matches!(
        err.downcast_ref::<StepError>(),
        Some(StepError::Interrupted { last_completed: Some(step) }) if step == "apply"
    ));
    assert_eq!(ExitClass::of(&err).code(), 130);
    assert_eq!(h.provisioner.calls(), vec!["plan", "show", "apply"]);
    let marker = fx.marker("vpc", "test");
    assert_eq!(marker.last_completed_step.as_deref(), Some("apply"));
    assert_eq!(marker.pending_steps, vec!["output", "ansible"]);
    assert!(!fx.file("vpc", "test", ".lock").exists());
}

#[tokio::test]
async fn corrupt_marker_is_reported() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    std::fs::create_dir_all(fx.file("vpc", "test", "")).expect("workspace");
    std::fs::write(fx.file("vpc", "test", "deployment.json"), "{ half").expect("garbage");
    let h = Harness::new(FakeProvisioner::with_outputs(&host_outputs()));

    let err = fx.run(&h, &repo, &request("vpc", "test")).await.expect_err("corrupt");
    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::CorruptState { .. })
    ));
    assert_eq!(ExitClass::of(&err), ExitClass::Corrupt);
    assert!(h.provisioner.calls().is_empty());
}

#[tokio::test]
async fn unknown_step_override_is_rejected_before_locking() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", "name: vpc\n")]);
    let h = Harness::new(FakeProvisioner::default());

    let err = fx
        .run(&h, &repo, &with_steps(request("vpc", "test"), &["plan", "deploy"]))
        .await
        .expect_err("unknown step");
    assert!(matches!(
        err.downcast_ref::<ValidationError>(),
        Some(ValidationError::UnknownStep { step, .. }) if step == "deploy"
    ));
    assert!(!fx.file("vpc", "test", "").exists(), "nothing written");
}

#[tokio::test]
async fn unknown_module_lists_choices() {
    let fx = Fixture::new();
    let repo = fx.repository(vec![fx.module("vpc", VPC), fx.module("app", APP)]);
    let h = Harness::new(FakeProvisioner::default());

    let err = fx.run(&h, &repo, &request("db", "test")).await.expect_err("unknown");
    assert_eq!(
        err.to_string(),
        "Unknown module: db, available choices: app, vpc"
    );
}
