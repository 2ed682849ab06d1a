//! Infrastructure implementation of the `Provisioner` port.
//!
//! `TerraformProvisioner<R>` routes all terraform CLI calls through a
//! `CommandRunner`. Every invocation runs with `-chdir` pointing at the
//! module's configuration directory and explicit state/plan paths in the
//! run's scratch workdir.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{CommandRunner, CommandSpec, Provisioner, ProvisionerTarget};
use crate::infra::command_runner::{check_output, check_status};

/// Infrastructure adapter that routes terraform calls through a `CommandRunner`.
///
/// Generic over `R: CommandRunner` so that tests can inject a mock runner
/// without spawning real processes.
pub struct TerraformProvisioner<R: CommandRunner> {
    runner: R,
    extra_args: Vec<String>,
}

#[derive(Deserialize)]
struct PlanVariable {
    value: Value,
}

#[derive(Deserialize)]
struct ShowPlan {
    #[serde(default)]
    variables: BTreeMap<String, PlanVariable>,
}

#[derive(Deserialize)]
struct OutputValue {
    value: Value,
}

impl<R: CommandRunner> TerraformProvisioner<R> {
    /// `extra_args` are appended to every plan and destroy.
    pub fn new(runner: R, extra_args: Vec<String>) -> Self {
        Self { runner, extra_args }
    }

    fn base(target: &ProvisionerTarget, subcommand: &str) -> CommandSpec {
        let mut cmd = CommandSpec::new("terraform")
            .arg(format!("-chdir={}", target.config_dir.display()))
            .arg(subcommand);
        for (name, value) in &target.variables {
            cmd = cmd.env(format!("TF_VAR_{name}"), value);
        }
        cmd
    }

    fn with_var_files(cmd: CommandSpec, target: &ProvisionerTarget) -> CommandSpec {
        cmd.args(
            target
                .var_files
                .iter()
                .map(|f| format!("-var-file={}", f.display())),
        )
    }
}

impl<R: CommandRunner> Provisioner for TerraformProvisioner<R> {
    async fn plan(&self, target: &ProvisionerTarget, plan_file: &Path) -> Result<()> {
        let cmd = Self::base(target, "plan")
            .arg(format!("-state={}", target.state_file.display()))
            .arg(format!("-out={}", plan_file.display()));
        let cmd = Self::with_var_files(cmd, target).args(self.extra_args.iter().cloned());
        let status = self
            .runner
            .run_status(&cmd)
            .await
            .context("terraform plan")?;
        check_status("terraform plan", status)
    }

    async fn plan_variables(
        &self,
        target: &ProvisionerTarget,
        plan_file: &Path,
    ) -> Result<BTreeMap<String, Value>> {
        let cmd = Self::base(target, "show")
            .arg("-json")
            .arg(plan_file.display().to_string());
        let output = self
            .runner
            .output(&cmd)
            .await
            .context("terraform show")?;
        let output = check_output("terraform show", output)?;
        let plan: ShowPlan =
            serde_json::from_slice(&output.stdout).context("parsing terraform show -json output")?;
        Ok(plan
            .variables
            .into_iter()
            .map(|(name, var)| (name, var.value))
            .collect())
    }

    async fn apply(&self, target: &ProvisionerTarget, plan_file: &Path) -> Result<()> {
        // A saved plan carries its own variables; apply takes only the state
        // destination and the plan.
        let cmd = Self::base(target, "apply")
            .arg(format!("-state-out={}", target.state_file.display()))
            .arg(plan_file.display().to_string());
        let status = self
            .runner
            .run_status(&cmd)
            .await
            .context("terraform apply")?;
        check_status("terraform apply", status)
    }

    async fn outputs(&self, target: &ProvisionerTarget) -> Result<BTreeMap<String, Value>> {
        let cmd = Self::base(target, "output")
            .arg(format!("-state={}", target.state_file.display()))
            .arg("-no-color")
            .arg("-json");
        let output = self
            .runner
            .output(&cmd)
            .await
            .context("terraform output")?;
        let output = check_output("terraform output", output)?;
        let outputs: BTreeMap<String, OutputValue> = serde_json::from_slice(&output.stdout)
            .context("parsing terraform output -json")?;
        Ok(outputs
            .into_iter()
            .map(|(name, out)| (name, out.value))
            .collect())
    }

    async fn destroy(&self, target: &ProvisionerTarget) -> Result<()> {
        let cmd = Self::base(target, "destroy")
            .arg(format!("-state={}", target.state_file.display()));
        let cmd = Self::with_var_files(cmd, target).args(self.extra_args.iter().cloned());
        let status = self
            .runner
            .run_status(&cmd)
            .await
            .context("terraform destroy")?;
        check_status("terraform destroy", status)
    }

    async fn version(&self) -> Result<String> {
        let output = self
            .runner
            .run("terraform", &["version", "-json"])
            .await
            .context("terraform version")?;
        let output = check_output("terraform version", output)?;
        let parsed: Value = serde_json::from_slice(&output.stdout)
            .context("parsing terraform version -json")?;
        parsed
            .get("terraform_version")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("terraform version output has no terraform_version"))
    }
}
