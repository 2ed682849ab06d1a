//! Application service — the step executor.
//!
//! Runs a deployment's steps strictly in order against a per-run scratch
//! workdir. Files the tools need are materialised from storage into the
//! workdir before the first step, and every file a step produces is written
//! back to storage, so local and remote storage behave the same. The scratch
//! workdir is the only local filesystem state this service touches itself;
//! everything persistent goes through `StorageProvider`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::application::ports::{
    CommandRunner, CommandSpec, ConfigRunner, Confirm, PlaybookRun, ProgressReporter,
    Provisioner, ProvisionerTarget, StorageProvider,
};
use crate::application::services::exchange;
use crate::domain::config::RunContext;
use crate::domain::deployment::{
    Deployment, EXPORT_FILE, LOCK_FILE, MARKER_FILE, OUTPUTS_JSON, PARENT_FILE, VARIABLES_JSON,
    VARIABLES_TFVARS,
};
use crate::domain::error::{StepError, ValidationError};
use crate::domain::module::{
    BuiltinStep, CommandStep, INVENTORY_OUTPUT, SSH_CONFIG_OUTPUT, StepHandler,
};
use crate::domain::state::RunMarker;
use crate::domain::tfvars::render_variables;

// ── Ports bundle ──────────────────────────────────────────────────────────────

/// The ports a run talks to, borrowed for the duration of the run.
pub struct RunPorts<'a, P, C, R, S> {
    pub provisioner: &'a P,
    pub config_runner: &'a C,
    pub runner: &'a R,
    pub storage: &'a S,
    pub reporter: &'a dyn ProgressReporter,
    pub confirm: &'a dyn Confirm,
}

// ── Results ───────────────────────────────────────────────────────────────────

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// The step had nothing to do and did not invoke any tool.
    Skipped,
    /// The operator declined a confirmation; the run stops here.
    Declined,
}

/// Summary of an executed step list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    /// The run stopped early at an operator prompt.
    pub declined: Option<String>,
}

// ── Executor ──────────────────────────────────────────────────────────────────

/// Executes steps for one deployment.
pub struct StepExecutor<'a, P, C, R, S> {
    ports: RunPorts<'a, P, C, R, S>,
    ctx: &'a RunContext,
    deployment: &'a Deployment,
    /// Provisioner variables passed through the environment.
    variables: BTreeMap<String, String>,
    author: String,
    interrupted: &'a AtomicBool,
    workdir: TempDir,
    marker: RunMarker,
    requirements_installed: bool,
}

impl<'a, P, C, R, S> StepExecutor<'a, P, C, R, S>
where
    P: Provisioner,
    C: ConfigRunner,
    R: CommandRunner,
    S: StorageProvider,
{
    /// Load the run marker and materialise the workspace into a fresh
    /// scratch workdir.
    ///
    /// # Errors
    ///
    /// Returns `StateError::CorruptState` for an unreadable marker, or any
    /// storage error.
    pub async fn prepare(
        ports: RunPorts<'a, P, C, R, S>,
        ctx: &'a RunContext,
        deployment: &'a Deployment,
        variables: BTreeMap<String, String>,
        author: String,
        interrupted: &'a AtomicBool,
    ) -> Result<Self> {
        let workdir = tempfile::Builder::new()
            .prefix("strata-run-")
            .tempdir()
            .context("creating scratch workdir")?;
        let workspace = deployment.workspace();
        let marker_key = workspace.file(MARKER_FILE);
        let marker = match ports.storage.read_optional(&marker_key).await? {
            Some(bytes) => RunMarker::parse(&bytes, &marker_key)?,
            None => RunMarker::default(),
        };

        let executor = Self {
            ports,
            ctx,
            deployment,
            variables,
            author,
            interrupted,
            workdir,
            marker,
            requirements_installed: false,
        };
        executor.materialise().await?;
        Ok(executor)
    }

    /// The run marker as currently known.
    #[must_use]
    pub fn marker(&self) -> &RunMarker {
        &self.marker
    }

    /// Scratch directory the tools run against.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Run `steps` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the failing step's error, `StepError::Interrupted` when an
    /// interrupt was observed, or `ValidationError::UnknownStep`.
    pub async fn run(&mut self, steps: &[String]) -> Result<RunReport> {
        let mut report = RunReport::default();

        for (index, name) in steps.iter().enumerate() {
            let remaining = &steps[index..];
            if self.interrupted.load(Ordering::SeqCst) {
                self.halt(remaining).await;
                return Err(self.interrupted_error());
            }

            let handler = self
                .deployment
                .module
                .handler(name)
                .cloned()
                .ok_or_else(|| ValidationError::UnknownStep {
                    step: name.clone(),
                    choices: self.deployment.module.step_names().collect::<Vec<_>>().join(", "),
                })?;

            self.ports
                .reporter
                .step(&format!("{name} ({})", self.deployment));
            let outcome = match self.run_step(name, &handler).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.halt(remaining).await;
                    if self.interrupted.load(Ordering::SeqCst) {
                        tracing::debug!(error = %format!("{e:#}"), "step failed after interrupt");
                        return Err(self.interrupted_error());
                    }
                    return Err(e.context(format!("step '{name}' failed")));
                }
            };

            match outcome {
                StepOutcome::Declined => {
                    report.declined = Some(name.clone());
                    return Ok(report);
                }
                StepOutcome::Skipped => report.skipped.push(name.clone()),
                StepOutcome::Completed => {
                    self.ports.reporter.success(&format!("{name} completed"));
                    report.completed.push(name.clone());
                }
            }

            if records_progress(&handler) {
                self.marker.complete(
                    name,
                    &steps[index + 1..],
                    &self.author,
                    chrono::Utc::now(),
                );
                self.save_marker().await?;
            }
        }

        Ok(report)
    }

    async fn run_step(&mut self, name: &str, handler: &StepHandler) -> Result<StepOutcome> {
        match handler {
            StepHandler::Builtin(BuiltinStep::Plan) => self.plan().await,
            StepHandler::Builtin(BuiltinStep::Apply) => self.apply().await,
            StepHandler::Builtin(BuiltinStep::Output) => self.output().await,
            StepHandler::Builtin(BuiltinStep::Ansible) => self.ansible().await,
            StepHandler::Builtin(BuiltinStep::Destroy) => self.destroy().await,
            StepHandler::Builtin(BuiltinStep::Cleanup) => self.cleanup().await,
            StepHandler::Builtin(BuiltinStep::Pull) => self.pull().await,
            StepHandler::Command(cmd) => self.command(name, cmd).await,
        }
    }

    // ── Built-in steps ────────────────────────────────────────────────────────

    async fn plan(&mut self) -> Result<StepOutcome> {
        let target = self.target(&[]);
        let plan_file = self.local(&self.deployment.plan_file());
        self.ports.provisioner.plan(&target, &plan_file).await?;

        let variables = self
            .ports
            .provisioner
            .plan_variables(&target, &plan_file)
            .await?;
        let json = serde_json::to_vec_pretty(&variables).context("serializing plan variables")?;
        self.store(VARIABLES_JSON, &json).await?;
        self.store(VARIABLES_TFVARS, render_variables("", &variables).as_bytes())
            .await?;
        self.persist(&self.deployment.plan_file()).await?;
        Ok(StepOutcome::Completed)
    }

    async fn apply(&mut self) -> Result<StepOutcome> {
        let plan_file = self.local(&self.deployment.plan_file());
        if !plan_file.is_file() {
            return Err(StepError::Precondition {
                step: "apply".into(),
                reason: "no saved plan; run the plan step first".into(),
            }
            .into());
        }
        let target = self.target(&[]);
        let result = self.ports.provisioner.apply(&target, &plan_file).await;
        // Partial state is still state.
        self.persist_state().await?;
        result?;
        Ok(StepOutcome::Completed)
    }

    async fn output(&mut self) -> Result<StepOutcome> {
        let target = self.target(&[]);
        let outputs = self.ports.provisioner.outputs(&target).await?;

        // Exported outputs are required too; nothing is stored until both hold.
        let module = &self.deployment.module;
        let mut missing: Vec<String> = Vec::new();
        for name in module.required_outputs.iter().chain(&module.export_outputs) {
            if !outputs.contains_key(name) && !missing.contains(name) {
                missing.push(name.clone());
            }
        }
        if !missing.is_empty() {
            return Err(StepError::MissingRequiredOutput { missing }.into());
        }

        let json = serde_json::to_vec_pretty(&outputs).context("serializing outputs")?;
        self.store(OUTPUTS_JSON, &json).await?;

        for (name, file) in &self.deployment.module.captured_outputs {
            let Some(value) = outputs.get(name) else {
                tracing::debug!(output = %name, "output not produced, not captured");
                continue;
            };
            let bytes = match value {
                serde_json::Value::String(s) => s.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            };
            tracing::info!(output = %name, file = %file, "capturing output");
            self.store(file, &bytes).await?;
        }

        if let Some(bytes) = exchange::export_variables(self.ports.storage, self.deployment).await? {
            self.write_local(EXPORT_FILE, &bytes)?;
        } else {
            self.remove_local(EXPORT_FILE);
        }
        self.marker.outputs_captured = true;
        Ok(StepOutcome::Completed)
    }

    async fn ansible(&mut self) -> Result<StepOutcome> {
        if !self.marker.outputs_captured {
            self.skip("no outputs have been captured yet; run the output step first");
            return Ok(StepOutcome::Skipped);
        }
        let module = &self.deployment.module;
        let captured = |name: &str| {
            module
                .captured_outputs
                .get(name)
                .map(|file| self.local(file))
                .filter(|path| path.is_file())
        };
        let (Some(inventory), Some(ssh_config)) =
            (captured(INVENTORY_OUTPUT), captured(SSH_CONFIG_OUTPUT))
        else {
            self.skip("inventory or SSH configuration output is missing");
            return Ok(StepOutcome::Skipped);
        };

        let requirements = module.requirements();
        if requirements.is_file() && !self.requirements_installed {
            self.ports.reporter.step("installing ansible requirements");
            self.ports
                .config_runner
                .install_requirements(&requirements)
                .await?;
            self.requirements_installed = true;
        }

        let run = PlaybookRun {
            playbook: module.playbook(),
            inventory,
            ssh_config,
            ssh_key: self.ctx.ssh_key.clone(),
            extra_args: module.ansible_args.clone(),
            cwd: module.module_dir.clone(),
        };
        self.ports.config_runner.run_playbook(&run).await?;
        Ok(StepOutcome::Completed)
    }

    async fn destroy(&mut self) -> Result<StepOutcome> {
        let cache = self.local(VARIABLES_TFVARS);
        let extra = if cache.is_file() {
            vec![cache]
        } else {
            self.ports
                .reporter
                .warn("variable cache not found, destroying without it");
            Vec::new()
        };
        let mut target = self.target(&extra);
        // The cache already holds every inherited value.
        let parent = self.local(PARENT_FILE);
        target.var_files.retain(|f| f != &parent);

        let result = self.ports.provisioner.destroy(&target).await;
        self.persist_state().await?;
        result?;

        let mut gone: Vec<String> = self
            .deployment
            .module
            .captured_outputs
            .values()
            .cloned()
            .collect();
        gone.extend([
            EXPORT_FILE.to_string(),
            OUTPUTS_JSON.to_string(),
            self.deployment.plan_file(),
        ]);
        for name in &gone {
            self.ports
                .storage
                .delete(&self.deployment.workspace().file(name))
                .await?;
            self.remove_local(name);
        }
        self.marker.outputs_captured = false;
        Ok(StepOutcome::Completed)
    }

    async fn cleanup(&mut self) -> Result<StepOutcome> {
        let workspace = self.deployment.workspace();
        let lock = workspace.file(LOCK_FILE);
        let files: Vec<String> = self
            .ports
            .storage
            .list(&workspace.prefix())
            .await?
            .into_iter()
            .filter(|k| k != &lock)
            .collect();
        if files.is_empty() {
            self.ports.reporter.success("nothing to clean up");
            return Ok(StepOutcome::Skipped);
        }

        self.ports.reporter.warn("files that will be deleted:");
        for file in &files {
            self.ports.reporter.warn(&format!("  {file}"));
        }
        let prompt = format!(
            "Delete all {} state files of {}?",
            files.len(),
            self.deployment
        );
        if !self.ports.confirm.confirm(&prompt, false)? {
            self.ports.reporter.warn("cleanup cancelled");
            return Ok(StepOutcome::Declined);
        }

        for file in &files {
            self.ports.storage.delete(file).await?;
        }
        self.marker = RunMarker::default();
        Ok(StepOutcome::Completed)
    }

    async fn pull(&mut self) -> Result<StepOutcome> {
        if !self.ports.storage.is_remote() {
            self.ports.reporter.success(&format!(
                "state is stored locally in {}; nothing to pull",
                self.ports.storage.describe()
            ));
            return Ok(StepOutcome::Skipped);
        }

        let workspace = self.deployment.workspace();
        let dest = self.ctx.working_dir.join(format!(
            "state-{}-{}",
            self.deployment.module.name, self.deployment.project
        ));
        let prefix = workspace.prefix();
        let lock = workspace.file(LOCK_FILE);
        for key in self.ports.storage.list(&prefix).await? {
            if key == lock {
                continue;
            }
            let Some(rel) = key.strip_prefix(&prefix) else {
                continue;
            };
            let bytes = self.ports.storage.read(&key).await?;
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(from = %key, to = %path.display(), "copied");
        }
        self.ports
            .reporter
            .success(&format!("state copied to {}", dest.display()));
        Ok(StepOutcome::Completed)
    }

    async fn command(&mut self, name: &str, cmd: &CommandStep) -> Result<StepOutcome> {
        let mut argv = Vec::with_capacity(cmd.argv.len());
        for arg in &cmd.argv {
            argv.push(self.expand(name, arg)?);
        }
        let Some((program, args)) = argv.split_first() else {
            return Err(StepError::Precondition {
                step: name.to_string(),
                reason: "empty command".into(),
            }
            .into());
        };

        let mut spec = CommandSpec::new(program.clone())
            .args(args.iter().cloned())
            .current_dir(&self.deployment.module.module_dir);
        for (key, value) in &cmd.env {
            spec = spec.env(key.clone(), self.expand(name, value)?);
        }

        let status = self
            .ports
            .runner
            .run_status(&spec)
            .await
            .with_context(|| format!("running step '{name}'"))?;
        if !status.success() {
            return Err(StepError::ExternalToolFailure {
                tool: spec.program,
                status: status.to_string(),
                stderr: String::new(),
            }
            .into());
        }
        Ok(StepOutcome::Completed)
    }

    /// Substitute `{module}`, `{project}`, `{workdir}`, `{module_dir}` and
    /// `{output:<name>}` in a command argument.
    fn expand(&self, step: &str, template: &str) -> Result<String> {
        let module = &self.deployment.module;
        let mut out = template
            .replace("{module}", &module.name)
            .replace("{project}", &self.deployment.project)
            .replace("{workdir}", &self.workdir.path().display().to_string())
            .replace("{module_dir}", &module.module_dir.display().to_string());

        while let Some(start) = out.find("{output:") {
            let Some(len) = out[start..].find('}') else {
                break;
            };
            let name = &out[start + "{output:".len()..start + len];
            let path = module
                .captured_outputs
                .get(name)
                .map(|file| self.local(file))
                .filter(|path| path.is_file())
                .ok_or_else(|| StepError::Precondition {
                    step: step.to_string(),
                    reason: format!("output '{name}' has not been captured"),
                })?;
            out.replace_range(start..=start + len, &path.display().to_string());
        }
        Ok(out)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn skip(&self, reason: &str) {
        tracing::warn!(deployment = %self.deployment, reason, "skipping ansible");
        self.ports
            .reporter
            .warn(&format!("skipping ansible: {reason}"));
    }

    fn interrupted_error(&self) -> anyhow::Error {
        StepError::Interrupted {
            last_completed: self.marker.last_completed_step.clone(),
        }
        .into()
    }

    fn local(&self, name: &str) -> PathBuf {
        self.workdir.path().join(name)
    }

    fn target(&self, extra_var_files: &[PathBuf]) -> ProvisionerTarget {
        let mut var_files = self.ctx.var_files.clone();
        let parent = self.local(PARENT_FILE);
        if parent.is_file() {
            var_files.push(parent);
        }
        var_files.extend(extra_var_files.iter().cloned());
        ProvisionerTarget {
            config_dir: self.deployment.module.provisioner_dir(),
            state_file: self.local(&self.deployment.state_file()),
            var_files,
            variables: self.variables.clone(),
        }
    }

    /// Copy every workspace file except the marker and lock into the workdir.
    async fn materialise(&self) -> Result<()> {
        let workspace = self.deployment.workspace();
        let prefix = workspace.prefix();
        for key in self.ports.storage.list(&prefix).await? {
            let Some(rel) = key.strip_prefix(&prefix) else {
                continue;
            };
            if rel == MARKER_FILE || rel == LOCK_FILE {
                continue;
            }
            let bytes = self.ports.storage.read(&key).await?;
            self.write_local(rel, &bytes)?;
        }
        Ok(())
    }

    fn write_local(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.local(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    fn remove_local(&self, name: &str) {
        let _ = std::fs::remove_file(self.local(name));
    }

    /// Write a file to the workdir and to storage.
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.write_local(name, bytes)?;
        self.ports
            .storage
            .write(&self.deployment.workspace().file(name), bytes)
            .await
    }

    /// Copy a workdir file to storage, if the tool produced it.
    async fn persist(&self, name: &str) -> Result<()> {
        let path = self.local(name);
        if !path.is_file() {
            return Ok(());
        }
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        self.ports
            .storage
            .write(&self.deployment.workspace().file(name), &bytes)
            .await
    }

    async fn persist_state(&self) -> Result<()> {
        self.persist(&self.deployment.state_file()).await?;
        self.persist(&self.deployment.state_backup_file()).await
    }

    async fn save_marker(&self) -> Result<()> {
        let bytes = self.marker.to_bytes().context("serializing run marker")?;
        self.ports
            .storage
            .write(&self.deployment.workspace().file(MARKER_FILE), &bytes)
            .await
    }

    /// Record `remaining` as pending after a failure or interrupt. A failure
    /// to write is logged; the original error is what the operator needs.
    async fn halt(&mut self, remaining: &[String]) {
        self.marker
            .halt(remaining, &self.author, chrono::Utc::now());
        if let Err(e) = self.save_marker().await {
            tracing::warn!(error = %format!("{e:#}"), "could not record pending steps");
        }
    }
}

/// Steps that only read or remove the workspace leave no marker behind.
fn records_progress(handler: &StepHandler) -> bool {
    !matches!(
        handler,
        StepHandler::Builtin(BuiltinStep::Cleanup | BuiltinStep::Pull)
    )
}
