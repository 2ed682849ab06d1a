//! Application service — run a deployment's steps.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through injected port traits.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use anyhow::Result;

use crate::application::ports::{
    CommandRunner, ConfigRunner, LockAttempt, Provisioner, StorageProvider,
};
use crate::application::services::executor::{RunPorts, RunReport, StepExecutor};
use crate::application::services::{exchange, resolver};
use crate::domain::config::RunContext;
use crate::domain::deployment::{Deployment, MARKER_FILE, ParentRef};
use crate::domain::error::{StateError, ValidationError};
use crate::domain::module::{ModuleDefinition, ModuleRepository};
use crate::domain::state::RunMarker;

/// Provisioner variable carrying the current branch of the module's checkout.
pub const GIT_BRANCH_VAR: &str = "git_branch";

/// What the operator asked to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub module: String,
    pub project: String,
    pub parent: Option<ParentRef>,
    /// Explicit step list; `None` runs the module's default steps.
    pub steps: Option<Vec<String>>,
    /// Run the steps left pending by the last interrupted or failed run.
    pub resume: bool,
}

/// Run a deployment under its workspace lock.
///
/// The lock is released on every path out, including failures.
///
/// # Errors
///
/// Returns validation, dependency, lock, storage or step errors; see
/// `ExitClass` for how they map to exit codes.
pub async fn run_deployment<P, C, R, S>(
    ports: RunPorts<'_, P, C, R, S>,
    ctx: &RunContext,
    repository: &ModuleRepository,
    request: &RunRequest,
    author: &str,
    interrupted: &AtomicBool,
) -> Result<RunReport>
where
    P: Provisioner,
    C: ConfigRunner,
    R: CommandRunner,
    S: StorageProvider,
{
    let module = repository.get(&request.module)?;
    if let Some(steps) = &request.steps {
        check_steps(module, steps)?;
    }
    let deployment = Deployment::new(module.clone(), &request.project, request.parent.clone())?;

    let steps = match (&request.steps, request.resume) {
        (Some(steps), _) => steps.clone(),
        (None, true) => {
            let pending = pending_steps(ports.storage, &deployment).await?;
            if pending.is_empty() {
                ports
                    .reporter
                    .warn(&format!("{deployment} has no pending steps to resume"));
                return Ok(RunReport::default());
            }
            check_steps(module, &pending)?;
            pending
        }
        (None, false) => module.default_steps.clone(),
    };

    let needs_parent = steps
        .iter()
        .filter_map(|s| module.handler(s))
        .any(|h| h.requires_parents());
    let parent = if deployment.parent.is_some() || needs_parent {
        resolver::resolve(ports.storage, module, deployment.parent.as_ref()).await?
    } else {
        None
    };

    let workspace = deployment.workspace();
    let lock = match ports.storage.acquire_lock(workspace.as_str(), author).await? {
        LockAttempt::Acquired(lock) => lock,
        LockAttempt::Held { holder } => {
            return Err(StateError::DeploymentLocked {
                workspace: workspace.to_string(),
                holder,
            }
            .into());
        }
    };
    tracing::debug!(%deployment, author, "workspace locked");

    let storage = ports.storage;
    let locked = Locked {
        deployment: &deployment,
        parent: parent.as_ref(),
        steps: &steps,
        author,
    };
    let result = run_locked(ports, ctx, locked, interrupted).await;

    if let Err(e) = storage.release_lock(lock).await {
        tracing::warn!(error = %format!("{e:#}"), %deployment, "failed to release workspace lock");
    }
    result
}

struct Locked<'a> {
    deployment: &'a Deployment,
    parent: Option<&'a ParentRef>,
    steps: &'a [String],
    author: &'a str,
}

async fn run_locked<P, C, R, S>(
    ports: RunPorts<'_, P, C, R, S>,
    ctx: &RunContext,
    run: Locked<'_>,
    interrupted: &AtomicBool,
) -> Result<RunReport>
where
    P: Provisioner,
    C: ConfigRunner,
    R: CommandRunner,
    S: StorageProvider,
{
    let deployment = run.deployment;
    if let Some(parent) = run.parent {
        exchange::import_variables(ports.storage, deployment, parent).await?;
    }

    let module = &deployment.module;
    let mut variables: BTreeMap<String, String> = module.terraform_vars.clone();
    let branch = git_branch(ports.runner, module).await.unwrap_or_default();
    variables.insert(GIT_BRANCH_VAR.to_string(), branch);

    tracing::info!(%deployment, steps = %run.steps.join(","), "running steps");
    let mut executor = StepExecutor::prepare(
        ports,
        ctx,
        deployment,
        variables,
        run.author.to_string(),
        interrupted,
    )
    .await?;
    executor.run(run.steps).await
}

/// Reject step names the module does not define.
fn check_steps(module: &ModuleDefinition, steps: &[String]) -> Result<(), ValidationError> {
    match steps.iter().find(|s| module.handler(s).is_none()) {
        Some(step) => Err(ValidationError::UnknownStep {
            step: step.clone(),
            choices: module.step_names().collect::<Vec<_>>().join(", "),
        }),
        None => Ok(()),
    }
}

async fn pending_steps(storage: &impl StorageProvider, deployment: &Deployment) -> Result<Vec<String>> {
    let key = deployment.workspace().file(MARKER_FILE);
    Ok(match storage.read_optional(&key).await? {
        Some(bytes) => RunMarker::parse(&bytes, &key)?.pending_steps,
        None => Vec::new(),
    })
}

/// Current branch of the module checkout, if it is a git work tree.
async fn git_branch(runner: &impl CommandRunner, module: &ModuleDefinition) -> Option<String> {
    let dir = module.module_dir.display().to_string();
    let output = runner
        .run("git", &["-C", &dir, "rev-parse", "--abbrev-ref", "HEAD"])
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty()).then_some(branch)
}
