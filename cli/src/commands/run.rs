//! `strata run` — execute a module's steps for one project.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::app::AppContext;
use crate::application::services::executor::RunPorts;
use crate::application::services::run::{RunRequest, run_deployment};
use crate::commands::{StorageArgs, env_list, split_args};
use crate::domain::config::RunContext;
use crate::domain::deployment::ParentRef;
use crate::domain::error::ValidationError;
use crate::domain::module::{BuiltinStep, ModuleDefinition};
use crate::infra::ansible::AnsibleRunner;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::identity;
use crate::infra::module_repo::load_repository;
use crate::infra::storage::Storage;
use crate::infra::terraform::TerraformProvisioner;
use crate::output::TerminalReporter;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Module to run
    pub module: String,

    /// Project name of the deployment
    pub project: String,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Directory searched for module files (repeatable; default: current directory)
    #[arg(short = 'r', long = "module-repository", value_name = "DIR")]
    pub module_repositories: Vec<PathBuf>,

    /// Load an additional module file (repeatable)
    #[arg(long = "module-file", value_name = "FILE")]
    pub module_files: Vec<PathBuf>,

    /// Variable file passed to every provisioner run (repeatable)
    #[arg(long = "var-file", value_name = "FILE")]
    pub var_files: Vec<PathBuf>,

    /// Private key handed to ansible
    #[arg(long, env = "STRATA_SSH_KEY", value_name = "FILE")]
    pub ssh_key: Option<PathBuf>,

    /// Extra arguments for terraform plan and destroy
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub terraform_args: Option<String>,

    /// Extra arguments for ansible-playbook
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub ansible_args: Option<String>,

    /// Parent deployment the module depends on
    #[arg(long, value_name = "MODULE/PROJECT")]
    pub parent: Option<ParentRef>,

    /// Steps to run instead of the module's defaults, comma separated
    #[arg(
        short = 'o',
        long = "steps",
        value_delimiter = ',',
        value_name = "STEP",
        conflicts_with = "resume"
    )]
    pub steps: Option<Vec<String>>,

    /// Continue the steps left pending by the last failed or interrupted run
    #[arg(long)]
    pub resume: bool,

    /// Do not warn when no ssh-agent is running
    #[arg(long)]
    pub no_agent: bool,

    /// Answer yes to confirmation prompts
    #[arg(short, long, env = "STRATA_YES")]
    pub yes: bool,
}

/// Entry point for `strata run`.
///
/// # Errors
///
/// Returns validation errors before any tool runs, then whatever the run
/// service returns.
pub async fn run(app: &AppContext, args: RunArgs) -> Result<()> {
    let working_dir = std::env::current_dir().context("reading current directory")?;
    if identity::stray_state_file(&working_dir) {
        return Err(ValidationError::StrayStateFile.into());
    }
    let ctx = run_context(&args, working_dir)?;

    let repository = load_repository(&ctx.module_repositories, &ctx.module_files)?;
    let module = repository.get(&args.module)?;
    if !args.no_agent && runs_ansible(module, args.steps.as_deref()) && !identity::ssh_agent_available()
    {
        app.output.warn(
            "no ssh-agent found (SSH_AUTH_SOCK is unset); ansible may not reach the hosts. \
Pass --no-agent to silence this warning.",
        );
    }

    let storage = Storage::open(&ctx.storage)?;
    let runner = TokioCommandRunner::default();
    let provisioner =
        TerraformProvisioner::new(TokioCommandRunner::default(), ctx.terraform_args.clone());
    let ansible = AnsibleRunner::new(TokioCommandRunner::default(), ctx.ansible_args.clone());
    let reporter = TerminalReporter::new(&app.output);
    let ports = RunPorts {
        provisioner: &provisioner,
        config_runner: &ansible,
        runner: &runner,
        storage: &storage,
        reporter: &reporter,
        confirm: app,
    };

    let request = RunRequest {
        module: args.module,
        project: args.project,
        parent: args.parent,
        steps: args.steps,
        resume: args.resume,
    };
    let report = run_deployment(
        ports,
        &ctx,
        &repository,
        &request,
        &identity::whoami(),
        &app.interrupted,
    )
    .await?;

    let deployment = format!("{}/{}", request.module, request.project);
    if let Some(step) = report.declined {
        app.output.warn(&format!("{deployment}: stopped at '{step}'"));
    } else if !report.completed.is_empty() {
        app.output.success(&format!(
            "{deployment}: {} completed",
            report.completed.join(", ")
        ));
    }
    Ok(())
}

/// Fold flags and `STRATA_*` list variables into a `RunContext`.
fn run_context(args: &RunArgs, working_dir: PathBuf) -> Result<RunContext> {
    let mut ctx = RunContext::new(args.storage.location()?, working_dir);

    let mut repositories = args.module_repositories.clone();
    repositories.extend(env_list("STRATA_MODULE_REPOSITORY")?.into_iter().map(PathBuf::from));
    if !repositories.is_empty() {
        ctx.module_repositories = repositories;
    }
    ctx.module_files.clone_from(&args.module_files);

    ctx.var_files.clone_from(&args.var_files);
    ctx.var_files
        .extend(env_list("STRATA_VAR_FILES")?.into_iter().map(PathBuf::from));
    // Tools run in a scratch directory; relative paths must not move with them.
    for file in &mut ctx.var_files {
        if file.is_relative() {
            *file = ctx.working_dir.join(&*file);
        }
    }

    ctx.ssh_key = args.ssh_key.as_ref().map(|key| ctx.working_dir.join(key));
    ctx.terraform_args = split_args("--terraform-args", args.terraform_args.as_deref())?;
    ctx.ansible_args = split_args("--ansible-args", args.ansible_args.as_deref())?;
    Ok(ctx)
}

fn runs_ansible(module: &ModuleDefinition, steps: Option<&[String]>) -> bool {
    steps
        .unwrap_or(&module.default_steps)
        .iter()
        .filter_map(|s| module.handler(s))
        .any(|h| h.builtin() == Some(BuiltinStep::Ansible))
}
