//! `strata doctor` — tool, storage and environment diagnostics.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize as _;

use crate::app::AppContext;
use crate::application::services::doctor::{HostFacts, run_doctor};
use crate::commands::StorageArgs;
use crate::domain::health::{DoctorChecks, ToolCheck, collect_issues};
use crate::infra::ansible::AnsibleRunner;
use crate::infra::command_runner::{PROBE_TIMEOUT, TokioCommandRunner};
use crate::infra::identity;
use crate::infra::storage::{Storage, s3::AWS_CLI};
use crate::infra::terraform::TerraformProvisioner;
use crate::output::{OutputContext, TerminalReporter};

/// Arguments for the doctor command.
#[derive(Args, Debug)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub storage: StorageArgs,
}

/// Entry point for `strata doctor`.
///
/// # Errors
///
/// Returns an error when any check reports an issue.
pub async fn run(app: &AppContext, args: &DoctorArgs) -> Result<()> {
    let provisioner = TerraformProvisioner::new(TokioCommandRunner::new(PROBE_TIMEOUT), Vec::new());
    let ansible = AnsibleRunner::new(TokioCommandRunner::new(PROBE_TIMEOUT), Vec::new());

    let (storage, label) = match args.storage.base_dir.as_deref() {
        None => (None, "(not configured)".to_string()),
        Some(_) => {
            let location = args.storage.location()?;
            let label = location.to_string();
            match Storage::open(&location) {
                Ok(storage) => (Some(storage), label),
                Err(e) => {
                    tracing::debug!(error = %format!("{e:#}"), "storage unavailable");
                    (None, label)
                }
            }
        }
    };
    let working_dir = std::env::current_dir().context("reading current directory")?;
    let host = HostFacts {
        aws_cli: which::which(AWS_CLI).is_ok(),
        ssh_agent: identity::ssh_agent_available(),
        stray_state: identity::stray_state_file(&working_dir),
    };

    let quiet = OutputContext::new(true, true);
    let reporter = TerminalReporter::new(if app.json { &quiet } else { &app.output });
    let checks = run_doctor(
        &provisioner,
        &ansible,
        storage.as_ref(),
        &label,
        host,
        &reporter,
    )
    .await?;
    let issues = collect_issues(&checks);

    if app.json {
        let tool = |t: &ToolCheck| {
            serde_json::json!({
                "version": t.version,
                "version_ok": t.version_ok,
                "minimum": t.minimum,
            })
        };
        let out = serde_json::json!({
            "status": if issues.is_empty() { "healthy" } else { "unhealthy" },
            "checks": {
                "terraform": tool(&checks.terraform),
                "ansible": tool(&checks.ansible),
                "storage": {
                    "location": checks.storage,
                    "remote": checks.storage_remote,
                    "accessible": checks.storage_ok,
                    "aws_cli": checks.aws_cli,
                },
                "ssh_agent": checks.ssh_agent,
                "stray_state_file": checks.stray_state,
            },
            "issues": issues,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("JSON serialization")?
        );
    } else {
        render(&app.output, &checks, &issues);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} issue(s) found", issues.len())
    }
}

fn render(ctx: &OutputContext, checks: &DoctorChecks, issues: &[String]) {
    println!();
    println!("  {}", "Strata Health Check".style(ctx.styles.header));
    println!();

    println!("  Tools:");
    for tool in [&checks.terraform, &checks.ansible] {
        let msg = match &tool.version {
            Some(v) => format!("{} {v} (need ≥ {})", tool.name, tool.minimum),
            None => format!("{} not found", tool.name),
        };
        ctx.check(tool.version.is_some() && tool.version_ok, &msg);
    }
    println!();

    println!("  Storage:");
    ctx.check(checks.storage_ok, &format!("Base: {}", checks.storage));
    if checks.storage_remote {
        ctx.check(checks.aws_cli, "aws CLI available");
    }
    println!();

    println!("  Environment:");
    ctx.check(checks.ssh_agent, "ssh-agent running");
    ctx.check(!checks.stray_state, "No terraform.tfstate in the current directory");
    println!();

    if issues.is_empty() {
        println!("  {} Everything looks good!", "✓".style(ctx.styles.success));
    } else {
        for issue in issues {
            ctx.error(issue);
        }
    }
    println!();
}
