//! `strata list` — deployments in the state storage.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize as _;

use crate::app::AppContext;
use crate::application::ports::StorageProvider;
use crate::application::services::list::{DeploymentListing, list_deployments};
use crate::commands::StorageArgs;
use crate::infra::storage::Storage;

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Only list deployments of this module
    #[arg(short, long)]
    pub module: Option<String>,

    /// Also list each deployment's files
    #[arg(short, long)]
    pub verbose: bool,
}

/// Entry point for `strata list`.
///
/// # Errors
///
/// Returns an error if the storage cannot be opened or listed.
pub async fn run(app: &AppContext, args: &ListArgs) -> Result<()> {
    let storage = Storage::open(&args.storage.location()?)?;
    let listings = list_deployments(&storage, args.module.as_deref()).await?;

    if app.json {
        let out = serde_json::json!({
            "base": storage.describe(),
            "deployments": listings.iter().map(|l| serde_json::json!({
                "module": l.module,
                "project": l.project,
                "locked": l.locked,
                "files": l.files,
                "marker": l.marker,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("JSON serialization")?
        );
        return Ok(());
    }

    render(app, &storage.describe(), &listings, args.verbose);
    Ok(())
}

fn render(app: &AppContext, base: &str, listings: &[DeploymentListing], verbose: bool) {
    let ctx = &app.output;
    ctx.kv("base:", base);
    if listings.is_empty() {
        ctx.warn("no deployments found");
        return;
    }

    let mut current_module: Option<&str> = None;
    for listing in listings {
        if current_module != Some(listing.module.as_str()) {
            println!();
            ctx.header(&listing.module);
            current_module = Some(listing.module.as_str());
        }
        let status = match &listing.marker {
            Some(marker) => {
                let step = marker.last_completed_step.as_deref().unwrap_or("-");
                let when = marker
                    .updated_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let pending = if marker.pending_steps.is_empty() {
                    String::new()
                } else {
                    format!(" pending: {}", marker.pending_steps.join(","))
                };
                format!("last: {step} {when} {}{pending}", marker.author)
            }
            None => "never run".to_string(),
        };
        let lock = if listing.locked {
            format!(" {}", "[locked]".style(ctx.styles.warning))
        } else {
            String::new()
        };
        println!(
            "    {}  {}{lock}",
            listing.project,
            status.style(ctx.styles.dim)
        );
        if verbose {
            for file in &listing.files {
                println!("      {file}");
            }
        }
    }
}
