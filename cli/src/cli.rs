//! CLI argument parsing with clap derive

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, OutputFlags};
use crate::commands;

/// Ordered terraform and ansible workflows over shared deployment state
#[derive(Parser)]
#[command(
    name = "strata",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format (list, doctor, version)
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Log diagnostics at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a module's steps for a project
    Run(commands::run::RunArgs),

    /// List deployments in the state storage
    List(commands::list::ListArgs),

    /// Check tools, storage and SSH agent
    Doctor(commands::doctor::DoctorArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the command's error; `main` maps it to an exit code.
    pub async fn run(self, interrupted: Arc<AtomicBool>) -> Result<()> {
        let Cli {
            json,
            quiet,
            no_color,
            debug: _,
            command,
        } = self;
        let yes = match &command {
            Command::Run(args) => args.yes,
            _ => false,
        };
        let app = AppContext::new(
            &AppFlags {
                output: OutputFlags {
                    no_color,
                    quiet,
                    json,
                },
                yes,
            },
            interrupted,
        );

        match command {
            Command::Run(args) => commands::run::run(&app, args).await,
            Command::List(args) => commands::list::run(&app, &args).await,
            Command::Doctor(args) => commands::doctor::run(&app, &args).await,
            Command::Version => {
                commands::version::run(json);
                Ok(())
            }
        }
    }
}
