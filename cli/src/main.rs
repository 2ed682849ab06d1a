//! Strata CLI - ordered terraform and ansible workflows over shared deployment state

#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_cli::cli::Cli;
use strata_cli::domain::ExitClass;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "strata_cli=debug,info" } else { "strata_cli=info,warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .init();

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if flag.swap(true, Ordering::SeqCst) {
                tracing::warn!("interrupt already pending; waiting for the current tool to exit");
            } else {
                tracing::warn!("interrupt received; stopping after the current step");
            }
        }
    });

    if let Err(e) = cli.run(interrupted).await {
        eprintln!("Error: {e:#}");
        std::process::exit(ExitClass::of(&e).code());
    }
}
