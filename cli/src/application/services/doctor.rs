//! Application service — environment doctor use-case.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::Result;

use crate::application::ports::{ConfigRunner, ProgressReporter, Provisioner, StorageProvider};
use crate::domain::health::{DoctorChecks, MIN_ANSIBLE, MIN_TERRAFORM, ToolCheck};

/// Facts about the host that are probed outside the ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFacts {
    pub aws_cli: bool,
    pub ssh_agent: bool,
    pub stray_state: bool,
}

/// Probe the external tools and the storage root.
///
/// Probe failures are recorded in the returned checks, never returned as
/// errors; rendering is the caller's responsibility.
///
/// # Errors
///
/// Currently infallible; the `Result` leaves room for probes that cannot be
/// expressed as a check.
pub async fn run_doctor(
    provisioner: &impl Provisioner,
    config_runner: &impl ConfigRunner,
    storage: Option<&impl StorageProvider>,
    storage_label: &str,
    host: HostFacts,
    reporter: &impl ProgressReporter,
) -> Result<DoctorChecks> {
    reporter.step("checking tools...");
    let (terraform, ansible) = tokio::join!(provisioner.version(), config_runner.version());
    let terraform = ToolCheck::new("terraform", probe("terraform", terraform), MIN_TERRAFORM);
    let ansible = ToolCheck::new("ansible", probe("ansible", ansible), MIN_ANSIBLE);

    reporter.step("checking storage...");
    let (storage_remote, storage_ok) = match storage {
        Some(storage) => {
            let ok = storage.list("").await.inspect_err(|e| {
                tracing::debug!(error = %format!("{e:#}"), "storage probe failed");
            });
            (storage.is_remote(), ok.is_ok())
        }
        None => (storage_label.starts_with(crate::domain::config::S3_SCHEME), false),
    };

    reporter.success("diagnostics complete");
    Ok(DoctorChecks {
        terraform,
        ansible,
        storage: storage_label.to_string(),
        storage_remote,
        storage_ok,
        aws_cli: host.aws_cli,
        ssh_agent: host.ssh_agent,
        stray_state: host.stray_state,
    })
}

fn probe(tool: &str, result: Result<String>) -> Option<String> {
    result
        .inspect_err(|e| tracing::debug!(tool, error = %format!("{e:#}"), "version probe failed"))
        .ok()
}
