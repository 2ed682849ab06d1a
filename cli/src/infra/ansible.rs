//! Infrastructure implementation of the `ConfigRunner` port.
//!
//! `AnsibleRunner<R>` drives `ansible-galaxy` and `ansible-playbook` through
//! a `CommandRunner`, with the SSH client configuration captured from the
//! provisioner handed over in `ANSIBLE_SSH_ARGS`.

use std::path::Path;

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, CommandSpec, ConfigRunner, PlaybookRun};
use crate::infra::command_runner::{check_output, check_status};

/// Infrastructure adapter for ansible.
pub struct AnsibleRunner<R: CommandRunner> {
    runner: R,
    extra_args: Vec<String>,
}

impl<R: CommandRunner> AnsibleRunner<R> {
    /// `extra_args` are appended to every playbook run.
    pub fn new(runner: R, extra_args: Vec<String>) -> Self {
        Self { runner, extra_args }
    }

    fn playbook_command(&self, run: &PlaybookRun) -> CommandSpec {
        let mut ssh_args = Vec::new();
        if let Some(key) = &run.ssh_key {
            ssh_args.push(format!("-i {}", shell_words::quote(&key.display().to_string())));
        }
        ssh_args.push(format!(
            "-F {}",
            shell_words::quote(&run.ssh_config.display().to_string())
        ));

        CommandSpec::new("ansible-playbook")
            .arg("-i")
            .arg(run.inventory.display().to_string())
            .args(run.extra_args.iter().cloned())
            .args(self.extra_args.iter().cloned())
            .arg(run.playbook.display().to_string())
            .env("ANSIBLE_SSH_RETRIES", "3")
            .env("ANSIBLE_SSH_ARGS", ssh_args.join(" "))
            .current_dir(&run.cwd)
    }
}

impl<R: CommandRunner> ConfigRunner for AnsibleRunner<R> {
    async fn install_requirements(&self, requirements: &Path) -> Result<()> {
        let cmd = CommandSpec::new("ansible-galaxy").args([
            "install".to_string(),
            "--force".to_string(),
            "--ignore-errors".to_string(),
            "-r".to_string(),
            requirements.display().to_string(),
        ]);
        let status = self
            .runner
            .run_status(&cmd)
            .await
            .context("ansible-galaxy install")?;
        check_status("ansible-galaxy install", status)
    }

    async fn run_playbook(&self, run: &PlaybookRun) -> Result<()> {
        let cmd = self.playbook_command(run);
        let status = self
            .runner
            .run_status(&cmd)
            .await
            .context("ansible-playbook")?;
        check_status("ansible-playbook", status)
    }

    async fn version(&self) -> Result<String> {
        let output = self
            .runner
            .run("ansible-playbook", &["--version"])
            .await
            .context("ansible-playbook --version")?;
        let output = check_output("ansible-playbook --version", output)?;
        parse_version(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| anyhow::anyhow!("cannot parse ansible-playbook --version output"))
    }
}

/// Extract the version from the first line of `ansible-playbook --version`,
/// e.g. `ansible-playbook 2.9.6` or `ansible-playbook [core 2.15.3]`.
fn parse_version(stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?;
    first
        .split(|c: char| c.is_whitespace() || c == '[' || c == ']')
        .find(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_owned)
}
