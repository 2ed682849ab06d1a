//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill on all platforms.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use crate::application::ports::{CommandRunner, CommandSpec};
use crate::domain::error::StepError;

/// Default timeout for captured commands (`terraform output`, `aws s3 cp`, ...).
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for quick probes such as `--version`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Production `CommandRunner`: uses tokio for async process execution
/// with guaranteed timeout and kill on all platforms.
///
/// Captured commands are killed when the timeout fires. Commands with
/// inherited stdio have no timeout: `terraform apply` runs as long as it
/// needs, and Ctrl-C reaches it through the terminal.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CMD_TIMEOUT)
    }
}

fn build(cmd: &CommandSpec) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(&cmd.program);
    command.args(&cmd.args);
    for (key, value) in &cmd.env {
        command.env(key, value);
    }
    if let Some(dir) = &cmd.cwd {
        command.current_dir(dir);
    }
    command
}

async fn capture(
    mut command: tokio::process::Command,
    program: &str,
    timeout: Duration,
) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    tokio::select! {
        result = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stdout_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stderr_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
            );
            Ok(Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            })
        } => result,
        () = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            anyhow::bail!("{program} timed out after {}s", timeout.as_secs())
        }
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.run_with_timeout(program, args, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        let mut command = tokio::process::Command::new(program);
        command.args(args);
        capture(command, program, timeout).await
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<Output> {
        tracing::debug!(command = %cmd.display(), "capturing");
        capture(build(cmd), &cmd.program, self.timeout).await
    }

    async fn run_status(&self, cmd: &CommandSpec) -> Result<ExitStatus> {
        tracing::info!(command = %cmd.display(), "executing");
        let mut child = build(cmd)
            .spawn()
            .with_context(|| format!("failed to spawn {}", cmd.program))?;

        child
            .wait()
            .await
            .with_context(|| format!("waiting for {}", cmd.program))
    }
}

// ── Exit status checks ────────────────────────────────────────────────────────

/// Fail with `ExternalToolFailure` unless a streamed command succeeded.
///
/// # Errors
///
/// Returns `StepError::ExternalToolFailure` for a non-zero exit.
pub fn check_status(tool: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(StepError::ExternalToolFailure {
        tool: tool.to_string(),
        status: status.to_string(),
        stderr: String::new(),
    }
    .into())
}

/// Fail with `ExternalToolFailure`, carrying stderr verbatim, unless a
/// captured command succeeded.
///
/// # Errors
///
/// Returns `StepError::ExternalToolFailure` for a non-zero exit.
pub fn check_output(tool: &str, output: Output) -> Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    Err(StepError::ExternalToolFailure {
        tool: tool.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
    .into())
}
