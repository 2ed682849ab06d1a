//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` — never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};

use anyhow::Result;
use serde_json::Value;

use crate::domain::error::StorageError;

// ── Command Runner Port ───────────────────────────────────────────────────────

/// A fully described child process: program, arguments, extra environment
/// and working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program and arguments joined for log lines.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: std::time::Duration,
    ) -> Result<Output>;
    /// Run a fully described command and capture its output.
    async fn output(&self, cmd: &CommandSpec) -> Result<Output>;
    /// Run a fully described command with inherited stdio and return only
    /// its exit status.
    async fn run_status(&self, cmd: &CommandSpec) -> Result<ExitStatus>;
}

// ── Provisioner Port ──────────────────────────────────────────────────────────

/// One deployment's view of the provisioner: where its configuration lives
/// and which files in the scratch workdir it reads and writes.
#[derive(Debug, Clone)]
pub struct ProvisionerTarget {
    /// Provisioner configuration directory.
    pub config_dir: PathBuf,
    /// State file, read and written in place.
    pub state_file: PathBuf,
    /// Variable files, in order.
    pub var_files: Vec<PathBuf>,
    /// Variables passed through the environment.
    pub variables: BTreeMap<String, String>,
}

/// The declarative resource provisioner.
#[allow(async_fn_in_trait)]
pub trait Provisioner {
    /// Write a plan for `target` to `plan_file`.
    async fn plan(&self, target: &ProvisionerTarget, plan_file: &Path) -> Result<()>;
    /// Input variables recorded in a saved plan, by name.
    async fn plan_variables(
        &self,
        target: &ProvisionerTarget,
        plan_file: &Path,
    ) -> Result<BTreeMap<String, Value>>;
    /// Converge infrastructure to a saved plan.
    async fn apply(&self, target: &ProvisionerTarget, plan_file: &Path) -> Result<()>;
    /// Every output in the state, by name.
    async fn outputs(&self, target: &ProvisionerTarget) -> Result<BTreeMap<String, Value>>;
    /// Destroy everything in the state.
    async fn destroy(&self, target: &ProvisionerTarget) -> Result<()>;
    /// Provisioner version string.
    async fn version(&self) -> Result<String>;
}

// ── Configuration Runner Port ─────────────────────────────────────────────────

/// One playbook invocation.
#[derive(Debug, Clone)]
pub struct PlaybookRun {
    pub playbook: PathBuf,
    pub inventory: PathBuf,
    pub ssh_config: PathBuf,
    pub ssh_key: Option<PathBuf>,
    pub extra_args: Vec<String>,
    /// Directory the runner is started in.
    pub cwd: PathBuf,
}

/// The configuration-management runner.
#[allow(async_fn_in_trait)]
pub trait ConfigRunner {
    /// Install role/collection requirements from `requirements`.
    async fn install_requirements(&self, requirements: &Path) -> Result<()>;
    /// Run a playbook against an inventory.
    async fn run_playbook(&self, run: &PlaybookRun) -> Result<()>;
    /// Runner version string.
    async fn version(&self) -> Result<String>;
}

// ── Storage Port ──────────────────────────────────────────────────────────────

/// A held workspace lock. Dropping it without `release_lock` leaves the
/// lock in place for remote storage.
#[derive(Debug)]
pub struct LockHandle {
    /// Storage key of the lock.
    pub key: String,
    /// Open lock file, for storage that locks with OS file locks.
    pub file: Option<std::fs::File>,
}

/// Result of a lock attempt.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(LockHandle),
    /// Someone else holds the lock.
    Held { holder: String },
}

/// Uniform file access over the deployment state root. All paths are
/// `/`-separated keys relative to the root.
#[allow(async_fn_in_trait)]
pub trait StorageProvider {
    /// Human-readable root location.
    fn describe(&self) -> String;
    /// Whether the root lives on a remote object store.
    fn is_remote(&self) -> bool;
    /// Read a file. A missing file is `StorageError::NotFound`.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    /// Read a file, mapping `StorageError::NotFound` to `None`.
    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => match e.downcast_ref::<StorageError>() {
                Some(StorageError::NotFound(_)) => Ok(None),
                _ => Err(e),
            },
        }
    }
    /// Create or overwrite a file.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    /// Every file under `prefix`, as sorted root-relative keys.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    /// Delete a file. Deleting a missing file succeeds.
    async fn delete(&self, path: &str) -> Result<()>;
    /// Try to take the advisory lock of a workspace.
    async fn acquire_lock(&self, workspace: &str, holder: &str) -> Result<LockAttempt>;
    /// Release a lock taken with `acquire_lock`.
    async fn release_lock(&self, lock: LockHandle) -> Result<()>;
}

// ── Interaction Ports ─────────────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait — no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

/// Asks the operator before destructive actions.
pub trait Confirm {
    /// Ask `prompt`; non-interactive sessions answer `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;
}
