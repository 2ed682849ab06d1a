//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use thiserror::Error;

// ── Validation errors ─────────────────────────────────────────────────────────

/// Configuration problems detected before any external tool is invoked.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid module '{module}': {reason}")]
    InvalidModule { module: String, reason: String },

    #[error("Module '{0}' is defined more than once in the module repositories.")]
    DuplicateModule(String),

    #[error("Dependency cycle between modules: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("Unknown module: {name}, available choices: {available}")]
    UnknownModule { name: String, available: String },

    #[error("Unknown step: {step}, choices: {choices}")]
    UnknownStep { step: String, choices: String },

    #[error("Parent module mismatch: expected a '{expected}' deployment but '{found}' was given.")]
    ParentModuleMismatch { expected: String, found: String },

    #[error("Invalid parent reference '{0}': expected MODULE/PROJECT")]
    InvalidParentReference(String),

    #[error("Invalid {kind} name '{name}': must match ^[A-Za-z0-9][A-Za-z0-9_.-]*$")]
    InvalidName { kind: &'static str, name: String },

    #[error("No base directory given. Use --base-dir or set STRATA_BASE_DIR.")]
    MissingBaseDir,

    #[error(
        "Refusing to start: a `terraform.tfstate` file is present in the current directory \
and would shadow the deployment state."
    )]
    StrayStateFile,
}

// ── Dependency errors ─────────────────────────────────────────────────────────

/// Parent/child deployment relationship errors.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Module '{module}' depends on '{parent}'. Use --parent {parent}/<project> to select one.")]
    MissingParent { module: String, parent: String },

    #[error("Module '{module}' has no parent module, but --parent was given.")]
    UnexpectedParent { module: String },

    #[error("Parent deployment {parent} has not been provisioned (no export file at {location}).")]
    ParentNotProvisioned { parent: String, location: String },
}

// ── Storage errors ────────────────────────────────────────────────────────────

/// Errors raised by `StorageProvider` implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable at {location}: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("Remote storage unavailable: missing capability {capability}")]
    RemoteStorageUnavailable { capability: String },
}

// ── Step errors ───────────────────────────────────────────────────────────────

/// Failures of an individual workflow step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Missing required provisioner output(s): {}", missing.join(", "))]
    MissingRequiredOutput { missing: Vec<String> },

    #[error("{tool} exited with {status}{}", format_stderr(stderr))]
    ExternalToolFailure {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Step '{step}' cannot run: {reason}")]
    Precondition { step: String, reason: String },

    #[error("Interrupted; last completed step: {}", last_completed.as_deref().unwrap_or("none"))]
    Interrupted { last_completed: Option<String> },
}

fn format_stderr(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("\n{stderr}")
    }
}

// ── State errors ──────────────────────────────────────────────────────────────

/// Errors related to persisted deployment state and workspace locking.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Deployment {workspace} is locked by {holder}. Another run is in progress.")]
    DeploymentLocked { workspace: String, holder: String },

    #[error("Corrupt deployment state in {location}: {reason}")]
    CorruptState { location: String, reason: String },
}

// ── Exit classification ───────────────────────────────────────────────────────

/// Process exit classes for the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Other,
    Validation,
    Dependency,
    ExternalTool,
    Locked,
    Storage,
    Corrupt,
    Interrupted,
}

impl ExitClass {
    /// Classify an error by the first typed domain error found in its chain.
    #[must_use]
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<ValidationError>().is_some() {
                return Self::Validation;
            }
            if cause.downcast_ref::<DependencyError>().is_some() {
                return Self::Dependency;
            }
            if cause.downcast_ref::<StorageError>().is_some() {
                return Self::Storage;
            }
            if let Some(step) = cause.downcast_ref::<StepError>() {
                return match step {
                    StepError::MissingRequiredOutput { .. } => Self::Validation,
                    StepError::ExternalToolFailure { .. } | StepError::Precondition { .. } => {
                        Self::ExternalTool
                    }
                    StepError::Interrupted { .. } => Self::Interrupted,
                };
            }
            if let Some(state) = cause.downcast_ref::<StateError>() {
                return match state {
                    StateError::DeploymentLocked { .. } => Self::Locked,
                    StateError::CorruptState { .. } => Self::Corrupt,
                };
            }
        }
        Self::Other
    }

    /// The process exit code for this class.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Other => 1,
            Self::Validation => 2,
            Self::Dependency => 3,
            Self::ExternalTool => 4,
            Self::Locked => 5,
            Self::Storage => 6,
            Self::Corrupt => 7,
            Self::Interrupted => 130,
        }
    }
}
