//! Run context: the immutable configuration of one invocation.
//!
//! Pure types only — no I/O, no async, no filesystem access.

use std::path::PathBuf;

use crate::domain::error::{StorageError, ValidationError};

// ── Storage location ─────────────────────────────────────────────────────────

/// URI scheme selecting the object-store backend.
pub const S3_SCHEME: &str = "s3://";

/// Where deployment workspaces are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// A local directory.
    Local(PathBuf),
    /// An S3 bucket with an optional key prefix (no leading or trailing `/`).
    S3 { bucket: String, prefix: String },
}

impl StorageLocation {
    /// Parse a base directory value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingBaseDir` for an empty value and
    /// `StorageError::Unavailable` for an `s3://` URI without a bucket.
    pub fn parse(base: &str) -> anyhow::Result<Self> {
        let base = base.trim();
        if base.is_empty() {
            return Err(ValidationError::MissingBaseDir.into());
        }
        let Some(rest) = base.strip_prefix(S3_SCHEME) else {
            return Ok(Self::Local(PathBuf::from(base)));
        };
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::Unavailable {
                location: base.to_string(),
                reason: "no bucket name in S3 URI".to_string(),
            }
            .into());
        }
        Ok(Self::S3 {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::S3 { .. })
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::S3 { bucket, prefix } if prefix.is_empty() => write!(f, "{S3_SCHEME}{bucket}"),
            Self::S3 { bucket, prefix } => write!(f, "{S3_SCHEME}{bucket}/{prefix}"),
        }
    }
}

// ── Run context ──────────────────────────────────────────────────────────────

/// Everything a run needs to know about its environment, resolved once from
/// flags and environment variables.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub storage: StorageLocation,
    /// Directories searched for module files.
    pub module_repositories: Vec<PathBuf>,
    /// Module files named explicitly.
    pub module_files: Vec<PathBuf>,
    /// Variable files passed to every provisioner run.
    pub var_files: Vec<PathBuf>,
    /// Private key handed to the configuration runner.
    pub ssh_key: Option<PathBuf>,
    /// Extra arguments for every provisioner plan/apply/destroy.
    pub terraform_args: Vec<String>,
    /// Extra arguments for every playbook run.
    pub ansible_args: Vec<String>,
    /// Directory the process was started in.
    pub working_dir: PathBuf,
}

impl RunContext {
    /// A context with only a storage location and working directory set.
    #[must_use]
    pub fn new(storage: StorageLocation, working_dir: PathBuf) -> Self {
        Self {
            storage,
            module_repositories: vec![working_dir.clone()],
            module_files: Vec::new(),
            var_files: Vec::new(),
            ssh_key: None,
            terraform_args: Vec::new(),
            ansible_args: Vec::new(),
            working_dir,
        }
    }
}
