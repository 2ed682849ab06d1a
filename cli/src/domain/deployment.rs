//! Deployments, parent references and workspace addressing.
//!
//! Pure types, no I/O. A workspace is addressed by a `/`-separated key
//! relative to the storage root so the same value works for the local
//! filesystem and for object-store keys.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::ValidationError;
use crate::domain::module::ModuleDefinition;

/// Module and project names: one path segment, no traversal.
pub static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex")
});

/// Validate a module or project name.
///
/// # Errors
///
/// Returns `ValidationError::InvalidName` if the name is not a single safe
/// path segment.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

// ── Workspace file names ──────────────────────────────────────────────────────

/// Run marker recording progress through the step list.
pub const MARKER_FILE: &str = "deployment.json";
/// Advisory workspace lock.
pub const LOCK_FILE: &str = ".lock";
/// Variable file exported for child deployments.
pub const EXPORT_FILE: &str = "export.tfvars";
/// The parent's export file, imported into a child workspace.
pub const PARENT_FILE: &str = "parent.tfvars";
/// Input variables of the last plan, as reported by the provisioner.
pub const VARIABLES_JSON: &str = "variables.json";
/// Unprefixed variable cache consumed by `destroy`.
pub const VARIABLES_TFVARS: &str = "variables.tfvars";
/// Every output produced by the last `output` step.
pub const OUTPUTS_JSON: &str = "outputs.json";
/// Suffix of files staged for an atomic rename; never listed by storage.
pub const STAGING_SUFFIX: &str = ".tmp";

/// File names a captured output may never be written to.
#[must_use]
pub fn reserved_file_names(module: &str) -> Vec<String> {
    let mut names: Vec<String> = [
        MARKER_FILE,
        LOCK_FILE,
        EXPORT_FILE,
        PARENT_FILE,
        VARIABLES_JSON,
        VARIABLES_TFVARS,
        OUTPUTS_JSON,
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect();
    names.push(state_file_name(module));
    names.push(state_backup_file_name(module));
    names.push(plan_file_name(module));
    names
}

/// Whether a captured output may be written to `file`.
#[must_use]
pub fn is_reserved_file_name(module: &str, file: &str) -> bool {
    file.ends_with(STAGING_SUFFIX) || reserved_file_names(module).iter().any(|r| r == file)
}

/// Provisioner state file for a module's deployments.
#[must_use]
pub fn state_file_name(module: &str) -> String {
    format!("{module}.tfstate")
}

/// Backup terraform leaves next to the state file.
#[must_use]
pub fn state_backup_file_name(module: &str) -> String {
    format!("{}.backup", state_file_name(module))
}

/// Saved plan file for a module's deployments.
#[must_use]
pub fn plan_file_name(module: &str) -> String {
    format!("{module}.tfplan")
}

// ── Workspace path ────────────────────────────────────────────────────────────

/// Storage key of one deployment's workspace: `<module>/<project>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    #[must_use]
    pub fn new(module: &str, project: &str) -> Self {
        Self(format!("{module}/{project}"))
    }

    /// Key of a file inside this workspace.
    #[must_use]
    pub fn file(&self, name: &str) -> String {
        format!("{}/{name}", self.0)
    }

    /// Prefix matching every file in this workspace.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Parent reference ──────────────────────────────────────────────────────────

/// A `MODULE/PROJECT` reference to an existing deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub module: String,
    pub project: String,
}

impl ParentRef {
    #[must_use]
    pub fn workspace(&self) -> WorkspacePath {
        WorkspacePath::new(&self.module, &self.project)
    }
}

impl FromStr for ParentRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((module, project)) = s.split_once('/') else {
            return Err(ValidationError::InvalidParentReference(s.to_string()));
        };
        if !NAME_RE.is_match(module) || !NAME_RE.is_match(project) {
            return Err(ValidationError::InvalidParentReference(s.to_string()));
        }
        Ok(Self {
            module: module.to_string(),
            project: project.to_string(),
        })
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.project)
    }
}

// ── Deployment ────────────────────────────────────────────────────────────────

/// One instantiation of a module under a project name.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub module: ModuleDefinition,
    pub project: String,
    pub parent: Option<ParentRef>,
}

impl Deployment {
    /// Build a deployment, validating the project name.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidName` for an unsafe project name.
    pub fn new(
        module: ModuleDefinition,
        project: &str,
        parent: Option<ParentRef>,
    ) -> Result<Self, ValidationError> {
        validate_name("project", project)?;
        Ok(Self {
            module,
            project: project.to_string(),
            parent,
        })
    }

    #[must_use]
    pub fn workspace(&self) -> WorkspacePath {
        WorkspacePath::new(&self.module.name, &self.project)
    }

    #[must_use]
    pub fn state_file(&self) -> String {
        state_file_name(&self.module.name)
    }

    #[must_use]
    pub fn state_backup_file(&self) -> String {
        state_backup_file_name(&self.module.name)
    }

    #[must_use]
    pub fn plan_file(&self) -> String {
        plan_file_name(&self.module.name)
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module.name, self.project)
    }
}
