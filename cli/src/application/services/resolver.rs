//! Application service — parent deployment resolution.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::Result;

use crate::application::ports::StorageProvider;
use crate::domain::deployment::{EXPORT_FILE, ParentRef};
use crate::domain::error::{DependencyError, ValidationError};
use crate::domain::module::ModuleDefinition;

/// Validate `parent` against `module.depends_on` and check that the parent
/// deployment has been provisioned.
///
/// Returns `None` for modules without a parent.
///
/// # Errors
///
/// - `DependencyError::UnexpectedParent` when the module has no parent but one
///   was given.
/// - `DependencyError::MissingParent` when the module needs a parent and none
///   was given.
/// - `ValidationError::ParentModuleMismatch` when the reference names another
///   module.
/// - `DependencyError::ParentNotProvisioned` when the parent has no export file.
pub async fn resolve(
    storage: &impl StorageProvider,
    module: &ModuleDefinition,
    parent: Option<&ParentRef>,
) -> Result<Option<ParentRef>> {
    let Some(expected) = &module.depends_on else {
        if parent.is_some() {
            return Err(DependencyError::UnexpectedParent {
                module: module.name.clone(),
            }
            .into());
        }
        return Ok(None);
    };

    let Some(parent) = parent else {
        return Err(DependencyError::MissingParent {
            module: module.name.clone(),
            parent: expected.clone(),
        }
        .into());
    };

    if &parent.module != expected {
        return Err(ValidationError::ParentModuleMismatch {
            expected: expected.clone(),
            found: parent.module.clone(),
        }
        .into());
    }

    let export = parent.workspace().file(EXPORT_FILE);
    if !storage.exists(&export).await? {
        return Err(DependencyError::ParentNotProvisioned {
            parent: parent.to_string(),
            location: format!("{}/{export}", storage.describe()),
        }
        .into());
    }

    tracing::debug!(%parent, "parent deployment resolved");
    Ok(Some(parent.clone()))
}
