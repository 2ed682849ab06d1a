//! Application service — variable exchange between parent and child
//! deployments.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::application::ports::StorageProvider;
use crate::domain::deployment::{
    Deployment, EXPORT_FILE, OUTPUTS_JSON, PARENT_FILE, ParentRef, VARIABLES_JSON,
};
use crate::domain::error::DependencyError;
use crate::domain::tfvars::render_export;

/// Read a JSON object stored at `key`; a missing file is an empty map.
pub(crate) async fn read_json_map(
    storage: &impl StorageProvider,
    key: &str,
) -> Result<BTreeMap<String, Value>> {
    match storage.read_optional(key).await? {
        None => Ok(BTreeMap::new()),
        Some(bytes) => serde_json::from_slice(&bytes).with_context(|| format!("parsing {key}")),
    }
}

/// Render and store the export file of `deployment` from the variables of
/// its last plan and the outputs of its last `output` step.
///
/// Returns the bytes written, or `None` when there was nothing to export (in
/// which case any stale export file is removed).
///
/// # Errors
///
/// Returns `StepError::MissingRequiredOutput` if an exported output was not
/// produced, or any storage error.
pub async fn export_variables(
    storage: &impl StorageProvider,
    deployment: &Deployment,
) -> Result<Option<Vec<u8>>> {
    let workspace = deployment.workspace();
    let variables = read_json_map(storage, &workspace.file(VARIABLES_JSON)).await?;
    let outputs = read_json_map(storage, &workspace.file(OUTPUTS_JSON)).await?;
    let module = &deployment.module;

    let export_key = workspace.file(EXPORT_FILE);
    match render_export(&module.export_prefix, &variables, &module.export_outputs, &outputs)? {
        Some(text) => {
            let bytes = text.into_bytes();
            storage.write(&export_key, &bytes).await?;
            tracing::info!(deployment = %deployment, "exported variables");
            Ok(Some(bytes))
        }
        None => {
            storage.delete(&export_key).await?;
            Ok(None)
        }
    }
}

/// Copy the parent's export file into the child's workspace.
///
/// # Errors
///
/// Returns `DependencyError::ParentNotProvisioned` if the parent has no
/// export file.
pub async fn import_variables(
    storage: &impl StorageProvider,
    child: &Deployment,
    parent: &ParentRef,
) -> Result<()> {
    let source = parent.workspace().file(EXPORT_FILE);
    let Some(bytes) = storage.read_optional(&source).await? else {
        return Err(DependencyError::ParentNotProvisioned {
            parent: parent.to_string(),
            location: format!("{}/{source}", storage.describe()),
        }
        .into());
    };
    storage
        .write(&child.workspace().file(PARENT_FILE), &bytes)
        .await?;
    tracing::info!(%parent, child = %child, "imported parent variables");
    Ok(())
}
