//! Application service — deployment listing.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::application::ports::StorageProvider;
use crate::domain::deployment::{LOCK_FILE, MARKER_FILE};
use crate::domain::state::RunMarker;

/// One deployment found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentListing {
    pub module: String,
    pub project: String,
    /// Files in the workspace, relative to it.
    pub files: Vec<String>,
    /// Whether a run currently holds the workspace lock.
    pub locked: bool,
    /// Run marker, when one exists and parses.
    pub marker: Option<RunMarker>,
}

/// List deployments in storage, optionally only those of `module`.
///
/// Keys that are not at least `module/project/file` deep are ignored. A
/// corrupt run marker is logged and listed as absent.
///
/// # Errors
///
/// Returns any storage error.
pub async fn list_deployments(
    storage: &impl StorageProvider,
    module: Option<&str>,
) -> Result<Vec<DeploymentListing>> {
    let prefix = module.map(|m| format!("{m}/")).unwrap_or_default();
    let mut grouped: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for key in storage.list(&prefix).await? {
        let mut parts = key.splitn(3, '/');
        let (Some(m), Some(p), Some(file)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        grouped
            .entry((m.to_string(), p.to_string()))
            .or_default()
            .push(file.to_string());
    }

    let mut listings = Vec::with_capacity(grouped.len());
    for ((module, project), files) in grouped {
        let locked = files.iter().any(|f| f == LOCK_FILE);
        let marker = if files.iter().any(|f| f == MARKER_FILE) {
            let key = format!("{module}/{project}/{MARKER_FILE}");
            let bytes = storage.read(&key).await?;
            RunMarker::parse(&bytes, &key)
                .inspect_err(|e| tracing::warn!(error = %e, "ignoring run marker"))
                .ok()
        } else {
            None
        };
        listings.push(DeploymentListing {
            files: files.into_iter().filter(|f| f != LOCK_FILE).collect(),
            module,
            project,
            locked,
            marker,
        });
    }
    Ok(listings)
}
