//! Module repository loader.
//!
//! Finds `strata.yaml` files in each repository root and its immediate
//! subdirectories, plus any module files named explicitly, and validates the
//! whole set into a `ModuleRepository`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::domain::error::ValidationError;
use crate::domain::module::{ModuleDefinition, ModuleFile, ModuleRepository};

/// File name of a module definition.
pub const MODULE_FILE: &str = "strata.yaml";

/// Module files directly in `root` or one directory below it.
///
/// # Errors
///
/// Returns an error if `root` cannot be read.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(2).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scanning module repository {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name() == MODULE_FILE {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Parse and validate one module file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, or a `ValidationError` if it
/// is not a valid module definition.
pub fn load_module(path: &Path) -> Result<ModuleDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading module file {}", path.display()))?;
    let file = ModuleFile::parse(&text).map_err(|e| ValidationError::InvalidModule {
        module: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let module_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok(ModuleDefinition::from_file(file, &module_dir)?)
}

/// Load every module from `repositories` and `files`.
///
/// # Errors
///
/// Returns the first I/O or validation failure.
pub fn load_repository(repositories: &[PathBuf], files: &[PathBuf]) -> Result<ModuleRepository> {
    let mut paths = Vec::new();
    for root in repositories {
        if !root.is_dir() {
            anyhow::bail!("module repository {} is not a directory", root.display());
        }
        paths.extend(discover(root)?);
    }
    paths.extend(files.iter().cloned());

    let mut seen = BTreeSet::new();
    let mut modules = Vec::new();
    for path in paths {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("resolving module file {}", path.display()))?;
        if !seen.insert(canonical.clone()) {
            continue;
        }
        tracing::debug!(path = %canonical.display(), "loading module");
        modules.push(load_module(&canonical)?);
    }
    Ok(ModuleRepository::new(modules)?)
}
