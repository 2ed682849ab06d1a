//! Rendering of provisioner variable files (`*.tfvars`).
//!
//! The export file is line oriented: every input variable of the parent's
//! last plan as `<prefix><name> = "<value>"`, followed by each exported
//! output as `<name> = <json value>`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;

use crate::domain::error::StepError;

/// Text placed between the quotes of a variable line.
///
/// Strings are written verbatim; any other value as its JSON text.
#[must_use]
pub fn variable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render `variables` as `<prefix><name> = "<value>"` lines, sorted by name.
#[must_use]
pub fn render_variables(prefix: &str, variables: &BTreeMap<String, Value>) -> String {
    let mut out = String::new();
    for (name, value) in variables {
        let _ = writeln!(out, "{prefix}{name} = \"{}\"", variable_text(value));
    }
    out
}

/// Render the export file for a deployment.
///
/// Returns `Ok(None)` when there is nothing to export.
///
/// # Errors
///
/// Returns `StepError::MissingRequiredOutput` if an exported output was not
/// produced by the provisioner.
pub fn render_export(
    prefix: &str,
    variables: &BTreeMap<String, Value>,
    export_outputs: &[String],
    outputs: &BTreeMap<String, Value>,
) -> Result<Option<String>, StepError> {
    let missing: Vec<String> = export_outputs
        .iter()
        .filter(|name| !outputs.contains_key(*name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(StepError::MissingRequiredOutput { missing });
    }

    let mut out = render_variables(prefix, variables);
    for name in export_outputs {
        if let Some(value) = outputs.get(name) {
            let _ = writeln!(out, "{name} = {value}");
        }
    }

    if out.is_empty() {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}
