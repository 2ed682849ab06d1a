//! Environment health check types and pure issue collection.

/// Minimum supported provisioner version.
pub const MIN_TERRAFORM: (u64, u64, u64) = (0, 15, 0);
/// Minimum supported configuration runner version.
pub const MIN_ANSIBLE: (u64, u64, u64) = (2, 8, 0);

/// One external tool probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub name: &'static str,
    /// Reported version, `None` when the tool could not be run.
    pub version: Option<String>,
    /// Whether the version meets the minimum. Unparseable versions pass.
    pub version_ok: bool,
    pub minimum: String,
}

impl ToolCheck {
    /// Build a check from a probe result against `minimum`.
    #[must_use]
    pub fn new(name: &'static str, version: Option<String>, minimum: (u64, u64, u64)) -> Self {
        let min = semver::Version::new(minimum.0, minimum.1, minimum.2);
        let version_ok = version.as_deref().is_some_and(|v| {
            lenient_semver(v).is_none_or(|parsed| parsed >= min)
        });
        Self {
            name,
            version,
            version_ok,
            minimum: min.to_string(),
        }
    }
}

/// Parse `1.5`, `1.5.7` or `v1.5.7` as semver.
fn lenient_semver(version: &str) -> Option<semver::Version> {
    let v = version.trim().trim_start_matches('v');
    let mut parts = v.split('.').map(|p| {
        p.chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse::<u64>()
    });
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(Result::ok).unwrap_or(0);
    let patch = parts.next().and_then(Result::ok).unwrap_or(0);
    Some(semver::Version::new(major, minor, patch))
}

/// Everything `strata doctor` checks.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct DoctorChecks {
    pub terraform: ToolCheck,
    pub ansible: ToolCheck,
    /// Human-readable storage root.
    pub storage: String,
    pub storage_remote: bool,
    /// Whether the storage root could be listed.
    pub storage_ok: bool,
    /// Whether the `aws` CLI is on `PATH`.
    pub aws_cli: bool,
    /// Whether an SSH agent socket is available.
    pub ssh_agent: bool,
    /// Whether a `terraform.tfstate` sits in the current directory.
    pub stray_state: bool,
}

/// Collect actionable issues from check results.
///
/// A missing SSH agent is a warning only and is not included.
#[must_use]
pub fn collect_issues(checks: &DoctorChecks) -> Vec<String> {
    let mut issues = Vec::new();
    for tool in [&checks.terraform, &checks.ansible] {
        match &tool.version {
            None => issues.push(format!("{} is not installed", tool.name)),
            Some(v) if !tool.version_ok => issues.push(format!(
                "{} {v} is too old (need ≥ {})",
                tool.name, tool.minimum
            )),
            Some(_) => {}
        }
    }
    if checks.storage_remote && !checks.aws_cli {
        issues.push("aws CLI not found; remote storage is unavailable".to_string());
    }
    if !checks.storage_ok {
        issues.push(format!("Storage {} is not accessible", checks.storage));
    }
    if checks.stray_state {
        issues.push("terraform.tfstate found in the current directory".to_string());
    }
    issues
}

// ── Unit tests ────────────────────────────────────────────────────────────────
