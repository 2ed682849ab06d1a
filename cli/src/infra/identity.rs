//! Operator identity and host environment probes.

/// `user@host` of the current operator, recorded in locks and run markers.
#[must_use]
pub fn whoami() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}")
}

/// Whether an ssh-agent socket is advertised in the environment.
#[must_use]
pub fn ssh_agent_available() -> bool {
    std::env::var_os("SSH_AUTH_SOCK").is_some_and(|s| !s.is_empty())
}

/// Whether a stray `terraform.tfstate` in `dir` would shadow explicit state
/// paths.
#[must_use]
pub fn stray_state_file(dir: &std::path::Path) -> bool {
    dir.join("terraform.tfstate").is_file()
}
