//! Command implementations

pub mod doctor;
pub mod list;
pub mod run;
pub mod version;

use anyhow::{Context, Result};
use clap::Args;

use crate::domain::config::StorageLocation;

/// Where deployment state lives.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// State root: a local directory or s3://BUCKET[/PREFIX]
    #[arg(
        short = 'b',
        long,
        env = "STRATA_BASE_DIR",
        value_name = "DIR|s3://BUCKET[/PREFIX]"
    )]
    pub base_dir: Option<String>,
}

impl StorageArgs {
    /// Parse the configured state root.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingBaseDir` when none was given.
    pub fn location(&self) -> Result<StorageLocation> {
        StorageLocation::parse(self.base_dir.as_deref().unwrap_or_default())
    }
}

/// Split a shell-word list from environment variable `name`; unset is empty.
///
/// # Errors
///
/// Returns an error if the value has unbalanced quotes.
pub fn env_list(name: &str) -> Result<Vec<String>> {
    match std::env::var(name) {
        Ok(value) => {
            shell_words::split(&value).with_context(|| format!("parsing ${name} as a word list"))
        }
        Err(_) => Ok(Vec::new()),
    }
}

/// Split a flag value such as `--terraform-args "-parallelism=2 -lock=false"`.
///
/// # Errors
///
/// Returns an error if the value has unbalanced quotes.
pub fn split_args(flag: &str, value: Option<&str>) -> Result<Vec<String>> {
    value.map_or_else(
        || Ok(Vec::new()),
        |v| shell_words::split(v).with_context(|| format!("parsing {flag}")),
    )
}
