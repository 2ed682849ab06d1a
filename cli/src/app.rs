//! Application context — unified state passed to every command handler.
//!
//! Adding a new cross-cutting concern requires only one field change here;
//! no command signature changes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;

use crate::application::ports::Confirm;
use crate::output::OutputContext;

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Render machine-readable JSON instead of text.
    pub json: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    pub output: OutputFlags,
    /// Answer yes to every prompt (`--yes` / `STRATA_YES`).
    pub yes: bool,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Render machine-readable JSON instead of text.
    pub json: bool,
    /// Answer yes to every prompt.
    pub assume_yes: bool,
    /// When `true`, prompts are not shown and answer their default.
    ///
    /// Set when the `CI` environment variable is present or stderr is not a
    /// terminal.
    pub non_interactive: bool,
    /// Set by the Ctrl-C handler; checked between steps.
    pub interrupted: Arc<AtomicBool>,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    #[must_use]
    pub fn new(flags: &AppFlags, interrupted: Arc<AtomicBool>) -> Self {
        let non_interactive =
            std::env::var_os("CI").is_some() || !console::Term::stderr().is_term();
        Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            json: flags.output.json,
            assume_yes: flags.yes,
            non_interactive,
            interrupted,
        }
    }
}

impl Confirm for AppContext {
    /// Ask the operator for confirmation.
    ///
    /// `--yes` answers `true`; non-interactive sessions return `default`
    /// without prompting.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}
