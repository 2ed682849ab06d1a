//! `TerminalReporter`: presentation-side `ProgressReporter`.
//!
//! Progress lines go to stdout for the operator and are mirrored into the
//! `tracing` log, so a quiet run still leaves a trail under `--debug`.

use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Terminal progress reporter over an `OutputContext`.
///
/// - `step()` prints `"  → {message}"`
/// - `success()` prints `"  ✓ {message}"`
/// - `warn()` prints `"  ! {message}"`
///
/// All three are suppressed when `ctx.quiet`.
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
}

impl<'a> TerminalReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        tracing::debug!(message, "step");
        if !self.ctx.quiet {
            println!("  {} {message}", "→".style(self.ctx.styles.step));
        }
    }

    fn success(&self, message: &str) {
        tracing::debug!(message, "success");
        self.ctx.success(message);
    }

    fn warn(&self, message: &str) {
        tracing::debug!(message, "warning");
        self.ctx.warn(message);
    }
}
