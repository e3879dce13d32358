//! Presentation-layer implementations of `ProgressReporter`.
//!
//! Application services emit progress through the port; which of these
//! receives it is decided once per command by `AppContext::reporter`.

use indicatif::ProgressBar;
use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::{OutputContext, progress};

/// Line-per-event reporter for non-TTY output.
///
/// - `step()` prints `"  → {message}"` (suppressed when `ctx.quiet`)
/// - `success()` prints `"  ✓ {message}"` (suppressed when `ctx.quiet`)
/// - `warn()` prints `"  ! {message}"` (suppressed when `ctx.quiet`)
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
        if !self.ctx.quiet {
            println!("  {} {message}", "→".style(self.ctx.styles.info));
        }
    }

    fn success(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "✓".style(self.ctx.styles.success));
        }
    }

    fn warn(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "!".style(self.ctx.styles.warning));
        }
    }
}

/// Spinner that shows the running step; completed steps scroll above it.
pub struct SpinnerReporter<'a> {
    ctx: &'a OutputContext,
    bar: ProgressBar,
}

impl<'a> SpinnerReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext, initial: &str) -> Self {
        Self {
            ctx,
            bar: progress::spinner(initial),
        }
    }

    /// Stop the spinner. A failed run leaves the last step visible.
    pub fn finish(&self, failed: bool) {
        if failed {
            let step = self.bar.message();
            progress::finish_error(&self.bar, &format!("{step} failed"));
        } else {
            progress::finish_clear(&self.bar);
        }
    }
}

impl ProgressReporter for SpinnerReporter<'_> {
    fn step(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn success(&self, message: &str) {
        self.bar
            .println(format!("  {} {message}", "✓".style(self.ctx.styles.success)));
    }

    fn warn(&self, message: &str) {
        self.bar
            .println(format!("  {} {message}", "!".style(self.ctx.styles.warning)));
    }
}

/// Discards everything; used for `--json` and `--quiet`.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn step(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
}

/// The reporter chosen for the current invocation.
pub enum CliReporter<'a> {
    Lines(TerminalReporter<'a>),
    Spinner(SpinnerReporter<'a>),
    Silent(SilentReporter),
}

impl CliReporter<'_> {
    /// Tear down any live spinner before the result is printed.
    pub fn finish<T>(&self, result: &anyhow::Result<T>) {
        if let Self::Spinner(spinner) = self {
            spinner.finish(result.is_err());
        }
    }
}

impl ProgressReporter for CliReporter<'_> {
    fn step(&self, message: &str) {
        match self {
            Self::Lines(r) => r.step(message),
            Self::Spinner(r) => r.step(message),
            Self::Silent(r) => r.step(message),
        }
    }

    fn success(&self, message: &str) {
        match self {
            Self::Lines(r) => r.success(message),
            Self::Spinner(r) => r.success(message),
            Self::Silent(r) => r.success(message),
        }
    }

    fn warn(&self, message: &str) {
        match self {
            Self::Lines(r) => r.warn(message),
            Self::Spinner(r) => r.warn(message),
            Self::Silent(r) => r.warn(message),
        }
    }
}
