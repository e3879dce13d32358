//! Stylesheet for terminal output, plus the colors for application status
//! and server power state.

use keel_common::{AppStatus, PowerState};
use owo_colors::Style;

/// Centralized stylesheet. Every style is plain until [`Styles::colorize`].
#[derive(Default, Clone)]
pub struct Styles {
    pub success: Style,
    pub warning: Style,
    pub error: Style,
    /// Progress arrows
    pub info: Style,
    /// Secondary text and settled states
    pub dim: Style,
    pub bold: Style,
    /// Section titles
    pub header: Style,
}

impl Styles {
    /// Apply colors to the stylesheet.
    pub fn colorize(&mut self) {
        self.success = Style::new().green();
        self.warning = Style::new().yellow();
        self.error = Style::new().red();
        self.info = Style::new().cyan();
        self.dim = Style::new().dimmed();
        self.bold = Style::new().bold();
        self.header = Style::new().bold().cyan();
    }

    /// Green when live, red when failed, yellow while a pipeline runs.
    #[must_use]
    pub fn status(&self, status: AppStatus) -> Style {
        match status {
            AppStatus::Deployed => self.success,
            AppStatus::Failed => self.error,
            AppStatus::Deploying | AppStatus::Updating | AppStatus::Deleting => self.warning,
            AppStatus::Pending | AppStatus::Removed => self.dim,
        }
    }

    #[must_use]
    pub fn power(&self, state: PowerState) -> Style {
        match state {
            PowerState::Running => self.success,
            PowerState::Stopped => self.warning,
            PowerState::Unknown => self.dim,
        }
    }
}
