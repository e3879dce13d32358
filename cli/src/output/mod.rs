//! Output formatting module

pub mod human;
pub mod json;
pub mod progress;
pub mod reporter;
pub mod styles;

use std::path::Path;

use anyhow::Result;
use console::Term;
use keel_common::{Application, VpsConfig};
use owo_colors::OwoColorize as _;
use serde_json::json;

pub use human::HumanRenderer;
pub use json::JsonRenderer;
pub use styles::Styles;

use crate::application::services::orchestrator::{DeleteOutcome, VpsTeardown};
use crate::application::services::record_store::FetchMany;
use crate::domain::Catalog;
use crate::domain::config::KeelConfig;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Check if progress indicators should be shown.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        self.is_tty && !self.quiet
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an error message prefixed with `✗` to stderr. Never suppressed.
    pub fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "✗".style(self.styles.error));
    }

    /// Print an info message prefixed with `ℹ`. Suppressed when `quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "ℹ".style(self.styles.info));
        }
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {}  {value}", key.style(self.styles.dim));
        }
    }
}

/// Dispatches results to the human or JSON renderer.
pub enum Renderer<'a> {
    Human(HumanRenderer<'a>),
    Json(JsonRenderer),
}

impl Renderer<'_> {
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_version(&self, version: &str) -> Result<()> {
        match self {
            Self::Human(r) => r.render_version(version),
            Self::Json(_) => JsonRenderer::emit(&json!({ "version": version }))?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_app(&self, app: &Application) -> Result<()> {
        match self {
            Self::Human(r) => r.render_app(app),
            Self::Json(_) => JsonRenderer::emit(app)?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_app_list(&self, list: &FetchMany<Application>) -> Result<()> {
        match self {
            Self::Human(r) => r.render_app_list(list),
            Self::Json(_) => JsonRenderer::emit(&json!({
                "applications": list.records,
                "requested": list.requested,
                "missing": list.missing(),
            }))?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_catalog(&self, catalog: &Catalog) -> Result<()> {
        match self {
            Self::Human(r) => r.render_catalog(catalog),
            Self::Json(_) => {
                let entries: Vec<_> = catalog
                    .entries()
                    .map(|e| {
                        json!({
                            "name": e.name,
                            "description": e.description,
                            "default_version": e.default_version,
                            "chart": e.chart.kind(),
                        })
                    })
                    .collect();
                JsonRenderer::emit(&entries)?;
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_delete(&self, outcome: &DeleteOutcome) -> Result<()> {
        match self {
            Self::Human(r) => r.render_delete(outcome),
            Self::Json(_) => JsonRenderer::emit(outcome)?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_password(&self, app_id: &str, password: &str) -> Result<()> {
        match self {
            Self::Human(r) => r.render_password(password),
            Self::Json(_) => JsonRenderer::emit(&json!({ "app_id": app_id, "password": password }))?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_vps(&self, vps: &VpsConfig) -> Result<()> {
        match self {
            Self::Human(r) => r.render_vps(vps),
            Self::Json(_) => JsonRenderer::emit(vps)?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_vps_list(&self, list: &FetchMany<VpsConfig>) -> Result<()> {
        match self {
            Self::Human(r) => r.render_vps_list(list),
            Self::Json(_) => JsonRenderer::emit(&json!({
                "servers": list.records,
                "requested": list.requested,
                "missing": list.missing(),
            }))?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_teardown(&self, teardown: &VpsTeardown) -> Result<()> {
        match self {
            Self::Human(r) => r.render_teardown(teardown),
            Self::Json(_) => JsonRenderer::emit(teardown)?,
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_config(&self, config: &KeelConfig, path: &Path) -> Result<()> {
        match self {
            Self::Human(r) => r.render_config(config, path),
            Self::Json(_) => JsonRenderer::emit(&json!({
                "path": path.display().to_string(),
                "config": config,
            }))?,
        }
        Ok(())
    }
}
