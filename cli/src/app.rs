//! Application context: unified state passed to every command handler.
//!
//! `AppContext` owns the output settings and the loaded configuration.
//! Commands that talk to the store or hosts ask it for an `Orchestrator`;
//! commands that only touch local config never need credentials.

use anyhow::{Context, Result};
use tracing::debug;

use crate::application::Orchestrator;
use crate::application::ports::ConfigStore;
use crate::domain::Catalog;
use crate::domain::config::KeelConfig;
use crate::infra::config::{YamlConfigStore, load_credentials};
use crate::infra::platform::{LivePlatform, live_adapters};
use crate::output::reporter::{CliReporter, SilentReporter, SpinnerReporter, TerminalReporter};
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Behaviour flags.
pub struct BehaviourFlags {
    /// Skip interactive prompts (also set by `CI` / `KEEL_YES` env vars).
    pub yes: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Behaviour options.
    pub behaviour: BehaviourFlags,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// `~/.keel/config.yaml`.
    pub config_store: YamlConfigStore,
    /// Configuration as loaded at startup.
    pub config: KeelConfig,
    /// When `true`, skip interactive prompts and use defaults.
    ///
    /// Set when `--yes` / `-y` is passed, or when the `CI` or `KEEL_YES`
    /// environment variables are present.
    pub non_interactive: bool,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("KEEL_YES").is_ok();
        let non_interactive = flags.behaviour.yes || ci_env;

        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        let config_store = YamlConfigStore;
        let config = config_store.load()?;

        Ok(Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config_store,
            config,
            non_interactive,
        })
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    /// Progress sink for a long-running operation: a spinner on a TTY,
    /// plain lines otherwise, nothing in JSON or quiet mode.
    #[must_use]
    pub fn reporter(&self, initial: &str) -> CliReporter<'_> {
        if self.is_json() || self.output.quiet {
            CliReporter::Silent(SilentReporter)
        } else if self.output.show_progress() {
            CliReporter::Spinner(SpinnerReporter::new(&self.output, initial))
        } else {
            CliReporter::Lines(TerminalReporter::new(&self.output))
        }
    }

    /// Built-in catalog with the configured catalog file merged over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn catalog(&self) -> Result<Catalog> {
        let builtin = Catalog::builtin();
        let Some(path) = &self.config.catalog.path else {
            return Ok(builtin);
        };
        let doc = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read catalog {path}"))?;
        let extra = Catalog::from_yaml(&doc)?;
        debug!(path = %path, "catalog file merged");
        Ok(builtin.merged_with(extra))
    }

    /// Wire the production adapters and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if a required credential is missing or the catalog
    /// cannot be loaded.
    pub fn orchestrator(&self) -> Result<Orchestrator<LivePlatform>> {
        let credentials = load_credentials()?;
        debug!(?credentials, "credentials loaded");
        let adapters = live_adapters(&self.config, &credentials)?;
        Ok(Orchestrator::new(adapters, self.catalog()?, self.config.clone()))
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `KEEL_YES` env),
    /// returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
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
