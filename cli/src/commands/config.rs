//! `keel config`: show and set configuration values.

use anyhow::Result;
use clap::Subcommand;

use crate::app::AppContext;
use crate::application::ports::ConfigStore;
use crate::application::services::config_service;

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Run the config command.
///
/// # Errors
///
/// Returns an error if the key or value is invalid or the file cannot be
/// written.
pub fn run(app: &AppContext, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let path = app.config_store.path()?;
            app.renderer().render_config(&app.config, &path)
        }
        ConfigCommand::Set { key, value } => {
            let updated = config_service::set_config_value(&app.config_store, &key, &value)?;
            if app.is_json() {
                let path = app.config_store.path()?;
                app.renderer().render_config(&updated, &path)
            } else {
                app.output.success(&format!("Set {key} = {value}"));
                Ok(())
            }
        }
    }
}
