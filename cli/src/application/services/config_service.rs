//! Application service: configuration use-cases.

use anyhow::Result;

use crate::application::ports::ConfigStore;
use crate::domain::config::{KeelConfig, apply_config_value};

/// Set `key` to `value` and persist. Returns the updated configuration.
///
/// # Errors
///
/// Returns an error for an unknown key, an invalid value, or when the file
/// cannot be written. Nothing is saved in the error case.
pub fn set_config_value(store: &impl ConfigStore, key: &str, value: &str) -> Result<KeelConfig> {
    let mut config = store.load()?;
    apply_config_value(&mut config, key, value)?;
    store.save(&config)?;
    Ok(config)
}
