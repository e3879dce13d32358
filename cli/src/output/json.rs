//! JSON output helpers.
//!
//! Every `--json` result is a single pretty-printed document on stdout.
//! Failures use the error object produced by [`format_error`].

use anyhow::{Context, Result};
use serde::Serialize;

use crate::domain::error::{
    ApplicationError, ConfigError, ConnectionError, PipelineError, StoreError, VaultError,
};

/// Renders results as JSON documents.
pub struct JsonRenderer;

impl JsonRenderer {
    /// Print `value` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
        let out = serde_json::to_string_pretty(value).context("JSON serialization failed")?;
        println!("{out}");
        Ok(())
    }
}

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Stable machine-readable code for the first typed error in the chain.
#[must_use]
pub fn error_code(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<PipelineError>() {
            return match e {
                PipelineError::Validation(_) => "validation",
                PipelineError::StepFailed { .. } => "step_failed",
            };
        }
        if let Some(e) = cause.downcast_ref::<ApplicationError>() {
            return match e {
                ApplicationError::NotFound(_) | ApplicationError::VpsNotFound(_) => "not_found",
                ApplicationError::AlreadyExists(_) => "already_exists",
                ApplicationError::InvalidTransition { .. } => "invalid_transition",
                ApplicationError::VpsInUse { .. } => "vps_in_use",
            };
        }
        if cause.downcast_ref::<ConnectionError>().is_some() {
            return "connection";
        }
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return match e {
                StoreError::Unauthorized { .. } => "unauthorized",
                _ => "store",
            };
        }
        if let Some(e) = cause.downcast_ref::<VaultError>() {
            return match e {
                VaultError::NotFound { .. } => "credential_not_found",
                _ => "vault",
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return "config";
        }
    }
    "error"
}
