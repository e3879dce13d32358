//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use keel_common::AppStatus;
use thiserror::Error;

// ── Connection errors ─────────────────────────────────────────────────────────

/// Remote-shell connectivity failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot reach {host}: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("command on {vps_id} timed out after {secs}s")]
    TimedOut { vps_id: String, secs: u64 },

    #[error("connection to {vps_id} is closed")]
    Closed { vps_id: String },
}

// ── Store errors ──────────────────────────────────────────────────────────────

/// Failures talking to the remote key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected the token (HTTP {status}). Check KEEL_STORE_TOKEN.")]
    Unauthorized { status: u16 },

    #[error("store returned HTTP {status} for '{key}'")]
    Http { status: u16, key: String },

    #[error("value at '{key}' is malformed: {reason}")]
    Malformed { key: String, reason: String },

    #[error("store request failed: {0}")]
    Transport(String),
}

// ── Vault errors ──────────────────────────────────────────────────────────────

/// Secret storage and retrieval failures.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no credential found for {scope}:{entity_id}")]
    NotFound { scope: String, entity_id: String },

    #[error("refusing to store an empty secret")]
    EmptySecret,

    #[error("secret could not be decrypted: {0}")]
    Crypto(String),
}

// ── Pipeline errors ───────────────────────────────────────────────────────────

/// Failures of the provisioning and deployment pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input. Never retried, nothing was executed.
    #[error("{0}")]
    Validation(String),

    /// A step failed after earlier steps succeeded; `compensated` lists the
    /// rollback actions that ran, most recent first.
    #[error("step '{step}' failed: {message}{}", describe_compensations(.compensated))]
    StepFailed {
        step: String,
        message: String,
        compensated: Vec<String>,
    },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

fn describe_compensations(compensated: &[String]) -> String {
    if compensated.is_empty() {
        String::new()
    } else {
        format!(" (rolled back: {})", compensated.join(", "))
    }
}

// ── Application errors ────────────────────────────────────────────────────────

/// Errors related to application lifecycle.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("Application '{0}' not found. Run 'keel app list' to see applications.")]
    NotFound(String),

    #[error("Application '{0}' already exists. Use 'keel app upgrade' or delete it first.")]
    AlreadyExists(String),

    #[error("Application '{id}' cannot move from {from} to {to}.")]
    InvalidTransition {
        id: String,
        from: AppStatus,
        to: AppStatus,
    },

    #[error("VPS '{0}' not found. Run 'keel vps list' to see servers.")]
    VpsNotFound(String),

    #[error("VPS '{vps_id}' still hosts {}. Delete them first or pass --force.", .apps.join(", "))]
    VpsInUse { vps_id: String, apps: Vec<String> },
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing credential {0}. Export it before running keel.")]
    MissingCredential(String),
}
