//! Domain types and validators for keel configuration.
//!
//! Pure functions only; nothing here touches the filesystem.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

// ── Constants ────────────────────────────────────────────────────────────────

/// Keys accepted by `keel config set`.
pub const VALID_CONFIG_KEYS: &[&str] = &[
    "store.url",
    "store.fetch_concurrency",
    "ssh.user",
    "provisioning.server_type",
    "provisioning.image",
    "provisioning.location",
    "deploy.cluster_issuer",
    "dns.zone",
    "catalog.path",
];

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.keel/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct KeelConfig {
    pub store: StoreConfig,
    pub ssh: SshConfig,
    pub provisioning: ProvisioningConfig,
    pub deploy: DeployConfig,
    pub dns: DnsConfig,
    pub cache: CacheConfig,
    pub catalog: CatalogConfig,
}

/// Remote key-value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    /// Ceiling on in-flight reads during fetch-many.
    pub fetch_concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8500".to_string(),
            fetch_concurrency: 5,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            connect_timeout_secs: 15,
            command_timeout_secs: 120,
            probe_timeout_secs: 5,
        }
    }
}

impl SshConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub server_type: String,
    pub image: String,
    pub location: String,
    pub reachability_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Required only for the OCI provider.
    pub oci: Option<OciConfig>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            server_type: "cx22".to_string(),
            image: "ubuntu-24.04".to_string(),
            location: "fsn1".to_string(),
            reachability_timeout_secs: 300,
            poll_interval_secs: 5,
            oci: None,
        }
    }
}

impl ProvisioningConfig {
    #[must_use]
    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_secs(self.reachability_timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Placement settings for `oci compute instance launch`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OciConfig {
    pub compartment_id: String,
    pub availability_domain: String,
    pub subnet_id: String,
    pub image_id: String,
    #[serde(default = "default_oci_shape")]
    pub shape: String,
}

fn default_oci_shape() -> String {
    "VM.Standard.A1.Flex".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub helm_timeout_secs: u64,
    pub cluster_issuer: String,
    /// Per-release working directory on the host.
    pub workdir: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            helm_timeout_secs: 600,
            cluster_issuer: "letsencrypt-prod".to_string(),
            workdir: "/opt/keel/releases".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsConfig {
    /// Zone records are written into; defaults to the application's domain.
    pub zone: Option<String>,
    pub ttl: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self { zone: None, ttl: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub version_ttl_secs: u64,
    pub secret_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version_ttl_secs: 3600,
            secret_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// Extra catalog file merged over the built-in entries.
    pub path: Option<String>,
    /// Directory searched for bundled charts before the embedded ones.
    pub charts_dir: Option<String>,
}

/// Tokens read from `KEEL_*` environment variables. Never written to disk.
#[derive(Clone, Deserialize, Default)]
pub struct Credentials {
    pub store_token: Option<String>,
    pub hcloud_token: Option<String>,
    pub dns_token: Option<String>,
    pub github_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("store_token", &mask(&self.store_token))
            .field("hcloud_token", &mask(&self.hcloud_token))
            .field("dns_token", &mask(&self.dns_token))
            .field("github_token", &mask(&self.github_token))
            .finish()
    }
}

impl Credentials {
    /// The store token, which every command needs.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredential` if `KEEL_STORE_TOKEN` is unset
    /// or empty.
    pub fn require_store_token(&self) -> Result<&str, ConfigError> {
        self.store_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential("KEEL_STORE_TOKEN".to_string()))
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validates a configuration key against the whitelist.
///
/// # Errors
///
/// Returns an error if the key is not in the allowed list.
pub fn validate_config_key(key: &str) -> Result<()> {
    if !VALID_CONFIG_KEYS.contains(&key) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("unknown setting (valid: {})", VALID_CONFIG_KEYS.join(", ")),
        }
        .into());
    }
    Ok(())
}

/// Applies `value` to `key` in `config`, validating the value.
///
/// # Errors
///
/// Returns an error if the key is unknown or the value is invalid for it.
pub fn apply_config_value(config: &mut KeelConfig, key: &str, value: &str) -> Result<()> {
    validate_config_key(key)?;
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if value.trim().is_empty() {
        return Err(invalid("value must not be empty").into());
    }
    match key {
        "store.url" => {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(invalid("must start with http:// or https://").into());
            }
            config.store.url = value.trim_end_matches('/').to_string();
        }
        "store.fetch_concurrency" => {
            let n: usize = value
                .parse()
                .map_err(|_| invalid("must be a positive integer"))?;
            if n == 0 {
                return Err(invalid("must be a positive integer").into());
            }
            config.store.fetch_concurrency = n;
        }
        "ssh.user" => config.ssh.user = value.to_string(),
        "provisioning.server_type" => config.provisioning.server_type = value.to_string(),
        "provisioning.image" => config.provisioning.image = value.to_string(),
        "provisioning.location" => config.provisioning.location = value.to_string(),
        "deploy.cluster_issuer" => config.deploy.cluster_issuer = value.to_string(),
        "dns.zone" => config.dns.zone = Some(value.to_string()),
        "catalog.path" => config.catalog.path = Some(value.to_string()),
        _ => return Err(invalid("unknown setting").into()),
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────
