use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an application
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Deploying,
    Deployed,
    Updating,
    Failed,
    Deleting,
    Removed,
}

impl AppStatus {
    /// Lowercase wire name, as stored in the record.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Updating => "updating",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An application deployed (or being deployed) onto a VPS
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Application {
    pub id: String,
    /// Catalog entry name, e.g. `code-server`.
    pub app_type: String,
    pub status: AppStatus,
    pub subdomain: String,
    pub domain: String,
    /// `https://{subdomain}.{domain}` once deployed, empty before.
    #[serde(default)]
    pub url: String,
    pub vps_id: String,
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    pub release_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last pipeline step that completed, for observers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl Application {
    /// Fully qualified host name the application is served on.
    #[must_use]
    pub fn host(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain)
    }
}

/// Compute provider backing a VPS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Hetzner,
    Oci,
    /// A host registered by hand; keel never creates or destroys it.
    Manual,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hetzner => "hetzner",
            Self::Oci => "oci",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hetzner" => Ok(Self::Hetzner),
            "oci" => Ok(Self::Oci),
            "manual" => Ok(Self::Manual),
            other => Err(format!(
                "unknown provider '{other}' (expected hetzner, oci or manual)"
            )),
        }
    }
}

/// Observed power state of a VPS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    #[default]
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        })
    }
}

/// Power action requested for a VPS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerOp {
    Start,
    Stop,
    Reboot,
}

impl PowerOp {
    /// State the VPS is expected to be in once the action completes.
    #[must_use]
    pub fn resulting_state(self) -> PowerState {
        match self {
            Self::Start | Self::Reboot => PowerState::Running,
            Self::Stop => PowerState::Stopped,
        }
    }
}

impl fmt::Display for PowerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reboot => "reboot",
        })
    }
}

/// A provisioned (or manually registered) virtual server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VpsConfig {
    pub id: String,
    pub provider: ProviderKind,
    pub public_ip: String,
    pub ssh_user: String,
    /// Store key of the encrypted private key (`vps:{id}-ssh-key.secret`).
    pub key_ref: String,
    /// Provider-native instance id; empty for manual hosts.
    #[serde(default)]
    pub provider_instance_id: String,
    #[serde(default)]
    pub hourly_cost: f64,
    #[serde(default)]
    pub monthly_cost: f64,
    #[serde(default)]
    pub power_state: PowerState,
    pub created_at: DateTime<Utc>,
}
