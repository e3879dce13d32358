//! Command implementations

pub mod apps;
pub mod config;
pub mod version;
pub mod vps;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use keel_common::ProviderKind;

use crate::domain::{ManualHost, ProvisionRequest};

/// How to obtain a VPS. Shared by `keel vps create` and `keel app create`.
#[derive(Args, Default)]
pub struct ProvisionArgs {
    /// hetzner, oci or manual
    #[arg(long)]
    pub provider: Option<ProviderKind>,
    /// Provider server type (config default when omitted)
    #[arg(long, requires = "provider")]
    pub server_type: Option<String>,
    #[arg(long, requires = "provider")]
    pub image: Option<String>,
    #[arg(long, requires = "provider")]
    pub location: Option<String>,
    #[arg(long, requires = "provider")]
    pub ssh_user: Option<String>,
    /// Address of a manual host
    #[arg(long, requires = "key_file")]
    pub host: Option<String>,
    /// Private key file for a manual host
    #[arg(long, requires = "host")]
    pub key_file: Option<PathBuf>,
}

impl ProvisionArgs {
    /// `None` when no provider was requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the manual host key file cannot be read.
    pub fn into_request(self, vps_id: &str) -> Result<Option<ProvisionRequest>> {
        let Some(provider) = self.provider else {
            return Ok(None);
        };
        let manual = match (self.host, self.key_file) {
            (Some(address), Some(path)) => {
                let private_key = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read key file {}", path.display()))?;
                Some(ManualHost {
                    address,
                    private_key,
                })
            }
            _ => None,
        };
        Ok(Some(ProvisionRequest {
            vps_id: vps_id.to_string(),
            provider,
            server_type: self.server_type,
            image: self.image,
            location: self.location,
            ssh_user: self.ssh_user,
            manual,
        }))
    }
}
