//! One value type per orchestrator operation.

use keel_common::{ProviderKind, validate_entity_id};

use super::error::PipelineError;
use super::values::{parse_version, validate_domain, validate_subdomain};

/// Deploy a new application.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub app_id: String,
    pub app_type: String,
    pub subdomain: String,
    pub domain: String,
    pub vps_id: String,
    /// Catalog default when `None`.
    pub version: Option<String>,
    /// How to create the VPS when no record for `vps_id` exists yet.
    pub provision: Option<ProvisionRequest>,
}

/// Allocate (or register) a VPS.
#[derive(Clone, PartialEq)]
pub struct ProvisionRequest {
    pub vps_id: String,
    pub provider: ProviderKind,
    /// Provider defaults from config when `None`.
    pub server_type: Option<String>,
    pub image: Option<String>,
    pub location: Option<String>,
    pub ssh_user: Option<String>,
    /// Required for [`ProviderKind::Manual`], rejected otherwise.
    pub manual: Option<ManualHost>,
}

/// An existing host keel should adopt.
#[derive(Clone, PartialEq, Eq)]
pub struct ManualHost {
    pub address: String,
    /// OpenSSH private key in PEM/OpenSSH format.
    pub private_key: String,
}

impl std::fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("vps_id", &self.vps_id)
            .field("provider", &self.provider)
            .field("server_type", &self.server_type)
            .field("image", &self.image)
            .field("location", &self.location)
            .field("ssh_user", &self.ssh_user)
            .field("manual", &self.manual.as_ref().map(|m| &m.address))
            .finish()
    }
}

/// Move an application to another release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub app_id: String,
    pub version: String,
}

/// Remove an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub app_id: String,
    /// Also delete the namespace (and with it any persistent volume claims).
    pub remove_namespace: bool,
}

fn check_id(what: &str, id: &str) -> Result<(), PipelineError> {
    validate_entity_id(id).map_err(|e| PipelineError::validation(format!("invalid {what} '{id}': {e}")))
}

impl CreateRequest {
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_id("application id", &self.app_id)?;
        check_id("VPS id", &self.vps_id)?;
        validate_subdomain(&self.subdomain)?;
        validate_domain(&self.domain)?;
        if let Some(version) = &self.version {
            parse_version(version)?;
        }
        if let Some(provision) = &self.provision {
            if provision.vps_id != self.vps_id {
                return Err(PipelineError::validation(format!(
                    "provisioning request is for '{}' but the application targets '{}'",
                    provision.vps_id, self.vps_id
                )));
            }
            provision.validate()?;
        }
        Ok(())
    }
}

impl ProvisionRequest {
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_id("VPS id", &self.vps_id)?;
        match (self.provider, &self.manual) {
            (ProviderKind::Manual, None) => Err(PipelineError::validation(
                "manual hosts need an address and a private key",
            )),
            (ProviderKind::Manual, Some(host)) => {
                if host.address.trim().is_empty() {
                    return Err(PipelineError::validation("manual host address is empty"));
                }
                if !host.private_key.contains("PRIVATE KEY") {
                    return Err(PipelineError::validation(
                        "manual host key is not an OpenSSH private key",
                    ));
                }
                Ok(())
            }
            (provider, Some(_)) => Err(PipelineError::validation(format!(
                "host address and key are only accepted for manual hosts, not {provider}"
            ))),
            (_, None) => Ok(()),
        }
    }
}

impl UpgradeRequest {
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` for a bad id or a non-semver version.
    pub fn validate(&self) -> Result<semver::Version, PipelineError> {
        check_id("application id", &self.app_id)?;
        parse_version(&self.version)
    }
}

impl DeleteRequest {
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` for a bad id.
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_id("application id", &self.app_id)
    }
}
