//! Provider dispatch: the tag on a VPS record picks the compute backend.

use anyhow::Result;
use keel_common::{PowerOp, ProviderKind};
use tracing::debug;

use crate::application::ports::{
    ComputeProvider, DnsProvider, Instance, InstanceSpec, ProviderLookup,
};
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::hetzner::{HetznerCloud, HetznerDns};
use crate::infra::oci::OciCompute;

/// A host registered by hand. keel never creates, destroys or powers it.
pub struct ManualHost;

impl ComputeProvider for ManualHost {
    async fn create_instance(&self, _spec: &InstanceSpec) -> Result<Instance> {
        anyhow::bail!("manual hosts are registered, not created; supply host and private key")
    }

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<()> {
        debug!(id = provider_instance_id, "manual host left running");
        Ok(())
    }

    async fn power(&self, _provider_instance_id: &str, _op: PowerOp) -> Result<()> {
        anyhow::bail!("power operations are not supported for manual hosts")
    }
}

pub enum CloudProvider {
    Hetzner(HetznerCloud),
    Oci(OciCompute<TokioCommandRunner>),
    Manual(ManualHost),
}

impl ComputeProvider for CloudProvider {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        match self {
            Self::Hetzner(p) => p.create_instance(spec).await,
            Self::Oci(p) => p.create_instance(spec).await,
            Self::Manual(p) => p.create_instance(spec).await,
        }
    }

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<()> {
        match self {
            Self::Hetzner(p) => p.delete_instance(provider_instance_id).await,
            Self::Oci(p) => p.delete_instance(provider_instance_id).await,
            Self::Manual(p) => p.delete_instance(provider_instance_id).await,
        }
    }

    async fn power(&self, provider_instance_id: &str, op: PowerOp) -> Result<()> {
        match self {
            Self::Hetzner(p) => p.power(provider_instance_id, op).await,
            Self::Oci(p) => p.power(provider_instance_id, op).await,
            Self::Manual(p) => p.power(provider_instance_id, op).await,
        }
    }
}

/// Providers available in this process. Cloud backends are absent when
/// their credentials or settings are missing.
pub struct LiveProviders {
    hetzner: Option<CloudProvider>,
    oci: Option<CloudProvider>,
    manual: CloudProvider,
}

impl LiveProviders {
    #[must_use]
    pub fn new(hetzner: Option<HetznerCloud>, oci: Option<OciCompute<TokioCommandRunner>>) -> Self {
        Self {
            hetzner: hetzner.map(CloudProvider::Hetzner),
            oci: oci.map(CloudProvider::Oci),
            manual: CloudProvider::Manual(ManualHost),
        }
    }
}

impl ProviderLookup for LiveProviders {
    type Provider = CloudProvider;

    fn provider(&self, kind: ProviderKind) -> Result<&CloudProvider> {
        match kind {
            ProviderKind::Hetzner => self
                .hetzner
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("hetzner provider not configured: set KEEL_HCLOUD_TOKEN")),
            ProviderKind::Oci => self.oci.as_ref().ok_or_else(|| {
                anyhow::anyhow!("oci provider not configured: add provisioning.oci to the config")
            }),
            ProviderKind::Manual => Ok(&self.manual),
        }
    }
}

/// DNS backend; without a token, record changes fail with a clear message.
pub enum LiveDns {
    Hetzner(HetznerDns),
    Unconfigured,
}

const DNS_NOT_CONFIGURED: &str = "DNS provider not configured: set KEEL_DNS_TOKEN";

impl DnsProvider for LiveDns {
    async fn upsert_a_record(&self, zone: &str, name: &str, ip: &str) -> Result<()> {
        match self {
            Self::Hetzner(dns) => dns.upsert_a_record(zone, name, ip).await,
            Self::Unconfigured => anyhow::bail!(DNS_NOT_CONFIGURED),
        }
    }

    async fn delete_a_record(&self, zone: &str, name: &str) -> Result<()> {
        match self {
            Self::Hetzner(dns) => dns.delete_a_record(zone, name).await,
            Self::Unconfigured => anyhow::bail!(DNS_NOT_CONFIGURED),
        }
    }
}
