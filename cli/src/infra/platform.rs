//! Production wiring of every port.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::application::ports::{Adapters, Platform};
use crate::domain::config::{Credentials, KeelConfig};
use crate::infra::charts::BundledCharts;
use crate::infra::cipher::AgeCipher;
use crate::infra::command_runner::{DEFAULT_CMD_TIMEOUT, TokioCommandRunner};
use crate::infra::hetzner::{HetznerCloud, HetznerDns};
use crate::infra::keys::SshKeygen;
use crate::infra::oci::OciCompute;
use crate::infra::providers::{LiveDns, LiveProviders};
use crate::infra::remote_store::HttpKvStore;
use crate::infra::ssh::{OpenSshConnector, default_runtime_dir};
use crate::infra::versions::GithubReleases;

const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct LivePlatform;

impl Platform for LivePlatform {
    type Store = HttpKvStore;
    type Connector = OpenSshConnector<TokioCommandRunner>;
    type Providers = LiveProviders;
    type Dns = LiveDns;
    type Versions = GithubReleases;
    type Keys = SshKeygen<TokioCommandRunner>;
    type Cipher = AgeCipher;
    type Charts = BundledCharts;
}

/// Build the production adapters.
///
/// # Errors
///
/// Returns an error if `KEEL_STORE_TOKEN` is missing, the home directory
/// cannot be resolved, or an HTTP client cannot be built.
pub fn live_adapters(config: &KeelConfig, credentials: &Credentials) -> Result<Adapters<LivePlatform>> {
    let store_token = credentials.require_store_token()?;
    let runner = Arc::new(TokioCommandRunner::new(DEFAULT_CMD_TIMEOUT));

    let store = HttpKvStore::new(
        &config.store.url,
        store_token,
        Duration::from_secs(config.store.request_timeout_secs),
    )?;
    let connector = OpenSshConnector::new(
        Arc::clone(&runner),
        default_runtime_dir()?,
        config.ssh.connect_timeout(),
    );

    let hetzner = credentials
        .hcloud_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|token| HetznerCloud::new(token, PROVIDER_HTTP_TIMEOUT))
        .transpose()?;
    let oci = config
        .provisioning
        .oci
        .clone()
        .map(|oci| OciCompute::new(Arc::clone(&runner), oci));
    debug!(
        hetzner = hetzner.is_some(),
        oci = oci.is_some(),
        "compute providers configured"
    );

    let dns = match credentials.dns_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => LiveDns::Hetzner(HetznerDns::new(token, config.dns.ttl, PROVIDER_HTTP_TIMEOUT)?),
        None => LiveDns::Unconfigured,
    };

    Ok(Adapters {
        store,
        connector,
        providers: LiveProviders::new(hetzner, oci),
        dns,
        versions: GithubReleases::new(credentials.github_token.clone(), PROVIDER_HTTP_TIMEOUT)?,
        keys: SshKeygen::new(runner),
        cipher: AgeCipher::from_token(store_token),
        charts: BundledCharts::new(config.catalog.charts_dir.as_ref().map(PathBuf::from)),
    })
}
