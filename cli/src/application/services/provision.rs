//! Provisioning pipeline: allocate a VPS, install its access key, wait until
//! it answers over SSH, install the k3s runtime and record it.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt as _;
use keel_common::{PowerState, ProviderKind, VpsConfig, qualified_key, scopes, secret_key, ssh_key_entity};
use tracing::{debug, info, warn};

use crate::application::ports::{
    ComputeProvider, Instance, InstanceSpec, KeyGenerator, KvStore, Platform, ProgressReporter,
    ProviderLookup, RemoteShell, SshTarget, StepObserver,
};
use crate::application::services::connection_pool::ConnectionPool;
use crate::application::services::rollback::{InStep, RollbackStack, StepFailure};
use crate::application::services::vault::CredentialVault;
use crate::domain::config::KeelConfig;
use crate::domain::credentials::KUBECONFIG;
use crate::domain::error::{ConnectionError, PipelineError};
use crate::domain::values::dns_label;
use crate::domain::{ProvisionRequest, RemoteCommand};

const K3S_INSTALL: &str = "curl -sfL https://get.k3s.io | INSTALL_K3S_EXEC='--write-kubeconfig-mode=600' sh -";
const HELM_INSTALL: &str =
    "curl -fsSL https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3 | bash";
const K3S_UNINSTALL: &str = "/usr/local/bin/k3s-uninstall.sh";
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(900);

/// Cloud-init document that authorizes `public_key` for SSH.
#[must_use]
pub fn cloud_init_user_data(public_key: &str) -> String {
    format!(
        "#cloud-config\ndisable_root: false\nssh_pwauth: false\nssh_authorized_keys:\n  - {}\n",
        public_key.trim()
    )
}

/// SSH target for a recorded VPS.
#[must_use]
pub fn ssh_target(vps: &VpsConfig, key_material: String, port: u16) -> SshTarget {
    SshTarget {
        vps_id: vps.id.clone(),
        host: vps.public_ip.clone(),
        user: vps.ssh_user.clone(),
        port,
        key_material,
    }
}

/// Runs the provisioning steps against one platform.
pub struct Provisioner<'a, P: Platform> {
    pub store: &'a P::Store,
    pub vault: &'a CredentialVault<P::Store, P::Cipher>,
    pub pool: &'a ConnectionPool<P::Connector>,
    pub providers: &'a P::Providers,
    pub keys: &'a P::Keys,
    pub config: &'a KeelConfig,
}

impl<'a, P: Platform> Provisioner<'a, P> {
    /// Provision the VPS described by `req`.
    ///
    /// Each completed step registers its compensation; on failure they run
    /// in reverse and the error names the failed step.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` for bad input (nothing executed)
    /// or `PipelineError::StepFailed` after rolling back.
    pub async fn run(
        &self,
        req: &ProvisionRequest,
        reporter: &impl ProgressReporter,
        observer: &impl StepObserver,
    ) -> Result<VpsConfig, PipelineError> {
        req.validate()?;
        let mut rollback = RollbackStack::new();
        let outcome = self.steps(req, &mut rollback, reporter, observer).await;
        rollback.settle(outcome).await
    }

    async fn steps(
        &self,
        req: &ProvisionRequest,
        rollback: &mut RollbackStack<'a>,
        reporter: &impl ProgressReporter,
        observer: &impl StepObserver,
    ) -> Result<VpsConfig, StepFailure> {
        let vps_id = req.vps_id.clone();
        let settings = &self.config.provisioning;
        let user = req
            .ssh_user
            .clone()
            .unwrap_or_else(|| self.config.ssh.user.clone());

        // 1. access key
        let (private_key, instance) = if let Some(host) = &req.manual {
            reporter.step("validating host key...");
            self.keys
                .public_key(&host.private_key)
                .await
                .context("the supplied private key is not usable")
                .in_step("validate-key")?;
            observer.step_completed("validate-key").await;
            let instance = Instance {
                provider_instance_id: String::new(),
                public_ip: host.address.clone(),
                hourly_cost: 0.0,
                monthly_cost: 0.0,
            };
            (host.private_key.clone(), instance)
        } else {
            reporter.step("generating access key...");
            let pair = self
                .keys
                .generate(&format!("keel-{vps_id}"))
                .await
                .in_step("generate-key")?;
            observer.step_completed("generate-key").await;

            // 2. compute instance
            reporter.step(&format!("creating {} instance...", req.provider));
            let providers: &'a P::Providers = self.providers;
            let provider = providers.provider(req.provider).in_step("create-instance")?;
            let spec = InstanceSpec {
                name: dns_label(&vps_id, 63),
                server_type: req
                    .server_type
                    .clone()
                    .unwrap_or_else(|| settings.server_type.clone()),
                image: req.image.clone().unwrap_or_else(|| settings.image.clone()),
                location: req
                    .location
                    .clone()
                    .unwrap_or_else(|| settings.location.clone()),
                user_data: cloud_init_user_data(&pair.public_key),
            };
            let instance = provider.create_instance(&spec).await.in_step("create-instance")?;
            info!(vps_id = %vps_id, instance = %instance.provider_instance_id, ip = %instance.public_ip, "instance created");
            let instance_id = instance.provider_instance_id.clone();
            rollback.push("create-instance", move || {
                async move { provider.delete_instance(&instance_id).await }.boxed()
            });
            observer.step_completed("create-instance").await;
            (pair.private_key, instance)
        };

        // 3. store the key
        reporter.step("storing access key...");
        let key_entity = ssh_key_entity(&vps_id);
        self.vault
            .store_encrypted_password(scopes::VPS, &key_entity, &private_key)
            .await
            .in_step("install-key")?;
        let vault = self.vault;
        let entity = key_entity.clone();
        rollback.push("install-key", move || {
            async move { vault.forget(scopes::VPS, &entity).await }.boxed()
        });
        observer.step_completed("install-key").await;

        // 4. reachability
        let vps = VpsConfig {
            id: vps_id.clone(),
            provider: req.provider,
            public_ip: instance.public_ip.clone(),
            ssh_user: user,
            key_ref: qualified_key(scopes::VPS, &secret_key(&key_entity)),
            provider_instance_id: instance.provider_instance_id.clone(),
            hourly_cost: instance.hourly_cost,
            monthly_cost: instance.monthly_cost,
            power_state: PowerState::Running,
            created_at: Utc::now(),
        };
        reporter.step(&format!("waiting for {} to accept SSH...", vps.public_ip));
        let target = ssh_target(&vps, private_key, self.config.ssh.port);
        self.pool.forget_host(&vps_id).await.in_step("wait-reachable")?;
        self.wait_reachable(&target).await.in_step("wait-reachable")?;
        let pool = self.pool;
        let pinned_id = vps_id.clone();
        rollback.push("wait-reachable", move || {
            async move { pool.forget_host(&pinned_id).await }.boxed()
        });
        observer.step_completed("wait-reachable").await;

        // 5. runtime
        reporter.step("installing k3s, helm and cert-manager...");
        let installed_k3s = self.bootstrap_runtime(&target).await.in_step("bootstrap-runtime")?;
        if installed_k3s {
            let target = target.clone();
            rollback.push("bootstrap-runtime", move || {
                async move {
                    let conn = pool.get_or_create(&target).await?;
                    conn.run_with_timeout(&RemoteCommand::new(K3S_UNINSTALL), BOOTSTRAP_TIMEOUT)
                        .await?;
                    Ok(())
                }
                .boxed()
            });
        }
        observer.step_completed("bootstrap-runtime").await;

        // 6. record
        self.store
            .put(scopes::VPS, &vps_id, &vps)
            .await
            .in_step("save-vps")?;
        observer.step_completed("save-vps").await;
        reporter.success(&format!("VPS {vps_id} ready at {}", vps.public_ip));
        Ok(vps)
    }

    async fn wait_reachable(&self, target: &SshTarget) -> Result<()> {
        let settings = &self.config.provisioning;
        let deadline = tokio::time::Instant::now() + settings.reachability_timeout();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.pool.get_or_create(target).await {
                Ok(conn) => match conn.run(&RemoteCommand::raw("true")).await {
                    Ok(out) if out.success() => {
                        debug!(vps_id = %target.vps_id, attempt, "host reachable");
                        return Ok(());
                    }
                    Ok(out) => debug!(vps_id = %target.vps_id, attempt, code = out.exit_code, "probe failed"),
                    Err(e) => debug!(vps_id = %target.vps_id, attempt, error = %format!("{e:#}"), "probe errored"),
                },
                Err(e) => debug!(vps_id = %target.vps_id, attempt, error = %format!("{e:#}"), "not reachable yet"),
            }
            if tokio::time::Instant::now() + settings.poll_interval() > deadline {
                self.pool.evict(&target.vps_id).await;
                return Err(ConnectionError::Unreachable {
                    host: target.host.clone(),
                    reason: format!(
                        "no SSH after {}s ({attempt} attempts)",
                        settings.reachability_timeout_secs
                    ),
                }
                .into());
            }
            tokio::time::sleep(settings.poll_interval()).await;
        }
    }

    /// Install k3s, helm and cert-manager where missing. Returns whether k3s was installed
    /// by this call; a failure after that point uninstalls it again.
    async fn bootstrap_runtime(&self, target: &SshTarget) -> Result<bool> {
        let conn = self.pool.get_or_create(target).await?;
        let has_k3s = conn
            .run(&RemoteCommand::new("command").args(["-v", "k3s"]).discard_stdout())
            .await?
            .success();

        if !has_k3s {
            info!(vps_id = %target.vps_id, "installing k3s");
            let out = conn
                .run_with_timeout(&RemoteCommand::raw(K3S_INSTALL), BOOTSTRAP_TIMEOUT)
                .await?;
            if !out.success() {
                anyhow::bail!("k3s install failed: {}", out.diagnostic());
            }
        }

        let rest = async {
            for (what, command) in runtime_steps() {
                let out = conn.run_with_timeout(&command, BOOTSTRAP_TIMEOUT).await?;
                if !out.success() {
                    anyhow::bail!("{what} failed: {}", out.diagnostic());
                }
                debug!(vps_id = %target.vps_id, step = what, "runtime step done");
            }
            Ok::<(), anyhow::Error>(())
        };

        if let Err(e) = rest.await {
            if !has_k3s {
                warn!(vps_id = %target.vps_id, "removing partially bootstrapped k3s");
                if let Err(cleanup) = conn
                    .run_with_timeout(&RemoteCommand::new(K3S_UNINSTALL), BOOTSTRAP_TIMEOUT)
                    .await
                {
                    warn!(vps_id = %target.vps_id, error = %format!("{cleanup:#}"), "k3s uninstall failed");
                }
            }
            return Err(e);
        }
        Ok(!has_k3s)
    }
}

/// Ordered bootstrap commands run after k3s is present. Each is idempotent.
fn runtime_steps() -> Vec<(&'static str, RemoteCommand)> {
    vec![
        (
            "k3s readiness",
            RemoteCommand::new("kubectl").args([
                "--kubeconfig",
                KUBECONFIG,
                "wait",
                "--for=condition=Ready",
                "node",
                "--all",
                "--timeout=300s",
            ]),
        ),
        (
            "helm install",
            RemoteCommand::new("command")
                .args(["-v", "helm"])
                .discard_stdout()
                .or_else(RemoteCommand::raw(HELM_INSTALL)),
        ),
        (
            "cert-manager install",
            RemoteCommand::new("helm")
                .args(["repo", "add", "jetstack", "https://charts.jetstack.io", "--force-update"])
                .and_then(
                    RemoteCommand::new("helm")
                        .args(["upgrade", "--install", "cert-manager", "jetstack/cert-manager"])
                        .args(["--kubeconfig", KUBECONFIG, "-n", "cert-manager", "--create-namespace"])
                        .args(["--set", "crds.enabled=true", "--wait", "--timeout", "600s"]),
                ),
        ),
    ]
}

/// Provider handle for `kind`, as a helper for teardown and power paths.
///
/// # Errors
///
/// Returns an error when the provider is not configured.
pub fn provider_for<L: ProviderLookup>(providers: &L, kind: ProviderKind) -> Result<&L::Provider> {
    providers
        .provider(kind)
        .with_context(|| format!("{kind} provider is not configured"))
}
