//! Deployment pipeline: fetch the chart, render values, install or upgrade
//! the Helm release, then attach certificate, DNS and credentials.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt as _;
use keel_common::scopes;
use tracing::{debug, info, warn};

use crate::application::ports::{
    ChartBundle, CommandOutput, DnsProvider, Platform, ProgressReporter, RemoteSession, RemoteShell,
    SessionConnector, SshTarget, StepObserver,
};
use crate::application::services::connection_pool::{
    ConnectionPool, PooledConnection, SharedConnection,
};
use crate::application::services::rollback::{InStep, RollbackStack, StepFailure};
use crate::application::services::vault::CredentialVault;
use crate::domain::config::KeelConfig;
use crate::domain::credentials::{KUBECONFIG, ProbeTarget};
use crate::domain::error::PipelineError;
use crate::domain::values::{TemplateVars, render_template};
use crate::domain::{CatalogEntry, ChartSource, RemoteCommand};

/// Kinds removed when a namespace created by a failed install is cleaned
/// up. Persistent volume claims are deliberately absent.
const NAMESPACED_KINDS: &str = "deployments,statefulsets,daemonsets,replicasets,pods,services,ingresses,configmaps,secrets,jobs,cronjobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// First install; a failure removes everything this run created.
    Install,
    /// In-place upgrade; a failure rolls the release back.
    Upgrade,
}

/// Everything the pipeline needs to know about one release.
#[derive(Debug, Clone)]
pub struct DeployPlan<'e> {
    pub app_id: String,
    pub entry: &'e CatalogEntry,
    pub vars: TemplateVars,
    pub public_ip: String,
    pub mode: DeployMode,
}

impl DeployPlan<'_> {
    #[must_use]
    pub fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            namespace: self.vars.namespace.clone(),
            release_name: self.vars.release_name.clone(),
            workload: self.entry.workload_for(&self.vars.release_name),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub release_name: String,
    pub namespace: String,
    pub host: String,
    pub credential_recovered: bool,
}

/// Per-release working directory on the host.
#[must_use]
pub fn release_workdir(config: &KeelConfig, release_name: &str) -> String {
    format!("{}/{release_name}", config.deploy.workdir.trim_end_matches('/'))
}

/// `kubectl --kubeconfig … -n <namespace>` prefix.
#[must_use]
pub fn kubectl(namespace: &str) -> RemoteCommand {
    RemoteCommand::new("kubectl")
        .args(["--kubeconfig", KUBECONFIG, "-n"])
        .arg(namespace)
}

/// `helm uninstall`, tolerant of a release that is already gone.
#[must_use]
pub fn helm_uninstall(release_name: &str, namespace: &str) -> RemoteCommand {
    RemoteCommand::new("helm")
        .arg("uninstall")
        .arg(release_name)
        .args(["--kubeconfig", KUBECONFIG, "-n"])
        .arg(namespace)
        .arg("--ignore-not-found")
}

/// Record name for `host` relative to `zone` (`@` for the apex).
#[must_use]
pub fn record_name(host: &str, zone: &str) -> String {
    let host = host.trim_end_matches('.');
    let zone = zone.trim_end_matches('.');
    if host == zone {
        return "@".to_string();
    }
    host.strip_suffix(zone)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(host)
        .to_string()
}

/// cert-manager issuer and certificate for `host`.
#[must_use]
pub fn certificate_manifest(release_name: &str, namespace: &str, host: &str, issuer: &str) -> String {
    format!(
        "apiVersion: cert-manager.io/v1
kind: ClusterIssuer
metadata:
  name: {issuer}
spec:
  acme:
    server: https://acme-v02.api.letsencrypt.org/directory
    privateKeySecretRef:
      name: {issuer}-account
    solvers:
      - http01:
          ingress:
            ingressClassName: traefik
---
apiVersion: cert-manager.io/v1
kind: Certificate
metadata:
  name: {release_name}-tls
  namespace: {namespace}
spec:
  secretName: {release_name}-tls
  dnsNames:
    - {host}
  issuerRef:
    name: {issuer}
    kind: ClusterIssuer
"
    )
}

/// Runs the deployment steps for one release.
pub struct Deployer<'a, P: Platform> {
    pub pool: &'a ConnectionPool<P::Connector>,
    pub vault: &'a CredentialVault<P::Store, P::Cipher>,
    pub dns: &'a P::Dns,
    pub charts: &'a P::Charts,
    pub config: &'a KeelConfig,
}

type Connection<P> = PooledConnection<<<P as Platform>::Connector as SessionConnector>::Session>;

impl<'a, P: Platform> Deployer<'a, P> {
    /// Deploy `plan` onto the VPS reachable at `target`.
    ///
    /// The values template is rendered before anything runs, so a bad
    /// template fails without side effects. Chart, values, namespace and
    /// release steps are rolled back on failure; certificate and DNS run
    /// after the release is live and are not.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` or `PipelineError::StepFailed`.
    pub async fn run(
        &self,
        plan: &DeployPlan<'_>,
        target: &SshTarget,
        reporter: &impl ProgressReporter,
        observer: &impl StepObserver,
    ) -> Result<DeployReport, PipelineError> {
        let values = render_template(&plan.entry.values_template, &plan.vars)?;

        let mut rollback = RollbackStack::new();
        let outcome = self
            .release_steps(plan, target, values, &mut rollback, reporter, observer)
            .await;
        let conn = rollback.settle(outcome).await?;

        let host = plan.vars.host();
        self.post_steps(plan, &conn, &host, reporter, observer)
            .await
            .map_err(|failure| PipelineError::StepFailed {
                step: failure.step.to_string(),
                message: format!("{:#}", failure.error),
                compensated: Vec::new(),
            })?;

        let credential_recovered = self.harvest_credentials(plan, conn.as_ref()).await;
        observer.step_completed("harvest-credentials").await;

        Ok(DeployReport {
            release_name: plan.vars.release_name.clone(),
            namespace: plan.vars.namespace.clone(),
            host,
            credential_recovered,
        })
    }

    async fn release_steps(
        &self,
        plan: &DeployPlan<'_>,
        target: &SshTarget,
        values: String,
        rollback: &mut RollbackStack<'a>,
        reporter: &impl ProgressReporter,
        observer: &impl StepObserver,
    ) -> Result<SharedConnection<P::Connector>, StepFailure> {
        let release = plan.vars.release_name.clone();
        let namespace = plan.vars.namespace.clone();
        let workdir = release_workdir(self.config, &release);

        let conn = self.pool.get_or_create(target).await.in_step("connect")?;

        // 1. chart
        reporter.step(&format!("fetching {} chart...", plan.entry.chart.kind()));
        let (fetch, chart_ref) = self.chart_fetch(&plan.entry.chart, &workdir).in_step("resolve-chart")?;
        expect_success(conn.run(&fetch).await, "chart fetch").in_step("resolve-chart")?;
        if plan.mode == DeployMode::Install {
            let conn = Arc::clone(&conn);
            let dir = workdir.clone();
            rollback.push("resolve-chart", move || {
                async move {
                    expect_success(
                        conn.run(&RemoteCommand::new("rm").args(["-rf", dir.as_str()])).await,
                        "workdir removal",
                    )
                }
                .boxed()
            });
        }
        observer.step_completed("resolve-chart").await;

        // 2. values
        let values_path = format!("{workdir}/values.yaml");
        expect_success(
            conn.run(&RemoteCommand::write_file(&values_path, values.into_bytes()))
                .await,
            "values upload",
        )
        .in_step("render-values")?;
        observer.step_completed("render-values").await;

        // 3. namespace
        let exists = conn
            .run(
                &RemoteCommand::new("kubectl")
                    .args(["--kubeconfig", KUBECONFIG, "get", "namespace"])
                    .arg(&namespace)
                    .discard_stdout()
                    .discard_stderr(),
            )
            .await
            .in_step("ensure-namespace")?
            .success();
        if !exists {
            expect_success(
                conn.run(
                    &RemoteCommand::new("kubectl")
                        .args(["--kubeconfig", KUBECONFIG, "create", "namespace"])
                        .arg(&namespace),
                )
                .await,
                "namespace creation",
            )
            .in_step("ensure-namespace")?;
            let conn = Arc::clone(&conn);
            let ns = namespace.clone();
            rollback.push("ensure-namespace", move || {
                async move {
                    let cleanup = kubectl(&ns)
                        .args(["delete", NAMESPACED_KINDS, "--all", "--ignore-not-found"]);
                    expect_success(conn.run(&cleanup).await, "namespace cleanup")
                }
                .boxed()
            });
        }
        observer.step_completed("ensure-namespace").await;

        // 4. release
        reporter.step(&format!("running helm for {release}..."));
        let mut mode = plan.mode;
        if mode == DeployMode::Install
            && self
                .release_exists(&conn, &release, &namespace)
                .await
                .in_step("helm-release")?
        {
            info!(release = %release, namespace = %namespace, "release already installed, upgrading in place");
            mode = DeployMode::Upgrade;
        }
        let helm_secs = self.config.deploy.helm_timeout_secs;
        let helm = match mode {
            DeployMode::Install => RemoteCommand::new("helm").arg("install"),
            DeployMode::Upgrade => RemoteCommand::new("helm").args(["upgrade", "--install"]),
        }
        .arg(&release)
        .arg(&chart_ref)
        .args(["--kubeconfig", KUBECONFIG, "-n"])
        .arg(&namespace)
        .arg("-f")
        .arg(&values_path)
        .args(["--wait", "--timeout"])
        .arg(format!("{helm_secs}s"));
        let helm_result = expect_success(
            conn.run_with_timeout(&helm, Duration::from_secs(helm_secs + 60)).await,
            "helm",
        );
        if let Err(e) = helm_result {
            self.undo_release(&conn, mode, &release, &namespace).await;
            return Err(e).in_step("helm-release");
        }
        info!(release = %release, namespace = %namespace, mode = ?mode, "helm release applied");
        observer.step_completed("helm-release").await;

        Ok(conn)
    }

    /// Whether helm already tracks `release` in `namespace`, in any state.
    /// An install into an existing release is run as an upgrade so that a
    /// failure rolls it back instead of uninstalling it.
    async fn release_exists(
        &self,
        conn: &Connection<P>,
        release: &str,
        namespace: &str,
    ) -> Result<bool> {
        let list = RemoteCommand::new("helm")
            .args(["list", "--all", "-q", "--kubeconfig", KUBECONFIG, "-n"])
            .arg(namespace)
            .arg("--filter")
            .arg(format!("^{release}$"));
        let output = conn.run(&list).await?;
        if !output.success() {
            anyhow::bail!(
                "helm release lookup failed (exit {}): {}",
                output.exit_code,
                output.diagnostic()
            );
        }
        Ok(output.stdout.lines().any(|line| line.trim() == release))
    }

    /// Clean up a half-applied release before the step reports failure.
    async fn undo_release(
        &self,
        conn: &Connection<P>,
        mode: DeployMode,
        release: &str,
        namespace: &str,
    ) {
        let undo = match mode {
            DeployMode::Install => helm_uninstall(release, namespace),
            DeployMode::Upgrade => RemoteCommand::new("helm")
                .arg("rollback")
                .arg(release)
                .args(["0", "--wait", "--kubeconfig", KUBECONFIG, "-n"])
                .arg(namespace),
        };
        let timeout = Duration::from_secs(self.config.deploy.helm_timeout_secs + 60);
        if let Err(e) = expect_success(conn.run_with_timeout(&undo, timeout).await, "helm cleanup") {
            warn!(release, mode = ?mode, error = %format!("{e:#}"), "helm cleanup failed");
        }
    }

    /// Remote command that puts the chart in place, and the chart reference
    /// helm should use afterwards.
    fn chart_fetch(&self, source: &ChartSource, workdir: &str) -> Result<(RemoteCommand, String)> {
        let mkdir = RemoteCommand::new("mkdir").args(["-p", workdir]);
        match source {
            ChartSource::LocalBundled { path } => {
                let archive = self
                    .charts
                    .pack(path)
                    .with_context(|| format!("packing bundled chart '{path}'"))?;
                let chart_dir = format!("{workdir}/chart");
                let cmd = RemoteCommand::new("rm")
                    .args(["-rf", chart_dir.as_str()])
                    .and_then(RemoteCommand::new("mkdir").args(["-p", chart_dir.as_str()]))
                    .and_then(RemoteCommand::new("tar").args(["-xzf", "-", "-C", chart_dir.as_str()]))
                    .with_stdin(archive);
                Ok((cmd, chart_dir))
            }
            ChartSource::Git {
                url,
                reference,
                chart_dir,
            } => {
                let src = format!("{workdir}/src");
                let cmd = mkdir
                    .and_then(RemoteCommand::new("rm").args(["-rf", src.as_str()]))
                    .and_then(
                        RemoteCommand::new("git")
                            .args(["clone", "--depth", "1", "--branch"])
                            .arg(reference)
                            .arg(url)
                            .arg(&src),
                    );
                Ok((cmd, format!("{src}/{}", chart_dir.trim_matches('/'))))
            }
            ChartSource::HelmRepository { name, url, chart } => {
                let cmd = mkdir
                    .and_then(
                        RemoteCommand::new("helm")
                            .args(["repo", "add", "--force-update"])
                            .arg(name)
                            .arg(url),
                    )
                    .and_then(RemoteCommand::new("helm").args(["repo", "update"]).arg(name));
                Ok((cmd, format!("{name}/{chart}")))
            }
        }
    }

    async fn post_steps(
        &self,
        plan: &DeployPlan<'_>,
        conn: &Connection<P>,
        host: &str,
        reporter: &impl ProgressReporter,
        observer: &impl StepObserver,
    ) -> Result<(), StepFailure> {
        let release = &plan.vars.release_name;
        let namespace = &plan.vars.namespace;

        reporter.step(&format!("requesting certificate for {host}..."));
        let current = conn
            .run(
                &kubectl(namespace)
                    .args(["get", "certificate"])
                    .arg(format!("{release}-tls"))
                    .arg("-o=jsonpath={.spec.dnsNames[0]}")
                    .discard_stderr(),
            )
            .await
            .in_step("apply-certificate")?;
        if current.success() && current.stdout.trim() == host {
            debug!(release = %release, host, "certificate already covers host");
        } else {
            let manifest =
                certificate_manifest(release, namespace, host, &self.config.deploy.cluster_issuer);
            let apply = RemoteCommand::new("kubectl")
                .args(["--kubeconfig", KUBECONFIG, "apply", "-f", "-"])
                .with_stdin(manifest.into_bytes());
            expect_success(conn.run(&apply).await, "certificate apply").in_step("apply-certificate")?;
        }
        observer.step_completed("apply-certificate").await;

        let zone = self
            .config
            .dns
            .zone
            .clone()
            .unwrap_or_else(|| plan.vars.domain.clone());
        let name = record_name(host, &zone);
        reporter.step(&format!("pointing {host} at {}...", plan.public_ip));
        self.dns
            .upsert_a_record(&zone, &name, &plan.public_ip)
            .await
            .with_context(|| format!("upserting {name} in {zone}"))
            .in_step("upsert-dns")?;
        observer.step_completed("upsert-dns").await;
        Ok(())
    }

    /// Recover the application's admin credential into the vault. Failures
    /// are logged; the credential can still be fetched later on demand.
    async fn harvest_credentials<S: RemoteSession>(
        &self,
        plan: &DeployPlan<'_>,
        conn: &PooledConnection<S>,
    ) -> bool {
        if plan.entry.credential_probes.is_empty() {
            return false;
        }
        let target = plan.probe_target();
        match self
            .vault
            .get_decrypted_password(
                scopes::APPS,
                &plan.app_id,
                &plan.entry.credential_probes,
                &target,
                conn,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(app_id = %plan.app_id, error = %format!("{e:#}"), "credential not recovered yet");
                false
            }
        }
    }
}

/// Treat a non-zero exit as an error carrying the command's diagnostic.
fn expect_success(
    result: Result<CommandOutput>,
    what: &str,
) -> Result<()> {
    let out = result?;
    if out.success() {
        Ok(())
    } else {
        anyhow::bail!("{what} failed (exit {}): {}", out.exit_code, out.diagnostic())
    }
}
