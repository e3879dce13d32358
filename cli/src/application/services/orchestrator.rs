//! Application lifecycle orchestration.
//!
//! The orchestrator is the only writer of `Application.status`. Every
//! operation holds the entity's single-flight lock for its whole duration
//! and persists the status after each transition and the stage after each
//! pipeline step.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use keel_common::{
    AppStatus, Application, PowerOp, VpsConfig, qualified_key, scopes, ssh_key_entity,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::ports::{
    Adapters, ComputeProvider, DnsProvider, KvStore, Platform, ProgressReporter, RemoteShell,
    SshTarget, StepObserver, VersionSource,
};
use crate::application::services::connection_pool::{ConnectionPool, SharedConnection};
use crate::application::services::deploy::{
    DeployMode, DeployPlan, Deployer, helm_uninstall, kubectl, record_name, release_workdir,
};
use crate::application::services::locks::EntityLocks;
use crate::application::services::memo_cache::MemoCache;
use crate::application::services::provision::{Provisioner, provider_for, ssh_target};
use crate::application::services::record_store::{FetchMany, list_records};
use crate::application::services::vault::CredentialVault;
use crate::domain::config::KeelConfig;
use crate::domain::credentials::{KUBECONFIG, ProbeTarget};
use crate::domain::error::{ApplicationError, PipelineError};
use crate::domain::lifecycle;
use crate::domain::values::{TemplateVars, app_url, namespace_for, parse_version, release_name};
use crate::domain::{
    Catalog, CatalogEntry, CreateRequest, DeleteRequest, ProvisionRequest, RemoteCommand,
    UpgradeRequest,
};

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// A delete step that failed without stopping the delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub step: &'static str,
    pub message: String,
}

/// Result of an application delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub app_id: String,
    pub status: AppStatus,
    pub cleanup_failures: Vec<CleanupFailure>,
}

/// Result of a VPS teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpsTeardown {
    pub vps_id: String,
    pub cleanup_failures: Vec<CleanupFailure>,
}

/// Handle for an interactive terminal over a pooled connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalSession {
    pub id: String,
    pub vps_id: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub status: String,
}

// ── Status persistence ───────────────────────────────────────────────────────

/// Holds the working copy of one application record and writes it back on
/// every transition and completed step. The guard is never held across an
/// await.
struct StatusRecorder<'s, S> {
    store: &'s S,
    app: Mutex<Application>,
}

impl<'s, S: KvStore> StatusRecorder<'s, S> {
    fn new(store: &'s S, app: Application) -> Self {
        Self {
            store,
            app: Mutex::new(app),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Application> {
        self.app.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Application {
        self.lock().clone()
    }

    fn id(&self) -> String {
        self.lock().id.clone()
    }

    fn edit(&self, f: impl FnOnce(&mut Application)) {
        let mut app = self.lock();
        f(&mut app);
        app.updated_at = Utc::now();
    }

    async fn persist(&self) -> Result<()> {
        let app = self.snapshot();
        self.store
            .put(scopes::APPS, &app.id, &app)
            .await
            .with_context(|| format!("saving application {}", app.id))
    }

    async fn transition(&self, to: AppStatus) -> Result<()> {
        let (id, from) = {
            let app = self.lock();
            (app.id.clone(), app.status)
        };
        lifecycle::transition(&id, from, to)?;
        self.edit(|app| app.status = to);
        info!(app_id = %id, from = %from, to = %to, "status changed");
        self.persist().await
    }

    /// Record `error` and move to `failed`. A persistence failure here is
    /// logged so the original error is the one surfaced.
    async fn fail(&self, error: &anyhow::Error) {
        let message = format!("{error:#}");
        self.edit(|app| app.error_message = Some(message));
        if let Err(e) = self.transition(AppStatus::Failed).await {
            let id = self.id();
            warn!(app_id = %id, error = %format!("{e:#}"), "could not record failure");
        }
    }
}

impl<S: KvStore> StepObserver for StatusRecorder<'_, S> {
    async fn step_completed(&self, step: &str) {
        self.edit(|app| app.stage = Some(step.to_string()));
        let id = self.id();
        debug!(app_id = %id, step, "step completed");
        if let Err(e) = self.persist().await {
            warn!(step, error = %format!("{e:#}"), "could not persist stage");
        }
    }
}

/// Observer for pipelines that run outside an application lifecycle.
pub struct TracingObserver;

impl StepObserver for TracingObserver {
    async fn step_completed(&self, step: &str) {
        debug!(step, "step completed");
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Orchestrator<P: Platform> {
    store: Arc<P::Store>,
    pool: ConnectionPool<P::Connector>,
    vault: CredentialVault<P::Store, P::Cipher>,
    providers: P::Providers,
    dns: P::Dns,
    versions: P::Versions,
    keys: P::Keys,
    charts: P::Charts,
    catalog: Catalog,
    config: KeelConfig,
    locks: EntityLocks,
    latest_versions: MemoCache<String, semver::Version>,
}

impl<P: Platform> Orchestrator<P> {
    #[must_use]
    pub fn new(adapters: Adapters<P>, catalog: Catalog, config: KeelConfig) -> Self {
        let store = Arc::new(adapters.store);
        let pool = ConnectionPool::new(
            adapters.connector,
            config.ssh.command_timeout(),
            config.ssh.probe_timeout(),
        );
        let vault = CredentialVault::new(
            Arc::clone(&store),
            adapters.cipher,
            Duration::from_secs(config.cache.secret_ttl_secs),
        );
        Self {
            store,
            pool,
            vault,
            providers: adapters.providers,
            dns: adapters.dns,
            versions: adapters.versions,
            keys: adapters.keys,
            charts: adapters.charts,
            catalog,
            latest_versions: MemoCache::new(Duration::from_secs(config.cache.version_ttl_secs)),
            config,
            locks: EntityLocks::new(),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool<P::Connector> {
        &self.pool
    }

    fn provisioner(&self) -> Provisioner<'_, P> {
        Provisioner {
            store: &*self.store,
            vault: &self.vault,
            pool: &self.pool,
            providers: &self.providers,
            keys: &self.keys,
            config: &self.config,
        }
    }

    fn deployer(&self) -> Deployer<'_, P> {
        Deployer {
            pool: &self.pool,
            vault: &self.vault,
            dns: &self.dns,
            charts: &self.charts,
            config: &self.config,
        }
    }

    // ── Applications ─────────────────────────────────────────────────────────

    /// Create and deploy an application, provisioning its VPS first when
    /// the request carries a provisioning section and no record exists.
    ///
    /// A `failed` application with the same id is retried in place.
    ///
    /// # Errors
    ///
    /// Returns a validation or lifecycle error before anything runs, or the
    /// pipeline error after the application was marked `failed`.
    pub async fn create(
        &self,
        req: &CreateRequest,
        reporter: &impl ProgressReporter,
    ) -> Result<Application> {
        req.validate()?;
        let entry = self.catalog.get(&req.app_type)?;
        let version = req
            .version
            .clone()
            .unwrap_or_else(|| entry.default_version.clone());
        parse_version(&version)?;

        let _app_guard = self.locks.acquire(&qualified_key(scopes::APPS, &req.app_id)).await;
        let existing: Option<Application> = self
            .store
            .get(scopes::APPS, &req.app_id)
            .await
            .with_context(|| format!("reading application {}", req.app_id))?;
        let retry_of = match existing {
            Some(app) if app.status == AppStatus::Failed => Some(app),
            Some(_) => return Err(ApplicationError::AlreadyExists(req.app_id.clone()).into()),
            None => None,
        };

        let _vps_guard = self.locks.acquire(&qualified_key(scopes::VPS, &req.vps_id)).await;
        let vps: Option<VpsConfig> = self
            .store
            .get(scopes::VPS, &req.vps_id)
            .await
            .with_context(|| format!("reading VPS {}", req.vps_id))?;
        if vps.is_none() && req.provision.is_none() {
            return Err(ApplicationError::VpsNotFound(req.vps_id.clone()).into());
        }

        let now = Utc::now();
        let app = Application {
            id: req.app_id.clone(),
            app_type: req.app_type.clone(),
            status: retry_of.as_ref().map_or(AppStatus::Pending, |app| app.status),
            subdomain: req.subdomain.clone(),
            domain: req.domain.clone(),
            url: String::new(),
            vps_id: req.vps_id.clone(),
            namespace: namespace_for(&req.app_id),
            version,
            release_name: release_name(&req.app_type, &req.app_id),
            created_at: retry_of.as_ref().map_or(now, |app| app.created_at),
            updated_at: now,
            error_message: None,
            stage: None,
        };
        let recorder = StatusRecorder::new(&*self.store, app);
        if retry_of.is_none() {
            recorder.persist().await?;
        } else {
            info!(app_id = %req.app_id, "retrying failed application");
        }
        recorder.transition(AppStatus::Deploying).await?;

        let result = async {
            let vps = match vps {
                Some(vps) => vps,
                None => {
                    let provision = req
                        .provision
                        .as_ref()
                        .ok_or_else(|| ApplicationError::VpsNotFound(req.vps_id.clone()))?;
                    self.provisioner().run(provision, reporter, &recorder).await?
                }
            };
            self.deploy(&recorder, entry, &vps, DeployMode::Install, reporter)
                .await
        }
        .await;

        self.finish(recorder, result).await
    }

    /// Upgrade a deployed (or failed) application to `req.version`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the version is malformed or newer than
    /// the latest upstream release, a lifecycle error for an invalid
    /// transition, or the pipeline error after marking the app `failed`.
    pub async fn upgrade(
        &self,
        req: &UpgradeRequest,
        reporter: &impl ProgressReporter,
    ) -> Result<Application> {
        let version = req.validate()?;
        let _guard = self.locks.acquire(&qualified_key(scopes::APPS, &req.app_id)).await;
        let app = self.load_app(&req.app_id).await?;
        lifecycle::transition(&app.id, app.status, AppStatus::Updating)?;
        let entry = self.catalog.get(&app.app_type)?;
        self.check_version(entry, &version).await?;

        let recorder = StatusRecorder::new(&*self.store, app);
        recorder.edit(|app| app.error_message = None);
        recorder.transition(AppStatus::Updating).await?;

        let result = async {
            let vps_id = recorder.snapshot().vps_id;
            let vps = self.load_vps(&vps_id).await?;
            let previous = recorder.snapshot().version;
            recorder.edit(|app| app.version = version.to_string());
            let deployed = self
                .deploy(&recorder, entry, &vps, DeployMode::Upgrade, reporter)
                .await;
            if deployed.is_err() {
                recorder.edit(|app| app.version = previous);
            }
            deployed
        }
        .await;

        self.finish(recorder, result).await
    }

    /// Tear an application down in reverse order of creation. Every step is
    /// best-effort; failures are collected in the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only when the application does not exist or cannot
    /// enter `deleting`.
    pub async fn delete(
        &self,
        req: &DeleteRequest,
        reporter: &impl ProgressReporter,
    ) -> Result<DeleteOutcome> {
        req.validate()?;
        let _guard = self.locks.acquire(&qualified_key(scopes::APPS, &req.app_id)).await;
        let app = self.load_app(&req.app_id).await?;
        let recorder = StatusRecorder::new(&*self.store, app.clone());
        if app.status == AppStatus::Deleting {
            info!(app_id = %app.id, "resuming interrupted delete");
        } else {
            recorder.transition(AppStatus::Deleting).await?;
        }

        let mut failures = Vec::new();
        let mut note = |step: &'static str, result: Result<()>| {
            if let Err(e) = result {
                let message = format!("{e:#}");
                warn!(app_id = %app.id, step, error = %message, "cleanup step failed");
                failures.push(CleanupFailure { step, message });
            }
        };

        reporter.step(&format!("removing DNS record for {}...", app.host()));
        let zone = self
            .config
            .dns
            .zone
            .clone()
            .unwrap_or_else(|| app.domain.clone());
        note(
            "dns",
            self.dns
                .delete_a_record(&zone, &record_name(&app.host(), &zone))
                .await,
        );

        match self.connect_app_host(&app).await {
            Ok(conn) => {
                reporter.step(&format!("uninstalling {}...", app.release_name));
                let selector = format!("app.kubernetes.io/instance={}", app.release_name);
                note(
                    "ingress",
                    run_checked(
                        &*conn,
                        &kubectl(&app.namespace)
                            .args(["delete", "ingress,service", "-l"])
                            .arg(&selector)
                            .arg("--ignore-not-found"),
                    )
                    .await,
                );
                note(
                    "helm-uninstall",
                    run_checked(&*conn, &helm_uninstall(&app.release_name, &app.namespace)).await,
                );
                if req.remove_namespace {
                    note(
                        "namespace",
                        run_checked(
                            &*conn,
                            &RemoteCommand::new("kubectl")
                                .args(["--kubeconfig", KUBECONFIG, "delete", "namespace"])
                                .arg(&app.namespace)
                                .arg("--ignore-not-found"),
                        )
                        .await,
                    );
                }
                note(
                    "workdir",
                    run_checked(
                        &*conn,
                        &RemoteCommand::new("rm")
                            .arg("-rf")
                            .arg(release_workdir(&self.config, &app.release_name)),
                    )
                    .await,
                );
            }
            Err(e) => note("connect", Err(e)),
        }

        reporter.step("removing records...");
        let removed = async {
            recorder.transition(AppStatus::Removed).await?;
            self.store.delete(scopes::APPS, &app.id).await
        }
        .await;
        note("record", removed);
        note("secret", self.vault.forget(scopes::APPS, &app.id).await);

        Ok(DeleteOutcome {
            app_id: app.id.clone(),
            status: recorder.snapshot().status,
            cleanup_failures: failures,
        })
    }

    /// # Errors
    ///
    /// Returns `ApplicationError::NotFound` for an unknown id.
    pub async fn get(&self, app_id: &str) -> Result<Application> {
        self.load_app(app_id).await
    }

    /// Every application record; unreadable records are counted as missing.
    ///
    /// # Errors
    ///
    /// Returns an error only when the key listing fails.
    pub async fn list(&self) -> Result<FetchMany<Application>> {
        list_records(&*self.store, scopes::APPS, self.config.store.fetch_concurrency).await
    }

    /// The application's admin credential, recovered from the workload when
    /// the vault has none.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::NotFound` when no source yields a credential.
    pub async fn password(&self, app_id: &str) -> Result<String> {
        let app = self.load_app(app_id).await?;
        match self.vault.get_stored_password(scopes::APPS, &app.id).await {
            Ok(Some(secret)) => return Ok(secret),
            Ok(None) => {}
            Err(e) => {
                warn!(app_id = %app.id, error = %format!("{e:#}"), "stored credential unusable");
            }
        }
        let entry = self.catalog.get(&app.app_type)?;
        let conn = self.connect_app_host(&app).await?;
        let target = ProbeTarget {
            namespace: app.namespace.clone(),
            release_name: app.release_name.clone(),
            workload: entry.workload_for(&app.release_name),
        };
        self.vault
            .get_decrypted_password(scopes::APPS, &app.id, &entry.credential_probes, &target, &*conn)
            .await
    }

    // ── VPS ──────────────────────────────────────────────────────────────────

    /// Provision a VPS without deploying anything onto it.
    ///
    /// # Errors
    ///
    /// Returns an error when a record already exists or the pipeline fails.
    pub async fn provision(
        &self,
        req: &ProvisionRequest,
        reporter: &impl ProgressReporter,
    ) -> Result<VpsConfig> {
        let _guard = self.locks.acquire(&qualified_key(scopes::VPS, &req.vps_id)).await;
        let existing: Option<VpsConfig> = self.store.get(scopes::VPS, &req.vps_id).await?;
        if existing.is_some() {
            return Err(PipelineError::validation(format!("VPS '{}' already exists", req.vps_id)).into());
        }
        Ok(self.provisioner().run(req, reporter, &TracingObserver).await?)
    }

    /// # Errors
    ///
    /// Returns an error only when the key listing fails.
    pub async fn list_vps(&self) -> Result<FetchMany<VpsConfig>> {
        list_records(&*self.store, scopes::VPS, self.config.store.fetch_concurrency).await
    }

    /// Delete a VPS: the provider instance first, then the pooled
    /// connection, access key and record.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::VpsInUse` while applications reference it
    /// and `force` is false, or the provider error when the instance could
    /// not be deleted (the record is kept in that case).
    pub async fn delete_vps(&self, vps_id: &str, force: bool) -> Result<VpsTeardown> {
        let _guard = self.locks.acquire(&qualified_key(scopes::VPS, vps_id)).await;
        let vps = self.load_vps(vps_id).await?;

        let apps: Vec<String> = self
            .list()
            .await?
            .records
            .into_iter()
            .filter(|app| app.vps_id == vps.id && app.status != AppStatus::Removed)
            .map(|app| app.id)
            .collect();
        if !apps.is_empty() {
            if !force {
                return Err(ApplicationError::VpsInUse {
                    vps_id: vps.id.clone(),
                    apps,
                }
                .into());
            }
            warn!(vps_id = %vps.id, apps = %apps.join(","), "force-deleting VPS with applications");
        }

        let provider = provider_for(&self.providers, vps.provider)?;
        provider
            .delete_instance(&vps.provider_instance_id)
            .await
            .with_context(|| format!("deleting {} instance for {}", vps.provider, vps.id))?;
        info!(vps_id = %vps.id, "instance deleted");

        let mut failures = Vec::new();
        for (step, result) in [
            ("host-key", self.pool.forget_host(&vps.id).await),
            ("ssh-key", self.vault.forget(scopes::VPS, &ssh_key_entity(&vps.id)).await),
            ("record", self.store.delete(scopes::VPS, &vps.id).await),
        ] {
            if let Err(e) = result {
                let message = format!("{e:#}");
                warn!(vps_id = %vps.id, step, error = %message, "cleanup step failed");
                failures.push(CleanupFailure { step, message });
            }
        }
        Ok(VpsTeardown {
            vps_id: vps.id,
            cleanup_failures: failures,
        })
    }

    /// Start, stop or reboot a VPS and record the resulting power state.
    ///
    /// # Errors
    ///
    /// Returns the provider error; the record is left unchanged.
    pub async fn power_vps(&self, vps_id: &str, op: PowerOp) -> Result<VpsConfig> {
        let _guard = self.locks.acquire(&qualified_key(scopes::VPS, vps_id)).await;
        let mut vps = self.load_vps(vps_id).await?;
        provider_for(&self.providers, vps.provider)?
            .power(&vps.provider_instance_id, op)
            .await
            .with_context(|| format!("{op} {}", vps.id))?;
        if op != PowerOp::Start {
            self.pool.evict(&vps.id).await;
        }
        vps.power_state = op.resulting_state();
        self.store.put(scopes::VPS, &vps.id, &vps).await?;
        info!(vps_id = %vps.id, op = %op, "power operation applied");
        Ok(vps)
    }

    /// Ensure a pooled connection to the VPS and hand out a terminal handle.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectionError` when the host cannot be reached.
    pub async fn open_terminal(&self, vps_id: &str) -> Result<TerminalSession> {
        let vps = self.load_vps(vps_id).await?;
        let target = self.target_for(&vps).await?;
        let conn = self.pool.get_or_create(&target).await?;
        Ok(TerminalSession {
            id: format!("{}-{}", vps.id, Utc::now().timestamp_millis()),
            vps_id: vps.id.clone(),
            host: conn.host().to_string(),
            user: conn.user().to_string(),
            port: target.port,
            status: "connected".to_string(),
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn load_app(&self, app_id: &str) -> Result<Application> {
        self.store
            .get(scopes::APPS, app_id)
            .await
            .with_context(|| format!("reading application {app_id}"))?
            .ok_or_else(|| ApplicationError::NotFound(app_id.to_string()).into())
    }

    async fn load_vps(&self, vps_id: &str) -> Result<VpsConfig> {
        self.store
            .get(scopes::VPS, vps_id)
            .await
            .with_context(|| format!("reading VPS {vps_id}"))?
            .ok_or_else(|| ApplicationError::VpsNotFound(vps_id.to_string()).into())
    }

    async fn target_for(&self, vps: &VpsConfig) -> Result<SshTarget> {
        let key = self
            .vault
            .require_stored_password(scopes::VPS, &ssh_key_entity(&vps.id))
            .await
            .with_context(|| format!("loading access key for {}", vps.id))?;
        Ok(ssh_target(vps, key, self.config.ssh.port))
    }

    async fn connect_app_host(
        &self,
        app: &Application,
    ) -> Result<SharedConnection<P::Connector>> {
        let vps = self.load_vps(&app.vps_id).await?;
        let target = self.target_for(&vps).await?;
        self.pool.get_or_create(&target).await
    }

    /// Reject versions newer than the latest upstream release. When upstream
    /// cannot be reached and nothing is cached the version is accepted.
    async fn check_version(&self, entry: &CatalogEntry, version: &semver::Version) -> Result<()> {
        let Some(project) = &entry.version_source else {
            return Ok(());
        };
        let key = project.clone();
        match self
            .latest_versions
            .get_or_refresh(&key, || self.versions.latest_version(project))
            .await
        {
            Ok(latest) if *version > latest => Err(PipelineError::validation(format!(
                "version {version} is newer than the latest {} release ({latest})",
                entry.name
            ))
            .into()),
            Ok(latest) => {
                debug!(project = %project, %latest, %version, "version accepted");
                Ok(())
            }
            Err(e) => {
                warn!(project = %project, error = %format!("{e:#}"), "latest release unknown, accepting version");
                Ok(())
            }
        }
    }

    async fn deploy(
        &self,
        recorder: &StatusRecorder<'_, P::Store>,
        entry: &CatalogEntry,
        vps: &VpsConfig,
        mode: DeployMode,
        reporter: &impl ProgressReporter,
    ) -> Result<()> {
        let app = recorder.snapshot();
        let target = self.target_for(vps).await?;
        let plan = DeployPlan {
            app_id: app.id.clone(),
            entry,
            vars: TemplateVars {
                domain: app.domain.clone(),
                subdomain: app.subdomain.clone(),
                version: app.version.clone(),
                release_name: app.release_name.clone(),
                namespace: app.namespace.clone(),
            },
            public_ip: vps.public_ip.clone(),
            mode,
        };
        let report = self.deployer().run(&plan, &target, reporter, recorder).await?;
        if !report.credential_recovered && !entry.credential_probes.is_empty() {
            reporter.warn("admin credential not available yet; try 'keel app password' later");
        }
        Ok(())
    }

    /// Settle a pipeline run: `deployed` with the URL on success, `failed`
    /// with the error message otherwise.
    async fn finish(
        &self,
        recorder: StatusRecorder<'_, P::Store>,
        result: Result<()>,
    ) -> Result<Application> {
        match result {
            Ok(()) => {
                recorder.edit(|app| {
                    app.url = app_url(&app.subdomain, &app.domain);
                    app.error_message = None;
                });
                recorder.transition(AppStatus::Deployed).await?;
                Ok(recorder.snapshot())
            }
            Err(e) => {
                recorder.fail(&e).await;
                Err(e)
            }
        }
    }
}

/// Run `command` and treat a non-zero exit as an error.
async fn run_checked(shell: &impl RemoteShell, command: &RemoteCommand) -> Result<()> {
    let out = shell.run(command).await?;
    if out.success() {
        Ok(())
    } else {
        anyhow::bail!("exit {}: {}", out.exit_code, out.diagnostic())
    }
}
