//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `keel_common`, never from
//! `crate::infra`, `crate::commands`, or `crate::output`.

use std::fmt;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use keel_common::{PowerOp, ProviderKind};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::RemoteCommand;
use crate::domain::config::KeelConfig;

// ── Value Types ───────────────────────────────────────────────────────────────

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, falling back to stdout, for error messages.
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Everything needed to open a remote-shell session to a VPS.
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub vps_id: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    /// OpenSSH private key.
    pub key_material: String,
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("vps_id", &self.vps_id)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("key_material", &"<redacted>")
            .finish()
    }
}

/// Launch parameters for a new compute instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub location: String,
    /// Cloud-init document; seeds the access key.
    pub user_data: String,
}

/// A compute instance as reported by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub provider_instance_id: String,
    pub public_ip: String,
    pub hourly_cost: f64,
    pub monthly_cost: f64,
}

/// A freshly generated SSH key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
///
/// Port futures are `Send` so a pipeline can run on any runtime worker.
pub trait CommandRunner: Send + Sync {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    fn run(&self, program: &str, args: &[&str])
    -> impl Future<Output = Result<Output>> + Send;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    fn run_with_timeout(&self, program: &str, args: &[&str], timeout: Duration)
    -> impl Future<Output = Result<Output>> + Send;
    /// Run a program with stdin piped from `stdin`, bounded by `timeout`.
    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Output>> + Send;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait, no async needed.
pub trait ProgressReporter: Send + Sync {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Configuration Port ────────────────────────────────────────────────────────

/// Abstracts loading and saving `~/.keel/config.yaml`.
pub trait ConfigStore {
    /// Load the config, or defaults when the file does not exist.
    fn load(&self) -> Result<KeelConfig>;
    /// Persist the config with owner-only permissions.
    fn save(&self, config: &KeelConfig) -> Result<()>;
    /// Location of the config file.
    fn path(&self) -> Result<PathBuf>;
}

// ── Remote Store Port ─────────────────────────────────────────────────────────

/// Typed access to the remote key-value store. Keys are addressed as
/// `{scope}:{key}`; values are JSON documents.
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when the key does not exist.
    fn get<T: DeserializeOwned + Send>(
        &self,
        scope: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send;
    fn put<T: Serialize + Sync>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
    ) -> impl Future<Output = Result<()>> + Send;
    /// Delete a key. Deleting a missing key succeeds.
    fn delete(&self, scope: &str, key: &str) -> impl Future<Output = Result<()>> + Send;
    /// Keys in `scope` starting with `prefix`, without the `scope:` part.
    fn list_keys(&self, scope: &str, prefix: &str)
    -> impl Future<Output = Result<Vec<String>>> + Send;
}

// ── Remote Shell Ports ────────────────────────────────────────────────────────

/// One open remote-shell session. Not safe for concurrent commands; the
/// connection pool serializes access.
pub trait RemoteSession: Send + Sync {
    /// Execute `command`, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectionError` when the transport fails. A command that
    /// runs and exits non-zero is *not* an error.
    fn exec(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
    /// Tear the session down. Best-effort.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens remote-shell sessions.
pub trait SessionConnector: Send + Sync {
    type Session: RemoteSession;

    fn connect(&self, target: &SshTarget) -> impl Future<Output = Result<Self::Session>> + Send;
    /// Drop the host key pinned for `vps_id`, so the next connection
    /// accepts whatever key the host presents.
    fn forget_host(&self, vps_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// A handle commands can be executed on.
pub trait RemoteShell: Send + Sync {
    /// Execute with the default command timeout.
    fn run(&self, command: &RemoteCommand) -> impl Future<Output = Result<CommandOutput>> + Send;
    fn run_with_timeout(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

// ── Cloud Provider Ports ──────────────────────────────────────────────────────

/// Compute capability set shared by all provider variants.
pub trait ComputeProvider: Send + Sync {
    fn create_instance(&self, spec: &InstanceSpec)
    -> impl Future<Output = Result<Instance>> + Send;
    /// Delete an instance. Deleting a missing instance succeeds.
    fn delete_instance(&self, provider_instance_id: &str)
    -> impl Future<Output = Result<()>> + Send;
    fn power(&self, provider_instance_id: &str, op: PowerOp)
    -> impl Future<Output = Result<()>> + Send;
}

/// Static mapping from provider tag to implementation.
pub trait ProviderLookup: Send + Sync {
    type Provider: ComputeProvider;

    /// # Errors
    ///
    /// Returns an error when the provider is not configured (e.g. missing token).
    fn provider(&self, kind: ProviderKind) -> Result<&Self::Provider>;
}

/// DNS A-record management.
pub trait DnsProvider: Send + Sync {
    /// Create or update `name.zone → ip`.
    fn upsert_a_record(&self, zone: &str, name: &str, ip: &str)
    -> impl Future<Output = Result<()>> + Send;
    /// Delete `name.zone`. Deleting a missing record succeeds.
    fn delete_a_record(&self, zone: &str, name: &str)
    -> impl Future<Output = Result<()>> + Send;
}

/// Upstream release lookup for version validation.
pub trait VersionSource: Send + Sync {
    /// Latest published release of `project` (`owner/repo`).
    fn latest_version(&self, project: &str)
    -> impl Future<Output = Result<semver::Version>> + Send;
}

// ── Local Ports ───────────────────────────────────────────────────────────────

/// Generates SSH access keys.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, comment: &str) -> impl Future<Output = Result<KeyPair>> + Send;
    /// Derive the public key, which also proves `private_key` is usable.
    fn public_key(&self, private_key: &str)
    -> impl Future<Output = Result<String>> + Send;
}

/// Symmetric encryption of secrets at rest.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
    /// Identifier stored next to the ciphertext.
    fn name(&self) -> &'static str;
}

/// Source of chart archives for locally bundled charts.
pub trait ChartBundle: Send + Sync {
    /// Pack the bundled chart at `path` as a gzip-compressed tarball.
    fn pack(&self, path: &str) -> Result<Vec<u8>>;
}

/// Receives pipeline progress so the orchestrator can persist it.
pub trait StepObserver: Send + Sync {
    fn step_completed(&self, step: &str) -> impl Future<Output = ()> + Send;
}

// ── Platform ──────────────────────────────────────────────────────────────────

/// The full set of adapters the orchestrator runs against. Production wires
/// HTTP/SSH/cloud adapters; tests wire in-memory fakes.
pub trait Platform {
    type Store: KvStore;
    type Connector: SessionConnector;
    type Providers: ProviderLookup;
    type Dns: DnsProvider;
    type Versions: VersionSource;
    type Keys: KeyGenerator;
    type Cipher: SecretCipher;
    type Charts: ChartBundle;
}

/// Concrete adapter instances for a [`Platform`].
pub struct Adapters<P: Platform> {
    pub store: P::Store,
    pub connector: P::Connector,
    pub providers: P::Providers,
    pub dns: P::Dns,
    pub versions: P::Versions,
    pub keys: P::Keys,
    pub cipher: P::Cipher,
    pub charts: P::Charts,
}
