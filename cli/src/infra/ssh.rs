//! OpenSSH transport for the connection pool.
//!
//! Each session is an OpenSSH `ControlMaster` started in the background;
//! commands are multiplexed over its control socket. The private key lives
//! in a 0600 file inside a 0700 runtime directory for the life of the
//! session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::application::ports::{
    CommandOutput, CommandRunner, RemoteSession, SessionConnector, SshTarget,
};
use crate::domain::RemoteCommand;
use crate::domain::error::ConnectionError;
use crate::infra::command_runner::{DEFAULT_CMD_TIMEOUT, TokioCommandRunner};

/// Exit code OpenSSH uses for its own failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;
/// How long an idle master outlives the process that started it.
const CONTROL_PERSIST_SECS: u64 = 600;

/// `~/.keel/ssh`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_runtime_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".keel").join("ssh"))
}

/// Control socket used for `vps_id` inside `dir`.
#[must_use]
pub fn control_socket(dir: &Path, vps_id: &str) -> PathBuf {
    dir.join(format!("{vps_id}.sock"))
}

fn key_path(dir: &Path, vps_id: &str) -> PathBuf {
    dir.join(format!("{vps_id}.key"))
}

/// Host keys are pinned per VPS id, never per address: providers hand
/// released addresses to new instances.
fn known_hosts(dir: &Path, vps_id: &str) -> PathBuf {
    dir.join(format!("{vps_id}.known_hosts"))
}

/// Arguments for an interactive login over the master for `vps_id`.
#[must_use]
pub fn interactive_args(dir: &Path, vps_id: &str, host: &str, user: &str, port: u16) -> Vec<String> {
    vec![
        "-S".to_string(),
        control_socket(dir, vps_id).display().to_string(),
        "-o".to_string(),
        "ControlMaster=no".to_string(),
        "-p".to_string(),
        port.to_string(),
        "-t".to_string(),
        format!("{user}@{host}"),
    ]
}

/// Hand the terminal to an interactive `ssh` over the pooled master and wait
/// for it to exit.
///
/// # Errors
///
/// Returns an error if `ssh` cannot be spawned.
pub async fn attach_terminal(
    dir: &Path,
    vps_id: &str,
    host: &str,
    user: &str,
    port: u16,
) -> Result<std::process::ExitStatus> {
    let args = interactive_args(dir, vps_id, host, user, port);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    debug!(vps_id, host, "attaching interactive terminal");
    TokioCommandRunner::new(DEFAULT_CMD_TIMEOUT)
        .run_interactive("ssh", &args)
        .await
}

/// Opens ControlMaster sessions through a `CommandRunner`.
pub struct OpenSshConnector<R> {
    runner: Arc<R>,
    dir: PathBuf,
    connect_timeout: Duration,
}

impl<R: CommandRunner> OpenSshConnector<R> {
    pub fn new(runner: Arc<R>, dir: PathBuf, connect_timeout: Duration) -> Self {
        Self {
            runner,
            dir,
            connect_timeout,
        }
    }

    fn prepare_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create dir {}", self.dir.display()))?;
        set_permissions(&self.dir, 0o700)
    }
}

impl<R: CommandRunner> SessionConnector for OpenSshConnector<R> {
    type Session = OpenSshSession<R>;

    async fn connect(&self, target: &SshTarget) -> Result<Self::Session> {
        self.prepare_dir()?;
        let key = key_path(&self.dir, &target.vps_id);
        let mut material = target.key_material.trim_end().to_string();
        material.push('\n');
        tokio::fs::write(&key, material)
            .await
            .with_context(|| format!("write {}", key.display()))?;
        set_permissions(&key, 0o600)?;

        let session = OpenSshSession {
            runner: Arc::clone(&self.runner),
            vps_id: target.vps_id.clone(),
            destination: format!("{}@{}", target.user, target.host),
            port: target.port,
            socket: control_socket(&self.dir, &target.vps_id),
            key,
        };

        let connect_secs = self.connect_timeout.as_secs().max(1).to_string();
        let args = session.master_args(&self.dir, &connect_secs);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        // ssh's own ConnectTimeout covers the TCP handshake; the runner
        // timeout also bounds authentication.
        let outcome = self
            .runner
            .run_with_timeout("ssh", &args, self.connect_timeout + Duration::from_secs(5))
            .await;
        match outcome {
            Ok(out) if out.status.success() => {
                debug!(vps_id = %target.vps_id, host = %target.host, "ssh master started");
                Ok(session)
            }
            Ok(out) => {
                session.remove_key();
                Err(ConnectionError::Unreachable {
                    host: target.host.clone(),
                    reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
                }
                .into())
            }
            Err(e) => {
                session.remove_key();
                Err(ConnectionError::Unreachable {
                    host: target.host.clone(),
                    reason: format!("{e:#}"),
                }
                .into())
            }
        }
    }

    async fn forget_host(&self, vps_id: &str) -> Result<()> {
        let pins = known_hosts(&self.dir, vps_id);
        match tokio::fs::remove_file(&pins).await {
            Ok(()) => {
                debug!(vps_id, "host key pin removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", pins.display())),
        }
    }
}

/// One ControlMaster session.
pub struct OpenSshSession<R> {
    runner: Arc<R>,
    vps_id: String,
    destination: String,
    port: u16,
    socket: PathBuf,
    key: PathBuf,
}

impl<R> OpenSshSession<R> {
    fn master_args(&self, dir: &Path, connect_secs: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-M".to_string(),
            "-f".to_string(),
            "-N".to_string(),
            "-i".to_string(),
            self.key.display().to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            format!("ControlPersist={CONTROL_PERSIST_SECS}"),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("UserKnownHostsFile={}", known_hosts(dir, &self.vps_id).display()),
            "-o".to_string(),
            format!("ConnectTimeout={connect_secs}"),
            self.destination.clone(),
        ]);
        args
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.socket.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ]
    }

    fn exec_args(&self, command: &RemoteCommand) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            self.destination.clone(),
            "--".to_string(),
            command.render().to_string(),
        ]);
        args
    }

    fn remove_key(&self) {
        match std::fs::remove_file(&self.key) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(vps_id = %self.vps_id, error = %e, "could not remove session key");
            }
            _ => {}
        }
    }
}

impl<R: CommandRunner> RemoteSession for OpenSshSession<R> {
    async fn exec(&self, command: &RemoteCommand, timeout: Duration) -> Result<CommandOutput> {
        let args = self.exec_args(command);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = match command.stdin() {
            Some(stdin) => self.runner.run_with_stdin("ssh", &args, stdin, timeout).await,
            None => self.runner.run_with_timeout("ssh", &args, timeout).await,
        };
        let out = result.map_err(|e| {
            debug!(vps_id = %self.vps_id, error = %format!("{e:#}"), "ssh exec failed");
            ConnectionError::TimedOut {
                vps_id: self.vps_id.clone(),
                secs: timeout.as_secs(),
            }
        })?;
        let exit_code = out.status.code().unwrap_or(-1);
        if exit_code == SSH_TRANSPORT_FAILURE {
            debug!(
                vps_id = %self.vps_id,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "ssh transport failure"
            );
            return Err(ConnectionError::Closed {
                vps_id: self.vps_id.clone(),
            }
            .into());
        }
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code,
        })
    }

    async fn close(&self) {
        let mut args = self.common_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.destination.clone()]);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if let Err(e) = self.runner.run("ssh", &args).await {
            debug!(vps_id = %self.vps_id, error = %format!("{e:#}"), "ssh master exit failed");
        }
        self.remove_key();
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
