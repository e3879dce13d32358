//! Pooled remote-shell connections keyed by VPS id.
//!
//! Applications on the same VPS share one connection. Each connection runs
//! one command at a time; the per-VPS slot lock makes connect, probe and
//! evict for a VPS mutually exclusive while different VPSes proceed
//! independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::application::ports::{
    CommandOutput, RemoteSession, RemoteShell, SessionConnector, SshTarget,
};
use crate::domain::RemoteCommand;

type Slot<S> = Arc<tokio::sync::Mutex<Option<Arc<PooledConnection<S>>>>>;

/// A pooled connection as handed out by [`ConnectionPool::get_or_create`].
pub type SharedConnection<C> = Arc<PooledConnection<<C as SessionConnector>::Session>>;

/// A live session plus the bookkeeping the pool needs.
pub struct PooledConnection<S> {
    vps_id: String,
    host: String,
    user: String,
    port: u16,
    session: tokio::sync::Mutex<S>,
    last_used: Mutex<Instant>,
    healthy: AtomicBool,
    command_timeout: Duration,
}

impl<S: RemoteSession> PooledConnection<S> {
    fn new(target: &SshTarget, session: S, command_timeout: Duration) -> Self {
        Self {
            vps_id: target.vps_id.clone(),
            host: target.host.clone(),
            user: target.user.clone(),
            port: target.port,
            session: tokio::sync::Mutex::new(session),
            last_used: Mutex::new(Instant::now()),
            healthy: AtomicBool::new(true),
            command_timeout,
        }
    }

    #[must_use]
    pub fn vps_id(&self) -> &str {
        &self.vps_id
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Time since the last command finished.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn matches(&self, target: &SshTarget) -> bool {
        self.host == target.host && self.user == target.user && self.port == target.port
    }

    async fn probe(&self, timeout: Duration) -> bool {
        matches!(
            self.run_with_timeout(&RemoteCommand::raw("true"), timeout).await,
            Ok(out) if out.success()
        )
    }

    async fn close(&self) {
        self.healthy.store(false, Ordering::Release);
        self.session.lock().await.close().await;
    }
}

impl<S: RemoteSession> RemoteShell for PooledConnection<S> {
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        self.run_with_timeout(command, self.command_timeout).await
    }

    async fn run_with_timeout(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let session = self.session.lock().await;
        let result = session.exec(command, timeout).await;
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        if result.is_err() {
            self.healthy.store(false, Ordering::Release);
        }
        result
    }
}

/// Process-wide pool of remote-shell connections.
pub struct ConnectionPool<C: SessionConnector> {
    connector: C,
    slots: Mutex<HashMap<String, Slot<C::Session>>>,
    command_timeout: Duration,
    probe_timeout: Duration,
}

impl<C: SessionConnector> ConnectionPool<C> {
    pub fn new(connector: C, command_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
            command_timeout,
            probe_timeout,
        }
    }

    fn slot(&self, vps_id: &str) -> Slot<C::Session> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(vps_id.to_string())
            .or_default()
            .clone()
    }

    /// Return a healthy connection for `target.vps_id`, connecting if needed.
    ///
    /// A pooled connection is probed before reuse. A failed probe or a
    /// host/user mismatch evicts it and exactly one new connection attempt
    /// is made.
    ///
    /// # Errors
    ///
    /// Returns the connector's error (a `ConnectionError`) when the new
    /// session cannot be opened.
    pub async fn get_or_create(
        &self,
        target: &SshTarget,
    ) -> Result<SharedConnection<C>> {
        let slot = self.slot(&target.vps_id);
        let mut entry = slot.lock().await;

        if let Some(existing) = entry.take() {
            if !existing.matches(target) {
                info!(vps_id = %target.vps_id, host = %target.host, "target changed, replacing pooled connection");
                existing.close().await;
            } else if existing.is_healthy() && existing.probe(self.probe_timeout).await {
                debug!(
                    vps_id = %target.vps_id,
                    idle_ms = u64::try_from(existing.idle_for().as_millis()).unwrap_or(u64::MAX),
                    "reusing pooled connection"
                );
                *entry = Some(Arc::clone(&existing));
                return Ok(existing);
            } else {
                warn!(vps_id = %target.vps_id, "pooled connection failed health check, reconnecting");
                existing.close().await;
            }
        }

        let session = self
            .connector
            .connect(target)
            .await
            .with_context(|| format!("connecting to {} ({})", target.vps_id, target.host))?;
        let connection = Arc::new(PooledConnection::new(target, session, self.command_timeout));
        *entry = Some(Arc::clone(&connection));
        debug!(vps_id = %target.vps_id, "opened pooled connection");
        Ok(connection)
    }

    /// Close and forget the connection for `vps_id`, if any.
    pub async fn evict(&self, vps_id: &str) {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(vps_id);
        let Some(slot) = slot else {
            return;
        };
        let connection = slot.lock().await.take();
        if let Some(connection) = connection {
            debug!(vps_id, "evicting pooled connection");
            connection.close().await;
        }
    }

    /// Evict the connection for `vps_id` and drop its pinned host key.
    /// Used when the instance behind the id is gone or brand new.
    ///
    /// # Errors
    ///
    /// Returns the connector's error when the pin cannot be removed.
    pub async fn forget_host(&self, vps_id: &str) -> Result<()> {
        self.evict(vps_id).await;
        self.connector
            .forget_host(vps_id)
            .await
            .with_context(|| format!("forgetting host key for {vps_id}"))
    }

    /// Close every pooled connection.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for id in ids {
            self.evict(&id).await;
        }
    }
}
