//! Credential vault: encrypted secrets in the remote store, with a live
//! fallback chain against the deployed workload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine as _;
use keel_common::secret_key;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::ports::{KvStore, RemoteShell, SecretCipher};
use crate::domain::credentials::{ProbeSpec, ProbeTarget, canonical_order};
use crate::domain::error::VaultError;

/// Store representation of an encrypted secret.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSecret {
    cipher: String,
    /// Base64 ciphertext.
    ciphertext: String,
}

/// A decrypted secret held in memory until `expires_at`.
struct CachedSecret {
    value: String,
    expires_at: Instant,
}

type CacheKey = (String, String);

pub struct CredentialVault<S, X> {
    store: Arc<S>,
    cipher: X,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, CachedSecret>>,
}

impl<S: KvStore, X: SecretCipher> CredentialVault<S, X> {
    pub fn new(store: Arc<S>, cipher: X, ttl: Duration) -> Self {
        Self {
            store,
            cipher,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Encrypt `secret` and store it as `{entity_id}.secret` in `scope`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::EmptySecret` for an empty secret, or the store /
    /// cipher error.
    pub async fn store_encrypted_password(
        &self,
        scope: &str,
        entity_id: &str,
        secret: &str,
    ) -> Result<()> {
        if secret.is_empty() {
            return Err(VaultError::EmptySecret.into());
        }
        let ciphertext = self
            .cipher
            .encrypt(secret.as_bytes())
            .context("encrypting secret")?;
        let stored = StoredSecret {
            cipher: self.cipher.name().to_string(),
            ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
        };
        self.store
            .put(scope, &secret_key(entity_id), &stored)
            .await
            .with_context(|| format!("storing secret for {scope}:{entity_id}"))?;
        self.remember(scope, entity_id, secret);
        debug!(scope, entity_id, "stored encrypted secret");
        Ok(())
    }

    /// Cached or stored secret, `None` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns the store error, or `VaultError::Crypto` when the stored value
    /// cannot be decrypted with this account's key.
    pub async fn get_stored_password(&self, scope: &str, entity_id: &str) -> Result<Option<String>> {
        if let Some(value) = self.cached(scope, entity_id) {
            return Ok(Some(value));
        }
        let Some(stored) = self
            .store
            .get::<StoredSecret>(scope, &secret_key(entity_id))
            .await
            .with_context(|| format!("reading secret for {scope}:{entity_id}"))?
        else {
            return Ok(None);
        };
        let value = self.open(&stored)?;
        self.remember(scope, entity_id, &value);
        Ok(Some(value))
    }

    /// Like [`Self::get_stored_password`] but a missing secret is an error.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::NotFound` when nothing is stored.
    pub async fn require_stored_password(&self, scope: &str, entity_id: &str) -> Result<String> {
        self.get_stored_password(scope, entity_id)
            .await?
            .ok_or_else(|| {
                VaultError::NotFound {
                    scope: scope.to_string(),
                    entity_id: entity_id.to_string(),
                }
                .into()
            })
    }

    /// Resolve a credential: memory cache, then store, then the live probes
    /// in canonical order. The first probe yielding a non-empty value wins
    /// and is written back to the store (best-effort) and cached.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::NotFound` when every source is exhausted.
    pub async fn get_decrypted_password(
        &self,
        scope: &str,
        entity_id: &str,
        probes: &[ProbeSpec],
        target: &ProbeTarget,
        shell: &impl RemoteShell,
    ) -> Result<String> {
        match self.get_stored_password(scope, entity_id).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!(scope, entity_id, "no stored secret, probing workload"),
            Err(e) => warn!(scope, entity_id, error = %format!("{e:#}"), "stored secret unusable, probing workload"),
        }

        for probe in canonical_order(probes) {
            let label = probe.describe();
            match shell.run(&probe.command(target)).await {
                Ok(out) if out.success() => match probe.extract(&out.stdout) {
                    Some(value) => {
                        info!(scope, entity_id, probe = %label, "credential recovered from workload");
                        if let Err(e) = self.store_encrypted_password(scope, entity_id, &value).await {
                            warn!(scope, entity_id, error = %format!("{e:#}"), "could not write recovered secret back");
                            self.remember(scope, entity_id, &value);
                        }
                        return Ok(value);
                    }
                    None => debug!(scope, entity_id, probe = %label, "probe returned no credential"),
                },
                Ok(out) => debug!(
                    scope,
                    entity_id,
                    probe = %label,
                    exit_code = out.exit_code,
                    stderr = %out.diagnostic(),
                    "probe failed"
                ),
                Err(e) => warn!(scope, entity_id, probe = %label, error = %format!("{e:#}"), "probe errored"),
            }
        }

        Err(VaultError::NotFound {
            scope: scope.to_string(),
            entity_id: entity_id.to_string(),
        }
        .into())
    }

    /// Drop the cached value and delete the stored secret.
    ///
    /// # Errors
    ///
    /// Returns the store error from the delete.
    pub async fn forget(&self, scope: &str, entity_id: &str) -> Result<()> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(scope.to_string(), entity_id.to_string()));
        self.store
            .delete(scope, &secret_key(entity_id))
            .await
            .with_context(|| format!("deleting secret for {scope}:{entity_id}"))
    }

    fn open(&self, stored: &StoredSecret) -> Result<String> {
        if stored.cipher != self.cipher.name() {
            return Err(VaultError::Crypto(format!(
                "secret was sealed with '{}', expected '{}'",
                stored.cipher,
                self.cipher.name()
            ))
            .into());
        }
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(&stored.ciphertext)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let plaintext = self
            .cipher
            .decrypt(&ciphertext)
            .map_err(|e| VaultError::Crypto(format!("{e:#}")))?;
        String::from_utf8(plaintext).map_err(|e| VaultError::Crypto(e.to_string()).into())
    }

    fn cached(&self, scope: &str, entity_id: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (scope.to_string(), entity_id.to_string());
        match cache.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                cache.remove(&key);
                None
            }
            None => None,
        }
    }

    fn remember(&self, scope: &str, entity_id: &str, value: &str) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).insert(
            (scope.to_string(), entity_id.to_string()),
            CachedSecret {
                value: value.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}
