//! Batch reads over the remote store.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use keel_common::is_secret_key;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::application::ports::KvStore;

/// Default ceiling on in-flight reads.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 5;

/// Outcome of a fetch-many: the records that could be read, plus how many
/// were asked for, so callers can report "found N of M".
#[derive(Debug, Clone, PartialEq)]
pub struct FetchMany<T> {
    pub records: Vec<T>,
    pub requested: usize,
}

impl<T> FetchMany<T> {
    #[must_use]
    pub fn found(&self) -> usize {
        self.records.len()
    }

    /// Keys that were missing or failed to load.
    #[must_use]
    pub fn missing(&self) -> usize {
        self.requested - self.records.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing() == 0
    }
}

/// Read `keys` from `scope` with at most `concurrency` requests in flight.
///
/// Individual failures and missing keys are logged and omitted; the batch
/// itself never fails. Records come back in the order of `keys`.
pub async fn fetch_many<T: DeserializeOwned + Send>(
    store: &impl KvStore,
    scope: &str,
    keys: &[String],
    concurrency: usize,
) -> FetchMany<T> {
    let collected: Mutex<Vec<(usize, T)>> = Mutex::new(Vec::with_capacity(keys.len()));

    stream::iter(keys.iter().enumerate())
        .for_each_concurrent(concurrency.max(1), |(index, key)| {
            let collected = &collected;
            async move {
                match store.get::<T>(scope, key).await {
                    Ok(Some(record)) => collected
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((index, record)),
                    Ok(None) => debug!(scope, key = %key, "record vanished during fetch"),
                    Err(e) => warn!(scope, key = %key, error = %format!("{e:#}"), "failed to read record"),
                }
            }
        })
        .await;

    let mut records = collected.into_inner().unwrap_or_else(PoisonError::into_inner);
    records.sort_by_key(|(index, _)| *index);
    FetchMany {
        records: records.into_iter().map(|(_, record)| record).collect(),
        requested: keys.len(),
    }
}

/// List every non-secret record in `scope`.
///
/// # Errors
///
/// Returns an error only if the key listing itself fails.
pub async fn list_records<T: DeserializeOwned + Send>(
    store: &impl KvStore,
    scope: &str,
    concurrency: usize,
) -> Result<FetchMany<T>> {
    let keys: Vec<String> = store
        .list_keys(scope, "")
        .await
        .with_context(|| format!("listing {scope}"))?
        .into_iter()
        .filter(|key| !is_secret_key(key))
        .collect();
    Ok(fetch_many(store, scope, &keys, concurrency).await)
}
