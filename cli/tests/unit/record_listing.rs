//! Batch reads: listings skip secrets and tolerate unreadable records.

#![allow(clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use chrono::Utc;
use keel_cli::application::ports::KvStore;
use keel_cli::application::services::record_store::{fetch_many, list_records};
use keel_common::{AppStatus, Application, scopes};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::helpers::{Harness, MemoryStore};

fn record(id: &str) -> Application {
    let now = Utc::now();
    Application {
        id: id.to_string(),
        app_type: "uptime-kuma".to_string(),
        status: AppStatus::Deployed,
        subdomain: id.to_string(),
        domain: "example.com".to_string(),
        url: format!("https://{id}.example.com"),
        vps_id: "VPS-7".to_string(),
        namespace: id.to_string(),
        version: "1.23.16".to_string(),
        release_name: format!("uptime-kuma-{id}"),
        created_at: now,
        updated_at: now,
        error_message: None,
        stage: None,
    }
}

async fn seed(store: &MemoryStore, ids: &[&str]) {
    for id in ids {
        store.put(scopes::APPS, id, &record(id)).await.expect("seed");
    }
}

fn ids(records: &[Application]) -> Vec<&str> {
    records.iter().map(|a| a.id.as_str()).collect()
}

#[tokio::test]
async fn list_skips_secret_entries() {
    let h = Harness::new();
    seed(&h.store, &["app-1", "app-2", "app-3"]).await;
    h.vault()
        .store_encrypted_password(scopes::APPS, "app-2", "hunter2")
        .await
        .expect("secret");

    let listed = h.orchestrator().list().await.expect("list");
    assert_eq!(ids(&listed.records), vec!["app-1", "app-2", "app-3"]);
    assert_eq!(listed.requested, 3);
    assert!(listed.is_complete());
}

#[tokio::test]
async fn unreadable_record_is_reported_as_missing() {
    let h = Harness::new();
    seed(&h.store, &["app-1", "app-2", "app-3"]).await;
    h.store.fail_reads(scopes::APPS, "app-2");

    let listed = h.orchestrator().list().await.expect("list still succeeds");
    assert_eq!(ids(&listed.records), vec!["app-1", "app-3"]);
    assert_eq!(listed.found(), 2);
    assert_eq!(listed.missing(), 1);
    assert!(!listed.is_complete());
}

#[tokio::test]
async fn fetch_many_keeps_requested_order() {
    let store = MemoryStore::default();
    seed(&store, &["app-1", "app-3"]).await;
    let keys = ["app-3", "app-404", "app-1"].map(String::from);

    for concurrency in [0, 1, 5] {
        let fetched = fetch_many::<Application>(&store, scopes::APPS, &keys, concurrency).await;
        assert_eq!(ids(&fetched.records), vec!["app-3", "app-1"]);
        assert_eq!(fetched.requested, 3);
    }
}

/// Tracks how many reads are in flight at once. Each read yields before
/// completing so concurrent reads overlap.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl KvStore for CountingStore {
    async fn get<T: DeserializeOwned + Send>(&self, scope: &str, key: &str) -> Result<Option<T>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        let value = self.inner.get(scope, key).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        value
    }

    async fn put<T: Serialize + Sync>(&self, scope: &str, key: &str, value: &T) -> Result<()> {
        self.inner.put(scope, key, value).await
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<()> {
        self.inner.delete(scope, key).await
    }

    async fn list_keys(&self, scope: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_keys(scope, prefix).await
    }
}

#[tokio::test]
async fn fetch_many_never_exceeds_its_concurrency() {
    let keys: Vec<String> = (1..=12).map(|n| format!("app-{n}")).collect();
    for (concurrency, expected_peak) in [(0, 1), (1, 1), (3, 3), (5, 5)] {
        let store = CountingStore::default();
        for key in &keys {
            store.put(scopes::APPS, key, &record(key)).await.expect("seed");
        }

        let fetched = fetch_many::<Application>(&store, scopes::APPS, &keys, concurrency).await;
        assert_eq!(fetched.found(), 12);
        assert_eq!(
            store.peak.load(Ordering::SeqCst),
            expected_peak,
            "concurrency {concurrency}"
        );
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn listing_uses_configured_concurrency() {
    let store = CountingStore::default();
    let ids: Vec<String> = (1..=8).map(|n| format!("app-{n}")).collect();
    for id in &ids {
        store.put(scopes::APPS, id, &record(id)).await.expect("seed");
    }

    let listed = list_records::<Application>(&store, scopes::APPS, 2)
        .await
        .expect("list");
    assert_eq!(listed.found(), 8);
    assert_eq!(store.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_listing_is_complete() {
    let h = Harness::new();
    let listed = h.orchestrator().list().await.expect("list");
    assert!(listed.records.is_empty());
    assert!(listed.is_complete());
}

#[tokio::test]
async fn vps_listing_excludes_access_keys() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    h.seed_vps("VPS-8").await;

    let listed = h.orchestrator().list_vps().await.expect("list");
    let ids: Vec<&str> = listed.records.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["VPS-7", "VPS-8"]);
    assert_eq!(listed.requested, 2);
}
