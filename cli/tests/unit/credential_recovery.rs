//! Credential vault: stored secrets first, then live probes in canonical order.

#![allow(clippy::expect_used)]

use base64::Engine as _;
use keel_cli::application::ports::KvStore;
use keel_cli::domain::error::{ApplicationError, VaultError};
use keel_common::scopes;

use crate::helpers::{Harness, RecordingReporter, create_request};

const CONFIG_FILE: &str = "-- cat /home/coder/.config/code-server/config.yaml";

/// A deployed code-server whose workload exposes no credential yet.
async fn deployed() -> Harness {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    h.orchestrator()
        .create(&create_request("app-1001", "VPS-7"), &RecordingReporter::default())
        .await
        .expect("create");
    h
}

#[tokio::test]
async fn deploy_harvests_credential_into_vault() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let encoded = base64::engine::general_purpose::STANDARD.encode("s3cret");
    h.shell.reply("get secret code-server-app-1001", &encoded);
    let reporter = RecordingReporter::default();

    h.orchestrator()
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");
    assert!(reporter.warnings().is_empty(), "{:?}", reporter.warnings());
    assert!(!h.shell.ran(CONFIG_FILE), "later probes must not run");
    let stored = h
        .vault()
        .get_stored_password(scopes::APPS, "app-1001")
        .await
        .expect("read");
    assert_eq!(stored.as_deref(), Some("s3cret"));
}

#[tokio::test]
async fn missing_credential_is_a_warning_not_a_failure() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let reporter = RecordingReporter::default();
    h.orchestrator()
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");
    let warnings = reporter.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("keel app password"));
}

#[tokio::test]
async fn stored_secret_is_served_without_probing() {
    let h = deployed().await;
    h.vault()
        .store_encrypted_password(scopes::APPS, "app-1001", "hunter2")
        .await
        .expect("seed");
    let before = h.shell.commands().len();

    let password = h.orchestrator().password("app-1001").await.expect("password");
    assert_eq!(password, "hunter2");
    assert_eq!(h.shell.commands().len(), before);
    assert_eq!(h.shell.connects(), 1, "no new connection for a stored secret");
}

#[tokio::test]
async fn config_file_wins_over_environment() {
    let h = deployed().await;
    h.shell.fail("get secret", "secrets \"code-server-app-1001\" not found");
    h.shell.reply(CONFIG_FILE, "bind-addr: 127.0.0.1:8080\nauth: password\npassword: from-file\n");
    h.shell.reply("-- env", "HOME=/home/coder\nPASSWORD=from-env\n");

    let password = h.orchestrator().password("app-1001").await.expect("password");
    assert_eq!(password, "from-file");
    let stored = h
        .vault()
        .get_stored_password(scopes::APPS, "app-1001")
        .await
        .expect("read");
    assert_eq!(stored.as_deref(), Some("from-file"));
}

#[tokio::test]
async fn logs_are_the_last_resort() {
    let h = deployed().await;
    h.shell.fail("get secret", "forbidden");
    h.shell.fail(CONFIG_FILE, "No such file or directory");
    h.shell.reply("-- env", "HOME=/home/coder\n");
    h.shell.reply(
        "logs deploy/code-server-app-1001",
        "[info] HTTP server listening on http://0.0.0.0:8080\n[info] Password: l0gged\n",
    );

    let password = h.orchestrator().password("app-1001").await.expect("password");
    assert_eq!(password, "l0gged");
}

#[tokio::test]
async fn recovered_secret_is_cached_for_later_calls() {
    let h = deployed().await;
    h.shell.reply("-- env", "PASSWORD=from-env\n");
    let orchestrator = h.orchestrator();

    assert_eq!(orchestrator.password("app-1001").await.expect("first"), "from-env");
    let probes = h.shell.count("-- env");
    assert_eq!(orchestrator.password("app-1001").await.expect("second"), "from-env");
    assert_eq!(h.shell.count("-- env"), probes);
}

#[tokio::test]
async fn undecryptable_secret_falls_back_to_probes() {
    let h = deployed().await;
    h.store
        .put(
            scopes::APPS,
            "app-1001.secret",
            &serde_json::json!({ "cipher": "age", "ciphertext": "AAAA" }),
        )
        .await
        .expect("seed");
    h.shell.reply("-- env", "PASSWORD=from-env\n");

    let password = h.orchestrator().password("app-1001").await.expect("password");
    assert_eq!(password, "from-env");
    let sealed = h.store.raw(scopes::APPS, "app-1001.secret").expect("rewritten");
    assert_eq!(sealed["cipher"], "reverse");
}

#[tokio::test]
async fn exhausted_probes_report_not_found() {
    let h = deployed().await;
    let err = h.orchestrator().password("app-1001").await.expect_err("nothing found");
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::NotFound { entity_id, .. }) if entity_id == "app-1001"
    ));
}

#[tokio::test]
async fn password_for_unknown_application_is_not_found() {
    let h = Harness::new();
    let err = h.orchestrator().password("app-404").await.expect_err("missing");
    assert!(matches!(
        err.downcast_ref::<ApplicationError>(),
        Some(ApplicationError::NotFound(_))
    ));
}
