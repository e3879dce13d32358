//! Concurrent operations on the same entity run one at a time.

#![allow(clippy::expect_used)]

use keel_cli::domain::error::ApplicationError;
use keel_cli::domain::{DeleteRequest, UpgradeRequest};
use keel_common::AppStatus;

use crate::helpers::{Harness, RecordingReporter, create_request};

/// First and last command index mentioning `fragment`.
fn span(h: &Harness, fragment: &str) -> (usize, usize) {
    let first = h.shell.position(fragment).expect("commands ran");
    let last = h.shell.last_position(fragment).expect("commands ran");
    (first, last)
}

#[tokio::test]
async fn duplicate_create_deploys_once() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    let req = create_request("app-1001", "VPS-7");

    let (a, b) = tokio::join!(
        orchestrator.create(&req, &reporter),
        orchestrator.create(&req, &reporter),
    );
    let (ok, err) = match (a, b) {
        (Ok(app), Err(e)) | (Err(e), Ok(app)) => (app, e),
        (a, b) => panic!("expected exactly one success: {a:?} / {b:?}"),
    };
    assert_eq!(ok.status, AppStatus::Deployed);
    assert!(matches!(
        err.downcast_ref::<ApplicationError>(),
        Some(ApplicationError::AlreadyExists(id)) if id == "app-1001"
    ));
    assert_eq!(h.shell.count("helm install code-server-app-1001"), 1);
}

#[tokio::test]
async fn deployments_to_one_vps_do_not_interleave() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    let first = create_request("app-1", "VPS-7");
    let mut second = create_request("app-2", "VPS-7");
    second.subdomain = "dev2".to_string();

    let (a, b) = tokio::join!(
        orchestrator.create(&first, &reporter),
        orchestrator.create(&second, &reporter),
    );
    a.expect("first deploy");
    b.expect("second deploy");

    let (a_first, a_last) = span(&h, "code-server-app-1");
    let (b_first, b_last) = span(&h, "code-server-app-2");
    assert!(a_last < b_first || b_last < a_first, "pipelines interleaved");
    assert_eq!(h.shell.connects(), 1, "the pooled connection is shared");
}

#[tokio::test]
async fn delete_waits_for_running_upgrade() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");

    let upgrade = UpgradeRequest {
        app_id: "app-1001".to_string(),
        version: "4.20.0".to_string(),
    };
    let delete = DeleteRequest {
        app_id: "app-1001".to_string(),
        remove_namespace: false,
    };
    let (upgraded, deleted) = tokio::join!(
        orchestrator.upgrade(&upgrade, &reporter),
        orchestrator.delete(&delete, &reporter),
    );
    assert_eq!(upgraded.expect("upgrade").version, "4.20.0");
    let outcome = deleted.expect("delete");
    assert_eq!(outcome.status, AppStatus::Removed);
    assert!(outcome.cleanup_failures.is_empty(), "{:?}", outcome.cleanup_failures);

    let upgraded_at = h.shell.position("helm upgrade").expect("upgrade ran");
    let uninstalled_at = h.shell.position("helm uninstall").expect("uninstall ran");
    assert!(upgraded_at < uninstalled_at);
    assert_eq!(h.store.app("app-1001"), None);
}

#[tokio::test]
async fn different_applications_proceed_independently() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    h.seed_vps("VPS-8").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    let first = create_request("app-1", "VPS-7");
    let mut second = create_request("app-2", "VPS-8");
    second.subdomain = "dev2".to_string();

    let (a, b) = tokio::join!(
        orchestrator.create(&first, &reporter),
        orchestrator.create(&second, &reporter),
    );
    assert_eq!(a.expect("first").status, AppStatus::Deployed);
    assert_eq!(b.expect("second").status, AppStatus::Deployed);
    assert_eq!(h.shell.connects(), 2);
}
