//! Application lifecycle through the orchestrator: create, upgrade, delete.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use keel_cli::application::ports::KvStore;
use keel_cli::domain::error::{ApplicationError, PipelineError};
use keel_cli::domain::{DeleteRequest, UpgradeRequest};
use keel_common::{AppStatus, scopes};

use crate::helpers::{HOST_IP, Harness, RecordingReporter, create_request};

fn upgrade(version: &str) -> UpgradeRequest {
    UpgradeRequest {
        app_id: "app-1001".to_string(),
        version: version.to_string(),
    }
}

fn delete() -> DeleteRequest {
    DeleteRequest {
        app_id: "app-1001".to_string(),
        remove_namespace: false,
    }
}

#[tokio::test]
async fn create_upgrade_delete_round_trip() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    h.versions.set_latest("coder/code-server", "4.21.0");
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();

    let app = orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");
    assert_eq!(app.status, AppStatus::Deployed);
    assert_eq!(app.url, "https://dev1.example.com");
    assert_eq!(app.version, "4.19.0");
    assert_eq!(app.release_name, "code-server-app-1001");
    assert_eq!(app.namespace, "app-1001");
    assert_eq!(app.error_message, None);
    assert_eq!(h.store.app("app-1001"), Some(app.clone()));
    assert_eq!(h.dns.record("example.com", "dev1").as_deref(), Some(HOST_IP));
    assert!(h.shell.ran("helm install code-server-app-1001"));
    assert!(h.shell.ran("git clone --depth 1 --branch main https://github.com/coder/code-server"));

    let upgraded = orchestrator
        .upgrade(&upgrade("4.20.0"), &reporter)
        .await
        .expect("upgrade");
    assert_eq!(upgraded.status, AppStatus::Deployed);
    assert_eq!(upgraded.version, "4.20.0");
    assert_eq!(upgraded.created_at, app.created_at);
    assert!(h.shell.ran("helm upgrade --install code-server-app-1001"));

    let outcome = orchestrator.delete(&delete(), &reporter).await.expect("delete");
    assert_eq!(outcome.status, AppStatus::Removed);
    assert!(outcome.cleanup_failures.is_empty(), "{:?}", outcome.cleanup_failures);
    assert_eq!(h.store.app("app-1001"), None);
    assert_eq!(h.dns.record("example.com", "dev1"), None);
    assert!(h.shell.ran("helm uninstall code-server-app-1001"));
    assert!(h.shell.ran("delete ingress,service -l app.kubernetes.io/instance=code-server-app-1001"));
    assert!(h.shell.ran("rm -rf /opt/keel/releases/code-server-app-1001"));
    assert!(!h.shell.ran("delete namespace"));
}

#[tokio::test]
async fn create_records_stage_of_last_step() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let app = h
        .orchestrator()
        .create(&create_request("app-1001", "VPS-7"), &RecordingReporter::default())
        .await
        .expect("create");
    assert_eq!(app.stage.as_deref(), Some("harvest-credentials"));
}

#[tokio::test]
async fn every_operation_persists_its_status_sequence() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();

    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");
    assert_eq!(
        h.store.app_statuses("app-1001"),
        [AppStatus::Pending, AppStatus::Deploying, AppStatus::Deployed]
    );

    h.store.clear_writes();
    orchestrator
        .upgrade(&upgrade("4.20.0"), &reporter)
        .await
        .expect("upgrade");
    assert_eq!(
        h.store.app_statuses("app-1001"),
        [AppStatus::Updating, AppStatus::Deployed]
    );

    h.store.clear_writes();
    orchestrator.delete(&delete(), &reporter).await.expect("delete");
    assert_eq!(
        h.store.app_statuses("app-1001"),
        [AppStatus::Deleting, AppStatus::Removed]
    );
}

#[tokio::test]
async fn failed_operations_persist_failed_last() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    h.shell.fail("helm install", "chart not found");

    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect_err("helm fails");
    assert_eq!(
        h.store.app_statuses("app-1001"),
        [AppStatus::Pending, AppStatus::Deploying, AppStatus::Failed]
    );

    h.store.clear_writes();
    h.shell.fail("helm upgrade", "image pull backoff");
    orchestrator
        .upgrade(&upgrade("4.20.0"), &reporter)
        .await
        .expect_err("helm upgrade fails");
    assert_eq!(
        h.store.app_statuses("app-1001"),
        [AppStatus::Updating, AppStatus::Failed]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operations_run_on_spawned_tasks() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = Arc::new(h.orchestrator());

    let worker = Arc::clone(&orchestrator);
    let created = tokio::spawn(async move {
        let reporter = RecordingReporter::default();
        worker
            .create(&create_request("app-1001", "VPS-7"), &reporter)
            .await
    })
    .await
    .expect("join")
    .expect("create");
    assert_eq!(created.status, AppStatus::Deployed);

    let worker = Arc::clone(&orchestrator);
    let outcome = tokio::spawn(async move {
        worker.delete(&delete(), &RecordingReporter::default()).await
    })
    .await
    .expect("join")
    .expect("delete");
    assert_eq!(outcome.status, AppStatus::Removed);
    assert_eq!(h.store.app("app-1001"), None);
}

#[tokio::test]
async fn create_rejects_existing_application() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("first create");

    let err = orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect_err("duplicate");
    assert!(matches!(
        err.downcast_ref::<ApplicationError>(),
        Some(ApplicationError::AlreadyExists(id)) if id == "app-1001"
    ));
}

#[tokio::test]
async fn create_without_vps_record_or_provisioning_fails_before_writing() {
    let h = Harness::new();
    let err = h
        .orchestrator()
        .create(&create_request("app-1001", "VPS-9"), &RecordingReporter::default())
        .await
        .expect_err("no VPS");
    assert!(matches!(
        err.downcast_ref::<ApplicationError>(),
        Some(ApplicationError::VpsNotFound(id)) if id == "VPS-9"
    ));
    assert!(h.store.keys().is_empty());
    assert!(h.shell.commands().is_empty());
}

#[tokio::test]
async fn create_validates_input_before_anything_runs() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();

    let mut bad_subdomain = create_request("app-1001", "VPS-7");
    bad_subdomain.subdomain = "Dev_1".to_string();
    let mut unknown_type = create_request("app-1001", "VPS-7");
    unknown_type.app_type = "wordpress".to_string();
    let mut bad_version = create_request("app-1001", "VPS-7");
    bad_version.version = Some("latest".to_string());

    for req in [bad_subdomain, unknown_type, bad_version] {
        let err = orchestrator.create(&req, &reporter).await.expect_err("invalid");
        assert!(
            matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Validation(_))),
            "{err:#}"
        );
    }
    assert_eq!(h.store.app("app-1001"), None);
    assert_eq!(h.shell.connects(), 0);
}

#[tokio::test]
async fn unknown_type_error_lists_catalog() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let mut req = create_request("app-1001", "VPS-7");
    req.app_type = "wordpress".to_string();
    let err = h
        .orchestrator()
        .create(&req, &RecordingReporter::default())
        .await
        .expect_err("unknown type");
    let message = err.to_string();
    assert!(message.contains("wordpress"));
    assert!(message.contains("code-server"));
    assert!(message.contains("gitea"));
}

#[tokio::test]
async fn upgrade_beyond_latest_release_is_rejected() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    h.versions.set_latest("coder/code-server", "4.21.0");
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");

    let err = orchestrator
        .upgrade(&upgrade("5.0.0"), &reporter)
        .await
        .expect_err("too new");
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Validation(_))));
    assert!(err.to_string().contains("4.21.0"));

    let app = h.store.app("app-1001").expect("record");
    assert_eq!(app.status, AppStatus::Deployed);
    assert_eq!(app.version, "4.19.0");
    assert!(!h.shell.ran("helm upgrade"));
}

#[tokio::test]
async fn upgrade_accepts_version_when_upstream_is_unknown() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");

    let app = orchestrator
        .upgrade(&upgrade("9.9.9"), &reporter)
        .await
        .expect("accepted");
    assert_eq!(app.version, "9.9.9");
    assert_eq!(h.versions.calls(), 1);
}

#[tokio::test]
async fn latest_release_is_cached_between_upgrades() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    h.versions.set_latest("coder/code-server", "4.21.0");
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");

    orchestrator.upgrade(&upgrade("4.20.0"), &reporter).await.expect("first");
    orchestrator.upgrade(&upgrade("4.21.0"), &reporter).await.expect("second");
    assert_eq!(h.versions.calls(), 1);
}

#[tokio::test]
async fn upgrade_from_invalid_state_is_rejected() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    let mut app = orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");
    app.status = AppStatus::Deleting;
    h.store.put(scopes::APPS, "app-1001", &app).await.expect("seed");

    let err = orchestrator
        .upgrade(&upgrade("4.20.0"), &reporter)
        .await
        .expect_err("deleting");
    assert!(matches!(
        err.downcast_ref::<ApplicationError>(),
        Some(ApplicationError::InvalidTransition {
            from: AppStatus::Deleting,
            to: AppStatus::Updating,
            ..
        })
    ));
}

#[tokio::test]
async fn delete_unknown_application_is_not_found() {
    let h = Harness::new();
    let err = h
        .orchestrator()
        .delete(&delete(), &RecordingReporter::default())
        .await
        .expect_err("missing");
    assert!(matches!(
        err.downcast_ref::<ApplicationError>(),
        Some(ApplicationError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_removes_namespace_on_request() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let reporter = RecordingReporter::default();
    orchestrator
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");

    let req = DeleteRequest {
        app_id: "app-1001".to_string(),
        remove_namespace: true,
    };
    orchestrator.delete(&req, &reporter).await.expect("delete");
    assert!(h.shell.ran("delete namespace app-1001 --ignore-not-found"));
}

#[tokio::test]
async fn delete_is_best_effort_when_host_is_unreachable() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let reporter = RecordingReporter::default();
    h.orchestrator()
        .create(&create_request("app-1001", "VPS-7"), &reporter)
        .await
        .expect("create");
    h.vault()
        .store_encrypted_password(scopes::APPS, "app-1001", "hunter2")
        .await
        .expect("seed secret");

    h.shell.refuse_connections(true);
    let outcome = h
        .orchestrator()
        .delete(&delete(), &reporter)
        .await
        .expect("delete completes");
    assert_eq!(outcome.status, AppStatus::Removed);
    let steps: Vec<&str> = outcome.cleanup_failures.iter().map(|f| f.step).collect();
    assert_eq!(steps, vec!["connect"]);
    assert_eq!(h.store.app("app-1001"), None);
    assert!(!h.store.contains(scopes::APPS, "app-1001.secret"));
    assert_eq!(h.dns.deleted(), vec![("example.com".to_string(), "dev1".to_string())]);
}

#[tokio::test]
async fn get_returns_record_or_not_found() {
    let h = Harness::new();
    h.seed_vps("VPS-7").await;
    let orchestrator = h.orchestrator();
    let created = orchestrator
        .create(&create_request("app-1001", "VPS-7"), &RecordingReporter::default())
        .await
        .expect("create");

    assert_eq!(orchestrator.get("app-1001").await.expect("found"), created);
    let err = orchestrator.get("app-404").await.expect_err("missing");
    assert!(err.to_string().contains("keel app list"));
}
