use super::*;
use std::path::Path;
use std::time::Duration;

use attendance_core::DayStatus;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::SyncConfig;
use crate::sync::engine::SkipReason;
use crate::sync::error::SyncError;

fn config_for(server_uri: &str, db_path: &Path, user: Option<&str>) -> DaemonConfig {
    DaemonConfig {
        api_url: Some(server_uri.to_string()),
        token: Some("test-token".into()),
        user_id: user.map(str::to_string),
        user_email: None,
        db_path: db_path.to_path_buf(),
        probe_interval: Duration::from_secs(30),
        sync: SyncConfig {
            retry_base_delay: Duration::from_millis(1),
            ..SyncConfig::default()
        },
    }
}

async fn mount_alice_tracker(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/alice/trackers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{
                "id": "t1",
                "ownerId": "alice",
                "name": "Office",
                "color": "#4285F4",
                "isDefault": true,
                "trackerType": "attendance"
            }]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/alice/trackers/t1/entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "documents": [] })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn bootstrap_creates_database_and_reports_status() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("data").join("local.db");

    let daemon = DaemonRuntime::bootstrap(config_for(&server.uri(), &db_path, Some("alice")))
        .await
        .unwrap();
    let status = daemon.status().await.unwrap();

    assert!(db_path.exists());
    assert!(!status.is_online);
    assert_eq!(status.pending_syncs, 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_once_pushes_recorded_days() {
    let server = MockServer::start().await;
    mount_alice_tracker(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/users/alice/trackers/t1/entries:batchWrite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "written": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let daemon = DaemonRuntime::bootstrap(config_for(
        &server.uri(),
        &dir.path().join("local.db"),
        Some("alice"),
    ))
    .await
    .unwrap();

    assert!(daemon.probe_once().await);
    let view = daemon.orchestrator().view_own_tracker().await.unwrap();
    assert_eq!(view.tracker_id, "t1");
    daemon.orchestrator().connectivity().set_online(false);

    daemon
        .orchestrator()
        .record_day("2025-02-03", DayStatus::Wfh, false)
        .await
        .unwrap();
    assert_eq!(daemon.status().await.unwrap().pending_syncs, 1);

    let outcome = daemon.sync_once().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));
    let status = daemon.status().await.unwrap();
    assert_eq!(status.pending_syncs, 0);
    assert!(status.last_sync_time.is_some());
}

#[tokio::test]
async fn last_sync_time_survives_restart() {
    let server = MockServer::start().await;
    mount_alice_tracker(&server).await;

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("local.db");
    let first = DaemonRuntime::bootstrap(config_for(&server.uri(), &db_path, Some("alice")))
        .await
        .unwrap();
    first.sync_once().await.unwrap();
    let synced_at = first.status().await.unwrap().last_sync_time;
    first.orchestrator().dispose().await;

    let second = DaemonRuntime::bootstrap(config_for(&server.uri(), &db_path, Some("alice")))
        .await
        .unwrap();
    assert!(synced_at.is_some());
    assert_eq!(second.status().await.unwrap().last_sync_time, synced_at);
}

#[tokio::test]
async fn sync_once_without_user_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let daemon = DaemonRuntime::bootstrap(config_for(
        &server.uri(),
        &dir.path().join("local.db"),
        None,
    ))
    .await
    .unwrap();

    let err = daemon.sync_once().await.unwrap_err();
    assert!(format!("{err:#}").contains("no authenticated user"));
}

#[tokio::test]
async fn unreachable_cloud_skips_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let daemon = DaemonRuntime::bootstrap(config_for(
        &server.uri(),
        &dir.path().join("local.db"),
        Some("alice"),
    ))
    .await
    .unwrap();

    let outcome = daemon.sync_once().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::Offline));
}

#[tokio::test]
async fn share_manager_works_against_the_daemon_store_offline() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let daemon = DaemonRuntime::bootstrap(config_for(
        &server.uri(),
        &dir.path().join("local.db"),
        Some("alice"),
    ))
    .await
    .unwrap();

    let sharing = daemon.share_manager();
    assert!(sharing.list_shared_with_me().await.unwrap().is_empty());
    assert!(matches!(
        sharing
            .share("bob@example.com", attendance_core::Permission::Read, None)
            .await,
        Err(SyncError::NetworkUnavailable)
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}
