//! Integration tests for file I/O operations.
//!
//! Tests cover:
//! - Request loading
//! - Session report save/load/list
//! - Rollback plan save/load
//! - Snapshot store persistence

mod common;

use chrono::Utc;
use common::{request, Fleet};
use config_deploy::cli::commands::{deploy, rollback, sessions};
use config_deploy::models::rollback::RollbackPlan;
use config_deploy::models::snapshot::{SnapshotRecord, SnapshotSource};
use config_deploy::services::store::{JsonLinesSnapshotStore, SnapshotQuery, SnapshotStore};
use std::fs;
use std::io::Write;
use tempfile::TempDir;

// ========== REQUEST TESTS ==========

#[test]
fn test_load_request_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("request.json");
    fs::write(
        &path,
        r#"{
            "device_ids": ["dev-a", "dev-b"],
            "changes": [
                {"change_id": "c1", "file_path": "/etc/app.conf", "content": "a = 1\n"}
            ]
        }"#,
    )
    .unwrap();

    let req = deploy::load_request(&path).unwrap();
    assert_eq!(req.device_ids, vec!["dev-a", "dev-b"]);
    assert_eq!(req.changes[0].file_path, "/etc/app.conf");
    assert!(!req.dry_run);
    assert!(req.auto_rollback);
}

#[test]
fn test_load_missing_request() {
    let temp_dir = TempDir::new().unwrap();
    let result = deploy::load_request(&temp_dir.path().join("missing.json"));
    assert!(matches!(
        result,
        Err(config_deploy::Error::ResourceNotFound(_))
    ));
}

// ========== SESSION TESTS ==========

#[tokio::test]
async fn test_session_report_round_trip() {
    let fleet = Fleet::new(&["dev-a"]);
    let response = fleet
        .manager()
        .create_batch_deployment(
            request(&["dev-a"], &[("c1", "/etc/app.conf", "x\n")]),
            "tester",
        )
        .await
        .unwrap();

    let temp_dir = TempDir::new().unwrap();
    let path = sessions::save_report_to(temp_dir.path(), &response).unwrap();
    assert!(path.ends_with(format!("{}.json", response.batch_id)));

    let loaded = sessions::load_report(&path).unwrap();
    assert_eq!(loaded.batch_id, response.batch_id);
    assert_eq!(loaded.status, response.status);
    assert_eq!(loaded.applied_changes, response.applied_changes);
    assert_eq!(loaded.history, response.history);
}

#[tokio::test]
async fn test_list_reports_newest_first() {
    let fleet = Fleet::new(&["dev-a"]);
    let manager = fleet.manager();
    let temp_dir = TempDir::new().unwrap();

    let mut ids = Vec::new();
    for content in ["one\n", "two\n"] {
        let response = manager
            .create_batch_deployment(
                request(&["dev-a"], &[("c1", "/etc/app.conf", content)]),
                "tester",
            )
            .await
            .unwrap();
        sessions::save_report_to(temp_dir.path(), &response).unwrap();
        ids.push(response.batch_id);
    }
    fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();
    fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

    let reports = sessions::list_reports(temp_dir.path()).unwrap();
    let listed: Vec<&str> = reports.iter().map(|r| r.batch_id.as_str()).collect();
    assert_eq!(listed, vec![ids[1].as_str(), ids[0].as_str()]);
}

#[test]
fn test_list_reports_missing_dir() {
    let temp_dir = TempDir::new().unwrap();
    let reports = sessions::list_reports(&temp_dir.path().join("sessions")).unwrap();
    assert!(reports.is_empty());
}

// ========== ROLLBACK PLAN TESTS ==========

#[test]
fn test_save_and_load_rollback_plan() {
    let plan = RollbackPlan {
        plan_id: "plan-1".to_string(),
        device_id: "dev-a".to_string(),
        target_time: Utc::now(),
        created_at: Utc::now(),
        steps: vec![],
        warnings: vec!["no changes found after the target time".to_string()],
        can_execute: false,
        estimated_duration_secs: 0,
    };

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("plans").join("plan.json");
    rollback::save_plan(&plan, &path).unwrap();
    assert!(path.exists());

    let loaded = rollback::load_plan(&path).unwrap();
    assert_eq!(loaded.plan_id, plan.plan_id);
    assert_eq!(loaded.target_time, plan.target_time);
    assert_eq!(loaded.warnings, plan.warnings);
    assert!(!loaded.can_execute);
}

#[test]
fn test_load_missing_plan() {
    let result = rollback::load_plan(std::path::Path::new("/nonexistent/plan.json"));
    assert!(result.is_err());
}

// ========== SNAPSHOT STORE TESTS ==========

#[tokio::test]
async fn test_snapshot_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("data").join("snapshots.jsonl");

    let first = SnapshotRecord::new("dev-a", "/etc/app.conf", "v1\n", SnapshotSource::Baseline);
    let second = SnapshotRecord::new("dev-a", "/etc/app.conf", "v2\n", SnapshotSource::Deployment)
        .with_batch("batch-1");
    {
        let store = JsonLinesSnapshotStore::open(&path).unwrap();
        store.append(first.clone()).await.unwrap();
        store.append(second.clone()).await.unwrap();
    }

    let store = JsonLinesSnapshotStore::open(&path).unwrap();
    let records = store.query(&SnapshotQuery::device("dev-a")).await.unwrap();
    assert_eq!(records, vec![first.clone(), second]);
    assert_eq!(
        store
            .get(&first.snapshot_id)
            .await
            .unwrap()
            .map(|r| r.content),
        Some("v1\n".to_string())
    );
}

#[tokio::test]
async fn test_snapshot_store_skips_torn_line() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snapshots.jsonl");
    let record = SnapshotRecord::new("dev-a", "/etc/app.conf", "v1\n", SnapshotSource::Deployment);
    {
        let store = JsonLinesSnapshotStore::open(&path).unwrap();
        store.append(record.clone()).await.unwrap();
    }
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "{{\"snapshot_id\": \"trunc").unwrap();
    drop(file);

    let store = JsonLinesSnapshotStore::open(&path).unwrap();
    let records = store.query(&SnapshotQuery::device("dev-a")).await.unwrap();
    assert_eq!(records, vec![record]);
}
