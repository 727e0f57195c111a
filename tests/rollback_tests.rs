//! Integration tests for time-window rollback.

mod common;

use chrono::{Duration, Utc};
use common::{request, CountingStore, Fleet};
use config_deploy::models::config::Config;
use config_deploy::models::rollback::{RollbackStepAction, StepStatus};
use config_deploy::models::snapshot::{SnapshotRecord, SnapshotSource};
use config_deploy::services::events;
use config_deploy::services::store::{SnapshotQuery, SnapshotStore};
use config_deploy::Error;
use std::sync::Arc;

const FILE1: &str = "/etc/app/file1.conf";
const FILE2: &str = "/etc/app/file2.conf";

async fn seed(
    store: &dyn SnapshotStore,
    path: &str,
    content: &str,
    source: SnapshotSource,
    minutes_ago: i64,
) -> SnapshotRecord {
    let record = SnapshotRecord::new("dev-a", path, content, source)
        .at(Utc::now() - Duration::minutes(minutes_ago));
    store.append(record.clone()).await.unwrap();
    record
}

/// file1: v1 two hours ago, then v2 and v3 within the last hour.
/// file2: first written twenty minutes ago.
async fn seeded_fleet() -> (Fleet, SnapshotRecord) {
    let fleet = Fleet::new(&["dev-a"]);
    let store = fleet.store.as_ref();
    let v1 = seed(store, FILE1, "v1\n", SnapshotSource::Deployment, 120).await;
    seed(store, FILE1, "v2\n", SnapshotSource::Deployment, 30).await;
    seed(store, FILE2, "x\n", SnapshotSource::Deployment, 20).await;
    seed(store, FILE1, "v3\n", SnapshotSource::Deployment, 10).await;
    fleet.put("dev-a", FILE1, "v3\n");
    fleet.put("dev-a", FILE2, "x\n");
    (fleet, v1)
}

// ========== PLANNING ==========

#[tokio::test]
async fn test_target_bounds_are_checked_before_store_access() {
    let fleet = Fleet::new(&["dev-a"]);
    let store = Arc::new(CountingStore::default());
    let timeline = fleet.timeline_with_store(&Config::default(), store.clone());

    let too_old = Utc::now() - Duration::hours(721);
    let err = timeline
        .create_rollback_plan("dev-a", too_old, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let future = Utc::now() + Duration::minutes(5);
    let err = timeline
        .create_rollback_plan("dev-a", future, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(store.reads(), 0);
}

#[tokio::test]
async fn test_unknown_device() {
    let fleet = Fleet::new(&["dev-a"]);
    let err = fleet
        .timeline(&Config::default())
        .create_rollback_plan("dev-zz", Utc::now() - Duration::hours(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound(_)));
}

#[tokio::test]
async fn test_plan_restores_and_deletes() {
    let (fleet, v1) = seeded_fleet().await;
    let plan = fleet
        .timeline(&Config::default())
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap();

    assert!(plan.can_execute);
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.estimated_duration_secs, 6);

    let restore = &plan.steps[0];
    assert_eq!(restore.file_path, FILE1);
    assert_eq!(restore.action, RollbackStepAction::Restore);
    assert_eq!(
        restore.to_snapshot_id.as_deref(),
        Some(v1.snapshot_id.as_str())
    );
    assert_eq!(restore.changes_undone, 2);

    let delete = &plan.steps[1];
    assert_eq!(delete.file_path, FILE2);
    assert_eq!(delete.action, RollbackStepAction::Delete);
    assert!(delete.to_snapshot_id.is_none());
    assert_eq!(plan.warnings.len(), 1);
    assert!(plan.warnings[0].contains(FILE2));
}

#[tokio::test]
async fn test_plan_file_filter() {
    let (fleet, _) = seeded_fleet().await;
    let only = vec![FILE2.to_string()];
    let plan = fleet
        .timeline(&Config::default())
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), Some(&only))
        .await
        .unwrap();

    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].file_path, FILE2);
}

#[tokio::test]
async fn test_plan_over_file_limit_is_rejected() {
    let (fleet, _) = seeded_fleet().await;
    let mut config = Config::default();
    config.rollback.max_files = 1;

    let err = fleet
        .timeline(&config)
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_nothing_to_roll_back() {
    let (fleet, _) = seeded_fleet().await;
    let timeline = fleet.timeline(&Config::default());
    let plan = timeline
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(1), None)
        .await
        .unwrap();

    assert!(plan.steps.is_empty());
    assert!(!plan.can_execute);
    assert!(!plan.warnings.is_empty());

    let err = timeline
        .execute_rollback_plan(&plan, false, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ========== EXECUTION ==========

#[tokio::test]
async fn test_dry_run_checks_without_writing() {
    let (mut fleet, _) = seeded_fleet().await;
    let timeline = fleet.timeline(&Config::default());
    let plan = timeline
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap();

    let result = timeline
        .execute_rollback_plan(&plan, true, true)
        .await
        .unwrap();
    assert!(result.dry_run);
    assert!(result.overall_success);
    assert_eq!(result.successful_steps, 2);
    assert!(result.step_results[0].message.starts_with("would restore"));
    assert!(result.step_results[1].message.starts_with("would delete"));

    assert_eq!(fleet.file("dev-a", FILE1).as_deref(), Some("v3\n"));
    assert_eq!(fleet.file("dev-a", FILE2).as_deref(), Some("x\n"));
    assert_eq!(fleet.topics(), vec![events::ROLLBACK_VALIDATED.to_string()]);
}

#[tokio::test]
async fn test_execute_restores_device() {
    let (mut fleet, _) = seeded_fleet().await;
    let timeline = fleet.timeline(&Config::default());
    let plan = timeline
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap();

    let result = timeline
        .execute_rollback_plan(&plan, false, true)
        .await
        .unwrap();
    assert!(result.overall_success);
    assert_eq!(result.successful_steps, 2);

    assert_eq!(fleet.file("dev-a", FILE1).as_deref(), Some("v1\n"));
    assert_eq!(fleet.file("dev-a", FILE2), None);

    let history = fleet
        .store
        .query(&SnapshotQuery::device("dev-a").files(&[FILE1.to_string()]))
        .await
        .unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.source, SnapshotSource::Rollback);
    assert_eq!(last.content, "v1\n");
    assert_eq!(fleet.topics(), vec![events::ROLLBACK_EXECUTED.to_string()]);
}

#[tokio::test]
async fn test_missing_snapshot_halts_remaining_steps() {
    let (fleet, _) = seeded_fleet().await;
    let timeline = fleet.timeline(&Config::default());
    let mut plan = timeline
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap();
    plan.steps[0].to_snapshot_id = Some("snapshot-gone".to_string());

    let result = timeline
        .execute_rollback_plan(&plan, false, false)
        .await
        .unwrap();
    assert!(!result.overall_success);
    assert_eq!(result.step_results[0].status, StepStatus::Failed);
    assert!(result.step_results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("snapshot-gone"));
    assert_eq!(result.step_results[1].status, StepStatus::Skipped);
    assert_eq!(result.skipped_steps, 1);

    // Nothing was touched.
    assert_eq!(fleet.file("dev-a", FILE1).as_deref(), Some("v3\n"));
    assert_eq!(fleet.file("dev-a", FILE2).as_deref(), Some("x\n"));
}

#[tokio::test]
async fn test_continue_on_error_runs_every_step() {
    let (fleet, _) = seeded_fleet().await;
    let timeline = fleet.timeline(&Config::default());
    let mut plan = timeline
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap();
    plan.steps[0].to_snapshot_id = Some("snapshot-gone".to_string());

    let result = timeline
        .execute_rollback_plan(&plan, false, true)
        .await
        .unwrap();
    assert_eq!(result.failed_steps, 1);
    assert_eq!(result.successful_steps, 1);
    assert_eq!(fleet.file("dev-a", FILE2), None);
}

// ========== CANDIDATES ==========

#[tokio::test]
async fn test_candidates_cluster_recent_changes() {
    let fleet = Fleet::new(&["dev-a"]);
    let store = fleet.store.as_ref();
    seed(store, FILE1, "base\n", SnapshotSource::Baseline, 61).await;
    seed(store, FILE1, "a\n", SnapshotSource::Deployment, 60).await;
    seed(store, FILE2, "b\n", SnapshotSource::Deployment, 57).await;
    seed(store, FILE1, "c\n", SnapshotSource::Deployment, 40).await;
    seed(store, FILE1, "old\n", SnapshotSource::Deployment, 600).await;

    let timeline = fleet.timeline(&Config::default());
    let candidates = timeline.get_rollback_candidates("dev-a", 2).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].event_count, 1);
    assert_eq!(candidates[1].event_count, 2);
    assert_eq!(candidates[1].file_count, 2);
    assert!(candidates[1].rollback_target < candidates[1].started_at);

    assert!(matches!(
        timeline.get_rollback_candidates("dev-a", 0).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_candidates_lookback_is_clamped_to_max_age() {
    let (fleet, _) = seeded_fleet().await;
    let candidates = fleet
        .timeline(&Config::default())
        .get_rollback_candidates("dev-a", i64::MAX / 1000)
        .await
        .unwrap();
    assert!(!candidates.is_empty());
}

#[tokio::test]
async fn test_out_of_range_max_age_has_no_lower_bound() {
    let (fleet, v1) = seeded_fleet().await;
    let mut config = Config::default();
    config.rollback.max_age_hours = 10_000_000_000;
    let timeline = fleet.timeline(&config);

    let plan = timeline
        .create_rollback_plan("dev-a", Utc::now() - Duration::minutes(60), None)
        .await
        .unwrap();
    assert_eq!(
        plan.steps[0].to_snapshot_id.as_deref(),
        Some(v1.snapshot_id.as_str())
    );

    let candidates = timeline
        .get_rollback_candidates("dev-a", i64::MAX / 1000)
        .await
        .unwrap();
    assert!(!candidates.is_empty());
}

#[tokio::test]
async fn test_deploy_then_roll_back_to_candidate() {
    let fleet = Fleet::new(&["dev-a"]);
    fleet.put("dev-a", FILE1, "original\n");

    let response = fleet
        .manager()
        .create_batch_deployment(
            request(
                &["dev-a"],
                &[("c1", FILE1, "changed\n"), ("c2", FILE2, "added\n")],
            ),
            "tester",
        )
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(fleet.file("dev-a", FILE1).as_deref(), Some("changed\n"));

    let timeline = fleet.timeline(&Config::default());
    let candidates = timeline.get_rollback_candidates("dev-a", 1).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].event_count, 2);

    let plan = timeline
        .create_rollback_plan("dev-a", candidates[0].rollback_target, None)
        .await
        .unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[0].action, RollbackStepAction::Restore);
    assert_eq!(plan.steps[1].action, RollbackStepAction::Delete);

    let result = timeline
        .execute_rollback_plan(&plan, false, true)
        .await
        .unwrap();
    assert!(result.overall_success);
    assert_eq!(fleet.file("dev-a", FILE1).as_deref(), Some("original\n"));
    assert_eq!(fleet.file("dev-a", FILE2), None);
}
