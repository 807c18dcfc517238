//! Coordinator integration tests: jobs created and removed by sweeps, then picked up
//! by the runner.

mod common;

use chrono::{TimeZone, Utc};

use common::*;
use ism_core::models::{ClusterChangedEvent, DeletedIndex, IndexMetadata};
use ism_core::orchestration::{RunOutcome, SkipReason};
use ism_core::storage::BulkItemStatus;
use ism_core::StepStatus;

#[tokio::test]
async fn test_sweep_creates_jobs_the_runner_initializes() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-a", "ua");
    env.add_index("logs-b", "ub");
    env.add_index("metrics-a", "um");
    env.add_index(".logs-internal", "uh");

    env.coordinator.sweep().await.unwrap();

    assert_eq!(env.store.managed_index_uuids(), vec!["ua", "ub"]);
    let job = env.job("ua").value;
    assert_eq!(job.policy_id, "hot-warm-delete");
    assert!(job.enabled);
    assert!(job.policy.is_none());

    for uuid in ["ua", "ub"] {
        assert_eq!(
            env.tick(uuid).await,
            RunOutcome::Initialized {
                policy_id: "hot-warm-delete".to_string()
            }
        );
    }
    assert_eq!(env.store.metadata_uuids(), vec!["ua", "ub"]);
}

#[tokio::test]
async fn test_deleted_index_event_removes_job_and_metadata() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-a", "ua");
    env.add_index("logs-b", "ub");
    env.coordinator.start().await.unwrap();
    env.coordinator.sweep().await.unwrap();
    env.tick("ua").await;
    env.tick("ub").await;

    env.cluster.remove_index("logs-a");
    let event = ClusterChangedEvent {
        local_node_leader: true,
        metadata_changed: true,
        indices_deleted: vec![DeletedIndex {
            name: "logs-a".to_string(),
            uuid: "ua".to_string(),
        }],
        ..ClusterChangedEvent::default()
    };
    env.coordinator
        .cluster_changed(&event)
        .expect("a leader reconciles metadata changes")
        .await
        .unwrap();

    assert_eq!(env.store.managed_index_uuids(), vec!["ub"]);
    assert_eq!(env.store.metadata_uuids(), vec!["ub"]);
    assert_eq!(
        env.tick("ua").await,
        RunOutcome::Skipped(SkipReason::ConfigMissing)
    );
    env.coordinator.stop();
}

#[tokio::test]
async fn test_created_index_event_picks_highest_priority_template() {
    let env = TestEnv::new();
    env.store.insert_policy(
        PolicyBuilder::new("generic")
            .state("only", vec![], vec![])
            .template(&["*"], 0)
            .build(),
    );
    env.store.insert_policy(
        PolicyBuilder::new("audit")
            .state("only", vec![], vec![])
            .template(&["audit-*"], 5)
            .build(),
    );
    env.add_index("audit-2024", "u1");
    env.add_index("app-2024", "u2");

    let event = ClusterChangedEvent {
        local_node_leader: true,
        metadata_changed: true,
        indices_created: vec!["audit-2024".to_string(), "app-2024".to_string()],
        ..ClusterChangedEvent::default()
    };
    env.coordinator
        .sweep_cluster_changed_event(&event)
        .await
        .unwrap();

    assert_eq!(env.job("u1").value.policy_id, "audit");
    assert_eq!(env.job("u2").value.policy_id, "generic");
}

#[tokio::test]
async fn test_template_does_not_adopt_older_indices() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.cluster.add_index(IndexMetadata::new(
        "logs-legacy",
        "ul",
        Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
    ));
    env.add_index("logs-fresh", "uf");

    env.coordinator.sweep().await.unwrap();

    assert_eq!(env.store.managed_index_uuids(), vec!["uf"]);
}

#[tokio::test]
async fn test_sweep_retries_throttled_creates() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    for (name, uuid) in [("logs-a", "ua"), ("logs-b", "ub"), ("logs-c", "uc")] {
        env.add_index(name, uuid);
    }
    env.store.inject_bulk_failure(
        "ub",
        BulkItemStatus::RetryableFailure {
            reason: "es_rejected_execution_exception".to_string(),
        },
        1,
    );

    env.coordinator.sweep().await.unwrap();

    assert_eq!(env.store.managed_index_uuids(), vec!["ua", "ub", "uc"]);
    let calls = env.store.bulk_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], vec!["ub"]);
}

#[tokio::test]
async fn test_reenabled_jobs_resume_where_they_stopped() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-a", "ua");
    env.coordinator.sweep().await.unwrap();
    env.tick("ua").await;

    env.settings.update_with(|s| s.enabled = false).unwrap();
    assert_eq!(
        env.tick("ua").await,
        RunOutcome::JobDisabled(SkipReason::ManagementDisabled)
    );

    env.settings.update_with(|s| s.enabled = true).unwrap();
    assert_eq!(env.coordinator.reenable_jobs().await.unwrap(), 1);
    assert!(env.job("ua").value.enabled);

    assert_eq!(
        env.tick("ua").await,
        RunOutcome::Executed {
            step: "set_read_only".to_string(),
            status: StepStatus::Completed,
        }
    );
}
