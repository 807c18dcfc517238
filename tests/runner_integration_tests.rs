//! Runner integration tests: whole policies driven tick by tick against the
//! in-memory config index and simulated cluster.

mod common;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::*;
use ism_core::constants::messages;
use ism_core::error::StorageResult;
use ism_core::models::{
    ActionType, ChangePolicy, DocVersion, IndexStats, IsmTemplate, ManagedIndexConfig,
    ManagedIndexMetaData, Policy, Versioned,
};
use ism_core::orchestration::{RunOutcome, SkipReason};
use ism_core::storage::{
    BulkResponse, ConfigIndexClient, DocWriteRequest, InMemoryConfigIndex, SnapshotState,
    UpdateOutcome,
};
use ism_core::{IsmSettings, StepStatus};

fn executed(step: &str, status: StepStatus) -> RunOutcome {
    RunOutcome::Executed {
        step: step.to_string(),
        status,
    }
}

#[tokio::test]
async fn test_hot_warm_delete_lifecycle() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::Initialized {
            policy_id: "hot-warm-delete".to_string()
        }
    );
    assert_eq!(env.current_state("u1").as_deref(), Some("hot"));
    assert!(env.job("u1").value.policy.is_some());

    assert_eq!(env.tick("u1").await, executed("set_read_only", StepStatus::Completed));
    assert!(env.cluster.index("logs-1").unwrap().read_only);

    // Not enough documents yet
    assert_eq!(
        env.tick("u1").await,
        executed("attempt_transition", StepStatus::ConditionNotMet)
    );
    assert_eq!(env.current_state("u1").as_deref(), Some("hot"));

    env.cluster.set_stats(
        "logs-1",
        IndexStats {
            doc_count: 150,
            size_bytes: 4096,
        },
    );
    assert_eq!(
        env.tick("u1").await,
        executed("attempt_transition", StepStatus::Completed)
    );
    assert_eq!(env.metadata("u1").transition_to.as_deref(), Some("warm"));

    assert_eq!(
        env.tick("u1").await,
        executed("attempt_set_replica_count", StepStatus::Completed)
    );
    assert_eq!(env.current_state("u1").as_deref(), Some("warm"));
    assert_eq!(env.cluster.index("logs-1").unwrap().number_of_replicas, 0);

    assert_eq!(
        env.tick("u1").await,
        executed("attempt_transition", StepStatus::Completed)
    );
    assert_eq!(env.metadata("u1").transition_to.as_deref(), Some("delete"));

    assert_eq!(env.tick("u1").await, executed("attempt_delete", StepStatus::Completed));
    assert!(env.cluster.index("logs-1").is_none());

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::Skipped(SkipReason::IndexMissing)
    );
}

#[tokio::test]
async fn test_each_tick_records_the_executed_step() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");

    env.tick("u1").await;
    env.tick("u1").await;

    let metadata = env.metadata("u1");
    let step = metadata.step_meta_data.expect("step metadata");
    assert_eq!(step.name, "set_read_only");
    assert_eq!(step.step_status, StepStatus::Completed);
    let action = metadata.action_meta_data.expect("action metadata");
    assert_eq!(action.name, "read_only");
    assert_eq!(action.index, 0);
    assert!(!action.failed);
}

#[tokio::test]
async fn test_disallowed_action_fails_then_disables_job() {
    let env = TestEnv::with_settings(IsmSettings {
        allow_list: vec![ActionType::Delete, ActionType::ReplicaCount],
        ..test_settings()
    });
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");

    env.tick("u1").await;
    assert_eq!(
        env.tick("u1").await,
        RunOutcome::Failed {
            message: messages::action_not_allowed("read_only")
        }
    );

    let metadata = env.metadata("u1");
    assert!(metadata.is_failed());
    assert_eq!(
        metadata.info_message(),
        Some("Attempted to execute action=read_only which is not allowed.")
    );
    assert!(!env.cluster.index("logs-1").unwrap().read_only);

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::JobDisabled(SkipReason::PolicyFinished)
    );
    assert!(!env.job("u1").value.enabled);
    assert_eq!(env.tick("u1").await, RunOutcome::Skipped(SkipReason::JobDisabled));
}

#[tokio::test]
async fn test_interrupted_idempotent_step_is_rerun() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");

    env.tick("u1").await;
    assert_eq!(env.tick("u1").await, executed("set_read_only", StepStatus::Completed));

    // Crash between applying the setting and recording the outcome
    let mut crashed = env.metadata("u1");
    if let Some(step) = crashed.step_meta_data.as_mut() {
        step.step_status = StepStatus::Starting;
    }
    env.store.insert_metadata(crashed);

    assert_eq!(env.tick("u1").await, executed("set_read_only", StepStatus::Completed));
    let metadata = env.metadata("u1");
    assert!(!metadata.is_failed());
    assert_eq!(metadata.step_status(), Some(StepStatus::Completed));
    assert!(env.cluster.index("logs-1").unwrap().read_only);

    assert_eq!(
        env.tick("u1").await,
        executed("attempt_transition", StepStatus::ConditionNotMet)
    );
    assert_eq!(env.current_state("u1").as_deref(), Some("hot"));
}

#[tokio::test]
async fn test_interrupted_snapshot_fails_and_resumes_after_retry() {
    let env = TestEnv::new();
    env.install_policy("nightly_backup");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "nightly-backup");

    env.tick("u1").await;
    assert_eq!(env.tick("u1").await, executed("attempt_snapshot", StepStatus::Completed));

    // The node died after starting the snapshot but before recording the outcome
    let mut crashed = env.metadata("u1");
    if let Some(step) = crashed.step_meta_data.as_mut() {
        step.step_status = StepStatus::Starting;
    }
    env.store.insert_metadata(crashed);

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::Failed {
            message: messages::PREVIOUS_ACTION_UNKNOWN.to_string()
        }
    );
    assert_eq!(
        env.tick("u1").await,
        RunOutcome::JobDisabled(SkipReason::PolicyFinished)
    );

    for name in env.cluster.snapshot_names("backups") {
        env.cluster
            .set_snapshot_state("backups", &name, SnapshotState::Success);
    }

    let response = env
        .admin
        .retry_failed(&["logs-1".to_string()], None)
        .await
        .unwrap();
    assert_eq!(response.updated_indices, 1);
    assert!(!response.has_failures());
    assert!(env.job("u1").value.enabled);
    assert_eq!(env.metadata("u1").info_message(), Some(messages::PENDING_RETRY));
    assert_eq!(env.metadata("u1").step_status(), Some(StepStatus::Failed));

    assert_eq!(env.tick("u1").await, executed("attempt_snapshot", StepStatus::Completed));
    assert!(env.metadata("u1").info_message().is_some());

    assert_eq!(
        env.tick("u1").await,
        executed("wait_for_snapshot", StepStatus::ConditionNotMet)
    );
    for name in env.cluster.snapshot_names("backups") {
        env.cluster
            .set_snapshot_state("backups", &name, SnapshotState::Success);
    }
    assert_eq!(
        env.tick("u1").await,
        executed("wait_for_snapshot", StepStatus::Completed)
    );

    assert_eq!(
        env.tick("u1").await,
        executed("attempt_transition", StepStatus::Completed)
    );
    assert!(env.metadata("u1").is_policy_completed());
    assert_eq!(
        env.tick("u1").await,
        RunOutcome::JobDisabled(SkipReason::PolicyFinished)
    );
}

#[tokio::test]
async fn test_change_policy_waits_for_state_boundary() {
    let env = TestEnv::new();
    env.install_policy("merge_then_done");
    env.install_policy("archive");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "merge-then-done");
    env.cluster.set_segment_count("logs-1", 8);

    env.tick("u1").await;
    assert_eq!(
        env.tick("u1").await,
        executed("attempt_set_read_only", StepStatus::Completed)
    );

    let change = ChangePolicy {
        policy_id: "archive".to_string(),
        state: None,
    };
    let response = env
        .admin
        .change_policy(&["logs-1".to_string()], &change)
        .await
        .unwrap();
    assert_eq!(response.updated_indices, 1);
    assert_eq!(env.job("u1").value.change_policy, Some(change));

    // The force merge in flight runs to completion under the old policy
    assert_eq!(
        env.tick("u1").await,
        executed("attempt_call_force_merge", StepStatus::Completed)
    );
    assert_eq!(
        env.tick("u1").await,
        executed("wait_for_force_merge", StepStatus::Completed)
    );
    assert_eq!(env.cluster.index("logs-1").unwrap().segment_count, 1);
    assert_eq!(env.metadata("u1").policy_id, "merge-then-done");

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::PolicyChanged {
            policy_id: "archive".to_string()
        }
    );
    let job = env.job("u1").value;
    assert_eq!(job.policy_id, "archive");
    assert!(job.change_policy.is_none());
    assert_eq!(env.metadata("u1").policy_id, "archive");
    assert_eq!(env.metadata("u1").transition_to.as_deref(), Some("cold"));

    assert_eq!(env.tick("u1").await, executed("set_read_only", StepStatus::Completed));
    assert_eq!(env.current_state("u1").as_deref(), Some("cold"));
}

#[tokio::test]
async fn test_change_policy_to_explicit_state() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.install_policy("archive");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");
    env.tick("u1").await;

    let change = ChangePolicy {
        policy_id: "archive".to_string(),
        state: Some("frozen".to_string()),
    };
    env.admin
        .change_policy(&["logs-1".to_string()], &change)
        .await
        .unwrap();

    // No action has started yet, so the change applies right away
    assert_eq!(
        env.tick("u1").await,
        RunOutcome::PolicyChanged {
            policy_id: "archive".to_string()
        }
    );
    assert_eq!(
        env.tick("u1").await,
        executed("attempt_transition", StepStatus::Completed)
    );
    assert_eq!(env.current_state("u1").as_deref(), Some("frozen"));
    assert!(env.metadata("u1").is_policy_completed());
}

#[tokio::test]
async fn test_policy_version_conflict_fails_index() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");
    env.tick("u1").await;

    let mut job = env.job("u1").value;
    job.policy_seq_no = job.policy_seq_no.map(|seq_no| seq_no + 100);
    env.store.insert_managed_index_config(job);

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::Failed {
            message: messages::POLICY_VERSION_CONFLICT.to_string()
        }
    );
    assert!(env.metadata("u1").is_failed());
    assert_eq!(
        env.tick("u1").await,
        RunOutcome::JobDisabled(SkipReason::PolicyFinished)
    );
}

#[tokio::test]
async fn test_disabled_management_stops_on_safe_step() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");
    env.tick("u1").await;

    env.settings.update_with(|s| s.enabled = false).unwrap();

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::JobDisabled(SkipReason::ManagementDisabled)
    );
    assert!(!env.job("u1").value.enabled);
    // Metadata is untouched so the index resumes where it stopped
    assert!(env.metadata("u1").is_resumable());
    assert_eq!(env.metadata("u1").step_meta_data, None);
}

#[tokio::test]
async fn test_disabled_management_finishes_force_merge() {
    let env = TestEnv::new();
    env.install_policy("merge_then_done");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "merge-then-done");
    env.tick("u1").await;
    env.tick("u1").await;

    env.settings.update_with(|s| s.enabled = false).unwrap();

    assert_eq!(
        env.tick("u1").await,
        executed("attempt_call_force_merge", StepStatus::Completed)
    );
    assert!(env.job("u1").value.enabled);
}

#[tokio::test]
async fn test_job_interval_follows_settings() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");
    env.tick("u1").await;
    assert_eq!(env.job("u1").value.schedule.interval_minutes, 5);

    env.settings
        .update_with(|s| s.job_interval_minutes = 1)
        .unwrap();
    env.tick("u1").await;

    assert_eq!(env.job("u1").value.schedule.interval_minutes, 1);
}

#[tokio::test]
async fn test_recreated_index_is_not_touched() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");
    env.tick("u1").await;

    env.cluster.remove_index("logs-1");
    env.add_index("logs-1", "u2");

    assert_eq!(
        env.tick("u1").await,
        RunOutcome::Skipped(SkipReason::IndexMissing)
    );
    assert!(!env.cluster.index("logs-1").unwrap().read_only);
}

/// Config index whose metadata changes under the runner's feet exactly once
struct RacingConfigIndex {
    inner: Arc<InMemoryConfigIndex>,
    race_pending: AtomicBool,
}

impl RacingConfigIndex {
    fn new(inner: Arc<InMemoryConfigIndex>) -> Self {
        Self {
            inner,
            race_pending: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ConfigIndexClient for RacingConfigIndex {
    async fn config_index_exists(&self) -> StorageResult<bool> {
        self.inner.config_index_exists().await
    }

    async fn ensure_config_index(&self) -> StorageResult<bool> {
        self.inner.ensure_config_index().await
    }

    async fn get_policy(&self, policy_id: &str) -> StorageResult<Option<Versioned<Policy>>> {
        self.inner.get_policy(policy_id).await
    }

    async fn put_policy(&self, policy: &Policy, expected: Option<DocVersion>) -> StorageResult<UpdateOutcome> {
        self.inner.put_policy(policy, expected).await
    }

    async fn search_ism_templates(&self) -> StorageResult<HashMap<String, Vec<IsmTemplate>>> {
        self.inner.search_ism_templates().await
    }

    async fn get_managed_index_config(
        &self,
        index_uuid: &str,
    ) -> StorageResult<Option<Versioned<ManagedIndexConfig>>> {
        self.inner.get_managed_index_config(index_uuid).await
    }

    async fn multi_get_managed_index_configs(
        &self,
        index_uuids: &[String],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexConfig>>> {
        self.inner.multi_get_managed_index_configs(index_uuids).await
    }

    async fn search_managed_index_configs(&self) -> StorageResult<Vec<Versioned<ManagedIndexConfig>>> {
        self.inner.search_managed_index_configs().await
    }

    async fn update_managed_index_config(
        &self,
        config: &ManagedIndexConfig,
        expected: DocVersion,
    ) -> StorageResult<UpdateOutcome> {
        self.inner.update_managed_index_config(config, expected).await
    }

    async fn get_metadata(&self, index_uuid: &str) -> StorageResult<Option<Versioned<ManagedIndexMetaData>>> {
        self.inner.get_metadata(index_uuid).await
    }

    async fn multi_get_metadata(
        &self,
        index_uuids: &[String],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexMetaData>>> {
        self.inner.multi_get_metadata(index_uuids).await
    }

    async fn update_metadata(
        &self,
        metadata: &ManagedIndexMetaData,
        expected: Option<DocVersion>,
    ) -> StorageResult<UpdateOutcome> {
        if expected.is_some() && self.race_pending.swap(false, Ordering::SeqCst) {
            if let Some(current) = self.inner.metadata(&metadata.index_uuid) {
                self.inner.insert_metadata(current.value);
            }
        }
        self.inner.update_metadata(metadata, expected).await
    }

    async fn bulk(&self, requests: &[DocWriteRequest]) -> StorageResult<BulkResponse> {
        self.inner.bulk(requests).await
    }
}

#[tokio::test]
async fn test_metadata_write_conflict_fails_and_disables() {
    let env = TestEnv::new();
    env.install_policy("hot_warm_delete");
    env.add_index("logs-1", "u1");
    env.manage("logs-1", "u1", "hot-warm-delete");
    env.tick("u1").await;

    let racing = env.runner_with(Arc::new(RacingConfigIndex::new(env.store.clone())));
    assert_eq!(
        env.tick_with(&racing, "u1").await,
        RunOutcome::Failed {
            message: messages::METADATA_WRITE_CONFLICT.to_string()
        }
    );

    let metadata = env.metadata("u1");
    assert!(metadata.is_failed());
    assert_eq!(metadata.info_message(), Some(messages::METADATA_WRITE_CONFLICT));
    assert!(!env.job("u1").value.enabled);
    // The step never ran
    assert!(!env.cluster.index("logs-1").unwrap().read_only);
}

#[tokio::test]
async fn test_policy_built_in_code_runs_to_completion() {
    let env = TestEnv::new();
    let policy = PolicyBuilder::new("priority-bump")
        .state("only", vec![serde_json::json!({"type": "index_priority", "index_priority": 50})], vec![])
        .build();
    env.store.insert_policy(policy);
    env.add_index("app-1", "a1");
    env.manage("app-1", "a1", "priority-bump");

    env.tick("a1").await;
    assert_eq!(
        env.tick("a1").await,
        executed("attempt_set_index_priority", StepStatus::Completed)
    );
    assert_eq!(env.cluster.index("app-1").unwrap().priority, 50);
    assert_eq!(
        env.tick("a1").await,
        executed("attempt_transition", StepStatus::Completed)
    );
    assert_eq!(
        env.tick("a1").await,
        RunOutcome::JobDisabled(SkipReason::PolicyFinished)
    );
}
