use async_trait::async_trait;

use crate::error::ClientError;
use crate::models::ManagedIndexMetaData;
use crate::state_machine::step::{with_action_properties, Step, StepContext, StepOutcome};
use crate::storage::SnapshotState;

#[derive(Debug)]
pub struct AttemptSnapshotStep {
    repository: String,
    snapshot: String,
    outcome: StepOutcome,
    snapshot_name: Option<String>,
}

impl AttemptSnapshotStep {
    pub fn new(repository: String, snapshot: String) -> Self {
        Self {
            repository,
            snapshot,
            outcome: StepOutcome::default(),
            snapshot_name: None,
        }
    }
}

#[async_trait]
impl Step for AttemptSnapshotStep {
    fn name(&self) -> &str {
        "attempt_snapshot"
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let snapshot_name = format!(
            "{}-{}",
            self.snapshot,
            ctx.now.format("%Y.%m.%d-%H.%M.%S%.3f")
        );

        self.outcome = match ctx
            .client
            .create_snapshot(&self.repository, &snapshot_name, ctx.index)
            .await
        {
            Ok(()) => {
                self.snapshot_name = Some(snapshot_name);
                StepOutcome::completed(format!("Successfully started snapshot [index={}]", ctx.index))
            }
            Err(ClientError::ConcurrentSnapshot { .. }) => StepOutcome::condition_not_met(format!(
                "Concurrent snapshot in progress, retrying next execution [index={}]",
                ctx.index
            )),
            Err(e) => StepOutcome::failed_with_cause(
                format!("Failed to create snapshot [index={}]", ctx.index),
                &e,
            ),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    fn updated_metadata(&self, current: &ManagedIndexMetaData, ctx: &StepContext<'_>) -> ManagedIndexMetaData {
        let updated = self.outcome.apply(self.name(), current, ctx);
        match &self.snapshot_name {
            Some(name) => with_action_properties(updated, |properties| {
                properties.snapshot_name = Some(name.clone());
            }),
            None => updated,
        }
    }
}

#[derive(Debug)]
pub struct WaitForSnapshotStep {
    repository: String,
    outcome: StepOutcome,
}

impl WaitForSnapshotStep {
    pub fn new(repository: String) -> Self {
        Self {
            repository,
            outcome: StepOutcome::default(),
        }
    }
}

#[async_trait]
impl Step for WaitForSnapshotStep {
    fn name(&self) -> &str {
        "wait_for_snapshot"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let Some(snapshot_name) = ctx.action_properties().snapshot_name else {
            self.outcome = StepOutcome::failed(format!(
                "Unable to retrieve [snapshot_name] from ActionProperties [index={}]",
                ctx.index
            ));
            return;
        };

        self.outcome = match ctx.client.snapshot_status(&self.repository, &snapshot_name).await {
            Ok(SnapshotState::InProgress) => StepOutcome::condition_not_met(format!(
                "Creating snapshot in progress [index={}]",
                ctx.index
            )),
            Ok(SnapshotState::Success) => {
                StepOutcome::completed(format!("Snapshot created [index={}]", ctx.index))
            }
            Ok(state) => StepOutcome::failed(format!(
                "Snapshot doesn't exist or failed with state {state:?} [index={}]",
                ctx.index
            )),
            Err(e) => StepOutcome::failed_with_cause(
                format!("Failed to get snapshot status [index={}]", ctx.index),
                &e,
            ),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionMetaData, IndexMetadata};
    use crate::state_machine::steps::test_support::context;
    use crate::state_machine::StepStatus;
    use crate::storage::SimulatedCluster;
    use chrono::Utc;

    #[tokio::test]
    async fn test_snapshot_then_wait() {
        let cluster = SimulatedCluster::new();
        cluster.add_index(IndexMetadata::new("idx", "uuid", Utc::now()));
        let mut metadata = ManagedIndexMetaData::new("idx", "uuid", "policy");
        metadata.action_meta_data = Some(ActionMetaData::new("snapshot", 0, Utc::now()));
        let now = Utc::now();

        let mut attempt = AttemptSnapshotStep::new("repo".to_string(), "nightly".to_string());
        attempt.execute(&context(&cluster, &metadata, now)).await;
        assert_eq!(attempt.status(), StepStatus::Completed);
        let after_attempt = attempt.updated_metadata(&metadata, &context(&cluster, &metadata, now));
        let snapshot_name = after_attempt
            .action_meta_data
            .as_ref()
            .and_then(|a| a.action_properties.as_ref())
            .and_then(|p| p.snapshot_name.clone())
            .unwrap();
        assert!(snapshot_name.starts_with("nightly-"));

        let mut wait = WaitForSnapshotStep::new("repo".to_string());
        wait.execute(&context(&cluster, &after_attempt, now)).await;
        assert_eq!(wait.status(), StepStatus::ConditionNotMet);

        cluster.set_snapshot_state("repo", &snapshot_name, SnapshotState::Success);
        let mut wait = WaitForSnapshotStep::new("repo".to_string());
        wait.execute(&context(&cluster, &after_attempt, now)).await;
        assert_eq!(wait.status(), StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_snapshot_waits() {
        let cluster = SimulatedCluster::new();
        cluster.add_index(IndexMetadata::new("idx", "uuid", Utc::now()));
        cluster.set_snapshot_state("repo", "other", SnapshotState::InProgress);
        let metadata = ManagedIndexMetaData::new("idx", "uuid", "policy");

        let mut attempt = AttemptSnapshotStep::new("repo".to_string(), "nightly".to_string());
        attempt.execute(&context(&cluster, &metadata, Utc::now())).await;
        assert_eq!(attempt.status(), StepStatus::ConditionNotMet);
    }
}
