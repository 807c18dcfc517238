//! Single-call index operations: settings updates plus open and close.
//!
//! All of them are idempotent; repeating the call leaves the index in the same state.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::state_machine::step::{Step, StepContext, StepOutcome};
use crate::storage::SettingsUpdate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOperation {
    SetReadOnly,
    SetReadWrite,
    ReplicaCount(u32),
    IndexPriority(u32),
    Allocation {
        require: BTreeMap<String, String>,
        include: BTreeMap<String, String>,
        exclude: BTreeMap<String, String>,
    },
    Open,
    Close,
    /// First step of force merge; blocks writes like [`IndexOperation::SetReadOnly`]
    BlockWritesForMerge,
}

impl IndexOperation {
    fn step_name(&self) -> &'static str {
        match self {
            Self::SetReadOnly => "set_read_only",
            Self::SetReadWrite => "set_read_write",
            Self::ReplicaCount(_) => "attempt_set_replica_count",
            Self::IndexPriority(_) => "attempt_set_index_priority",
            Self::Allocation { .. } => "attempt_allocation",
            Self::Open => "attempt_open",
            Self::Close => "attempt_close",
            Self::BlockWritesForMerge => "attempt_set_read_only",
        }
    }

    fn success_message(&self, index: &str) -> String {
        match self {
            Self::SetReadOnly | Self::BlockWritesForMerge => {
                format!("Successfully set index to read-only [index={index}]")
            }
            Self::SetReadWrite => format!("Successfully set index to read-write [index={index}]"),
            Self::ReplicaCount(n) => {
                format!("Successfully set number_of_replicas to {n} [index={index}]")
            }
            Self::IndexPriority(p) => format!("Successfully set index priority to {p} [index={index}]"),
            Self::Allocation { .. } => format!("Successfully updated allocation [index={index}]"),
            Self::Open => format!("Successfully opened index [index={index}]"),
            Self::Close => format!("Successfully closed index [index={index}]"),
        }
    }

    fn failure_message(&self, index: &str) -> String {
        match self {
            Self::SetReadOnly | Self::BlockWritesForMerge => {
                format!("Failed to set index to read-only [index={index}]")
            }
            Self::SetReadWrite => format!("Failed to set index to read-write [index={index}]"),
            Self::ReplicaCount(n) => format!("Failed to set number_of_replicas to {n} [index={index}]"),
            Self::IndexPriority(p) => format!("Failed to set index priority to {p} [index={index}]"),
            Self::Allocation { .. } => format!("Failed to update allocation [index={index}]"),
            Self::Open => format!("Failed to open index [index={index}]"),
            Self::Close => format!("Failed to close index [index={index}]"),
        }
    }

    fn settings_update(&self) -> Option<SettingsUpdate> {
        match self {
            Self::SetReadOnly | Self::BlockWritesForMerge => Some(SettingsUpdate::ReadOnly(true)),
            Self::SetReadWrite => Some(SettingsUpdate::ReadOnly(false)),
            Self::ReplicaCount(n) => Some(SettingsUpdate::ReplicaCount(*n)),
            Self::IndexPriority(p) => Some(SettingsUpdate::Priority(*p)),
            Self::Allocation {
                require,
                include,
                exclude,
            } => Some(SettingsUpdate::Allocation {
                require: require.clone(),
                include: include.clone(),
                exclude: exclude.clone(),
            }),
            Self::Open | Self::Close => None,
        }
    }
}

#[derive(Debug)]
pub struct IndexOperationStep {
    operation: IndexOperation,
    outcome: StepOutcome,
}

impl IndexOperationStep {
    pub fn new(operation: IndexOperation) -> Self {
        Self {
            operation,
            outcome: StepOutcome::default(),
        }
    }
}

#[async_trait]
impl Step for IndexOperationStep {
    fn name(&self) -> &str {
        self.operation.step_name()
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let result = match (&self.operation, self.operation.settings_update()) {
            (_, Some(update)) => ctx.client.update_settings(ctx.index, &update).await,
            (IndexOperation::Open, None) => ctx.client.open_index(ctx.index).await,
            (_, None) => ctx.client.close_index(ctx.index).await,
        };

        self.outcome = match result {
            Ok(true) => StepOutcome::completed(self.operation.success_message(ctx.index)),
            Ok(false) => StepOutcome::failed(self.operation.failure_message(ctx.index)),
            Err(e) => StepOutcome::failed_with_cause(self.operation.failure_message(ctx.index), &e),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::models::{IndexMetadata, ManagedIndexMetaData};
    use crate::state_machine::steps::test_support::context;
    use crate::state_machine::StepStatus;
    use crate::storage::simulated::ops;
    use crate::storage::SimulatedCluster;
    use chrono::Utc;

    fn setup() -> (SimulatedCluster, ManagedIndexMetaData) {
        let cluster = SimulatedCluster::new();
        cluster.add_index(IndexMetadata::new("test", "uuid", Utc::now()));
        (cluster, ManagedIndexMetaData::new("test", "uuid", "policy"))
    }

    #[tokio::test]
    async fn test_read_write_success() {
        let (cluster, metadata) = setup();
        let ctx = context(&cluster, &metadata, Utc::now());
        let mut step = IndexOperationStep::new(IndexOperation::SetReadWrite);

        step.execute(&ctx).await;

        assert_eq!(step.status(), StepStatus::Completed);
        let updated = step.updated_metadata(&metadata, &ctx);
        assert_eq!(
            updated.info_message(),
            Some("Successfully set index to read-write [index=test]")
        );
        assert_eq!(updated.step_meta_data.unwrap().name, "set_read_write");
    }

    #[tokio::test]
    async fn test_unacknowledged_update_fails() {
        let (cluster, metadata) = setup();
        let ctx = context(&cluster, &metadata, Utc::now());
        let mut step = IndexOperationStep::new(IndexOperation::SetReadWrite);
        cluster.fail_next(ops::UPDATE_SETTINGS, ClientError::Other("shard failure".to_string()));

        step.execute(&ctx).await;

        assert_eq!(step.status(), StepStatus::Failed);
        assert_eq!(
            step.outcome().info["message"],
            "Failed to set index to read-write [index=test]"
        );
    }

    #[tokio::test]
    async fn test_remote_transport_failure_records_root_cause() {
        let (cluster, metadata) = setup();
        let ctx = context(&cluster, &metadata, Utc::now());
        let mut step = IndexOperationStep::new(IndexOperation::SetReadWrite);
        cluster.fail_next(
            ops::UPDATE_SETTINGS,
            ClientError::RemoteTransport {
                message: "rte".to_string(),
                cause: Box::new(ClientError::IllegalArgument("nested".to_string())),
            },
        );

        step.execute(&ctx).await;

        let updated = step.updated_metadata(&metadata, &ctx);
        assert_eq!(updated.step_status(), Some(StepStatus::Failed));
        assert_eq!(updated.info["message"], "Failed to set index to read-write [index=test]");
        assert_eq!(updated.info["cause"], "nested");
    }

    #[tokio::test]
    async fn test_close_then_open() {
        let (cluster, metadata) = setup();
        let ctx = context(&cluster, &metadata, Utc::now());

        let mut close = IndexOperationStep::new(IndexOperation::Close);
        close.execute(&ctx).await;
        assert!(cluster.index("test").unwrap().metadata.is_closed());

        let mut open = IndexOperationStep::new(IndexOperation::Open);
        open.execute(&ctx).await;
        assert!(!cluster.index("test").unwrap().metadata.is_closed());
        assert_eq!(open.status(), StepStatus::Completed);
    }
}
