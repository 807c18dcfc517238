//! Concrete steps and the mapping from action kind to its ordered step list.

pub mod delete;
pub mod force_merge;
pub mod rollover;
pub mod rollup;
pub mod settings;
pub mod snapshot;
pub mod transition;

use super::step::Step;
use crate::models::ActionKind;

pub use delete::AttemptDeleteStep;
pub use force_merge::{AttemptCallForceMergeStep, WaitForForceMergeStep};
pub use rollover::AttemptRolloverStep;
pub use rollup::{AttemptCreateRollupJobStep, WaitForRollupCompletionStep};
pub use settings::{IndexOperation, IndexOperationStep};
pub use snapshot::{AttemptSnapshotStep, WaitForSnapshotStep};
pub use transition::AttemptTransitionStep;

/// Ordered steps of an action kind. Never empty.
pub fn build_steps(kind: &ActionKind) -> Vec<Box<dyn Step>> {
    match kind {
        ActionKind::Rollover {
            min_size,
            min_doc_count,
            min_index_age,
        } => vec![Box::new(AttemptRolloverStep::new(
            *min_size,
            *min_doc_count,
            *min_index_age,
        ))],
        ActionKind::Delete => vec![Box::new(AttemptDeleteStep::new())],
        ActionKind::ReadOnly => vec![Box::new(IndexOperationStep::new(IndexOperation::SetReadOnly))],
        ActionKind::ReadWrite => vec![Box::new(IndexOperationStep::new(IndexOperation::SetReadWrite))],
        ActionKind::ReplicaCount { number_of_replicas } => vec![Box::new(IndexOperationStep::new(
            IndexOperation::ReplicaCount(*number_of_replicas),
        ))],
        ActionKind::IndexPriority { index_priority } => vec![Box::new(IndexOperationStep::new(
            IndexOperation::IndexPriority(*index_priority),
        ))],
        ActionKind::Allocation {
            require,
            include,
            exclude,
        } => vec![Box::new(IndexOperationStep::new(IndexOperation::Allocation {
            require: require.clone(),
            include: include.clone(),
            exclude: exclude.clone(),
        }))],
        ActionKind::Open => vec![Box::new(IndexOperationStep::new(IndexOperation::Open))],
        ActionKind::Close => vec![Box::new(IndexOperationStep::new(IndexOperation::Close))],
        ActionKind::ForceMerge { max_num_segments } => vec![
            Box::new(IndexOperationStep::new(IndexOperation::BlockWritesForMerge)),
            Box::new(AttemptCallForceMergeStep::new(*max_num_segments)),
            Box::new(WaitForForceMergeStep::new()),
        ],
        ActionKind::Snapshot {
            repository,
            snapshot,
        } => vec![
            Box::new(AttemptSnapshotStep::new(repository.clone(), snapshot.clone())),
            Box::new(WaitForSnapshotStep::new(repository.clone())),
        ],
        ActionKind::Rollup { ism_rollup } => vec![
            Box::new(AttemptCreateRollupJobStep::new(ism_rollup.clone())),
            Box::new(WaitForRollupCompletionStep::new()),
        ],
        ActionKind::Transition { transitions } => {
            vec![Box::new(AttemptTransitionStep::new(transitions.clone()))]
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};

    use crate::models::ManagedIndexMetaData;
    use crate::state_machine::step::StepContext;
    use crate::storage::SimulatedCluster;

    pub fn context<'a>(
        cluster: &'a SimulatedCluster,
        metadata: &'a ManagedIndexMetaData,
        now: DateTime<Utc>,
    ) -> StepContext<'a> {
        StepContext {
            index: &metadata.index,
            index_uuid: &metadata.index_uuid,
            metadata,
            client: cluster,
            cluster,
            now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionConfig, ActionKind, ActionType};

    #[test]
    fn test_every_kind_builds_steps() {
        let kinds = vec![
            ActionKind::Rollover { min_size: None, min_doc_count: None, min_index_age: None },
            ActionKind::Delete,
            ActionKind::ReadOnly,
            ActionKind::ReadWrite,
            ActionKind::ReplicaCount { number_of_replicas: 1 },
            ActionKind::IndexPriority { index_priority: 1 },
            ActionKind::Allocation {
                require: Default::default(),
                include: Default::default(),
                exclude: Default::default(),
            },
            ActionKind::Open,
            ActionKind::Close,
            ActionKind::ForceMerge { max_num_segments: 1 },
            ActionKind::Snapshot { repository: "repo".into(), snapshot: "snap".into() },
            ActionKind::Rollup {
                ism_rollup: crate::models::IsmRollup {
                    description: String::new(),
                    target_index: "rollup-target".into(),
                    page_size: 100,
                    dimensions: serde_json::Value::Null,
                    metrics: serde_json::Value::Null,
                },
            },
            ActionKind::Transition { transitions: vec![] },
        ];
        assert_eq!(kinds.len(), ActionType::ALL.len());
        for kind in kinds {
            let config = ActionConfig::new(0, kind);
            assert!(!build_steps(&config.kind).is_empty(), "{}", config.action_type());
        }
    }

    #[test]
    fn test_step_names_unique_within_action() {
        let steps = build_steps(&ActionKind::ForceMerge { max_num_segments: 1 });
        let mut names: Vec<&str> = steps.iter().map(|s| s.name()).collect();
        names.dedup();
        assert_eq!(names.len(), 3);
    }
}
