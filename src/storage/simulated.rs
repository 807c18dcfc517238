//! Simulated cluster implementing both [`ClusterService`] and [`IndexAdminClient`].
//!
//! Keeps just enough index state (settings, stats, aliases, segments, snapshots,
//! rollup jobs) for steps to observe the effects of their own calls. Any operation
//! can be made to fail once with [`SimulatedCluster::fail_next`].

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::cluster::{
    ClusterService, IndexAdminClient, RolloverResponse, RollupMetadata, RollupStatus,
    SettingsUpdate, SnapshotState,
};
use crate::error::{ClientError, ClientResult};
use crate::models::{IndexMetadata, IndexState, IndexStats, IsmRollup};

/// Operation names accepted by [`SimulatedCluster::fail_next`]
pub mod ops {
    pub const INDEX_STATS: &str = "index_stats";
    pub const UPDATE_SETTINGS: &str = "update_settings";
    pub const OPEN_INDEX: &str = "open_index";
    pub const CLOSE_INDEX: &str = "close_index";
    pub const DELETE_INDEX: &str = "delete_index";
    pub const ROLLOVER: &str = "rollover";
    pub const FORCE_MERGE: &str = "force_merge";
    pub const SEGMENT_COUNT: &str = "segment_count";
    pub const CREATE_SNAPSHOT: &str = "create_snapshot";
    pub const SNAPSHOT_STATUS: &str = "snapshot_status";
    pub const CREATE_ROLLUP: &str = "create_rollup";
    pub const START_ROLLUP: &str = "start_rollup";
    pub const EXPLAIN_ROLLUP: &str = "explain_rollup";
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedIndex {
    pub metadata: IndexMetadata,
    pub stats: IndexStats,
    pub read_only: bool,
    pub number_of_replicas: u32,
    pub priority: u32,
    pub allocation: BTreeMap<String, String>,
    pub segment_count: u32,
}

impl SimulatedIndex {
    fn new(metadata: IndexMetadata) -> Self {
        Self {
            metadata,
            stats: IndexStats::default(),
            read_only: false,
            number_of_replicas: 1,
            priority: 1,
            allocation: BTreeMap::new(),
            segment_count: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedCluster {
    leader: AtomicBool,
    indices: DashMap<String, SimulatedIndex>,
    write_aliases: DashMap<String, String>,
    snapshots: DashMap<String, SnapshotState>,
    rollups: DashMap<String, RollupMetadata>,
    failures: DashMap<String, ClientError>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    /// Adds an index; a rollover alias in its metadata becomes a write alias
    pub fn add_index(&self, metadata: IndexMetadata) {
        if let Some(alias) = &metadata.rollover_alias {
            self.write_aliases
                .entry(alias.clone())
                .or_insert_with(|| metadata.name.clone());
        }
        self.indices
            .insert(metadata.name.clone(), SimulatedIndex::new(metadata));
    }

    pub fn remove_index(&self, name: &str) -> Option<IndexMetadata> {
        self.indices.remove(name).map(|(_, index)| index.metadata)
    }

    pub fn index(&self, name: &str) -> Option<SimulatedIndex> {
        self.indices.get(name).map(|entry| entry.clone())
    }

    pub fn set_stats(&self, name: &str, stats: IndexStats) {
        if let Some(mut index) = self.indices.get_mut(name) {
            index.stats = stats;
        }
    }

    pub fn set_segment_count(&self, name: &str, segments: u32) {
        if let Some(mut index) = self.indices.get_mut(name) {
            index.segment_count = segments;
        }
    }

    pub fn set_snapshot_state(&self, repository: &str, snapshot: &str, state: SnapshotState) {
        self.snapshots.insert(snapshot_key(repository, snapshot), state);
    }

    pub fn snapshot_names(&self, repository: &str) -> Vec<String> {
        let prefix = format!("{repository}/");
        self.snapshots
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn set_rollup_status(&self, rollup_id: &str, status: RollupStatus, failure_reason: Option<String>) {
        self.rollups.insert(
            rollup_id.to_string(),
            RollupMetadata {
                status,
                failure_reason,
            },
        );
    }

    pub fn write_index(&self, alias: &str) -> Option<String> {
        self.write_aliases.get(alias).map(|entry| entry.clone())
    }

    /// The next call of `operation` fails with `error`
    pub fn fail_next(&self, operation: &str, error: ClientError) {
        self.failures.insert(operation.to_string(), error);
    }

    /// Calls made so far, as `operation:target`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    fn record(&self, operation: &str, target: &str) -> ClientResult<()> {
        self.calls.lock().push(format!("{operation}:{target}"));
        match self.failures.remove(operation) {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }

    fn with_index<T>(&self, name: &str, f: impl FnOnce(&mut SimulatedIndex) -> T) -> ClientResult<T> {
        self.indices
            .get_mut(name)
            .map(|mut index| f(&mut index))
            .ok_or_else(|| ClientError::IndexNotFound {
                index: name.to_string(),
            })
    }
}

fn snapshot_key(repository: &str, snapshot: &str) -> String {
    format!("{repository}/{snapshot}")
}

/// `logs-000001` rolls over to `logs-000002`
fn next_rollover_name(name: &str) -> ClientResult<String> {
    let (prefix, suffix) = name
        .rsplit_once('-')
        .filter(|(_, suffix)| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| {
            ClientError::IllegalArgument(format!(
                "index name [{name}] does not match pattern '^.*-\\d+$'"
            ))
        })?;
    let next = suffix.parse::<u64>().unwrap_or(0) + 1;
    Ok(format!("{prefix}-{next:0width$}", width = suffix.len()))
}

impl ClusterService for SimulatedCluster {
    fn is_local_node_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn indices(&self) -> Vec<IndexMetadata> {
        self.indices
            .iter()
            .map(|entry| entry.metadata.clone())
            .collect()
    }

    fn index_metadata(&self, name: &str) -> Option<IndexMetadata> {
        self.indices.get(name).map(|entry| entry.metadata.clone())
    }
}

#[async_trait]
impl IndexAdminClient for SimulatedCluster {
    async fn index_stats(&self, index: &str) -> ClientResult<IndexStats> {
        self.record(ops::INDEX_STATS, index)?;
        self.with_index(index, |i| i.stats)
    }

    async fn update_settings(&self, index: &str, update: &SettingsUpdate) -> ClientResult<bool> {
        self.record(ops::UPDATE_SETTINGS, index)?;
        self.with_index(index, |i| {
            match update {
                SettingsUpdate::ReadOnly(read_only) => i.read_only = *read_only,
                SettingsUpdate::ReplicaCount(replicas) => i.number_of_replicas = *replicas,
                SettingsUpdate::Priority(priority) => i.priority = *priority,
                SettingsUpdate::Allocation {
                    require,
                    include,
                    exclude,
                } => {
                    let scoped = [("require", require), ("include", include), ("exclude", exclude)];
                    for (scope, attributes) in scoped {
                        for (key, value) in attributes {
                            i.allocation
                                .insert(format!("{scope}.{key}"), value.clone());
                        }
                    }
                }
            }
            true
        })
    }

    async fn open_index(&self, index: &str) -> ClientResult<bool> {
        self.record(ops::OPEN_INDEX, index)?;
        self.with_index(index, |i| {
            i.metadata.state = IndexState::Open;
            true
        })
    }

    async fn close_index(&self, index: &str) -> ClientResult<bool> {
        self.record(ops::CLOSE_INDEX, index)?;
        self.with_index(index, |i| {
            i.metadata.state = IndexState::Closed;
            true
        })
    }

    async fn delete_index(&self, index: &str) -> ClientResult<bool> {
        self.record(ops::DELETE_INDEX, index)?;
        self.remove_index(index)
            .map(|_| true)
            .ok_or_else(|| ClientError::IndexNotFound {
                index: index.to_string(),
            })
    }

    async fn rollover(&self, alias: &str) -> ClientResult<RolloverResponse> {
        self.record(ops::ROLLOVER, alias)?;
        let current = self
            .write_index(alias)
            .ok_or_else(|| ClientError::IllegalArgument(format!("alias [{alias}] has no write index")))?;
        let new_name = next_rollover_name(&current)?;

        let mut metadata = IndexMetadata::new(&new_name, Uuid::new_v4().to_string(), Utc::now());
        metadata.rollover_alias = Some(alias.to_string());
        self.indices
            .insert(new_name.clone(), SimulatedIndex::new(metadata));
        self.write_aliases.insert(alias.to_string(), new_name.clone());

        Ok(RolloverResponse {
            acknowledged: true,
            rolled_over: true,
            new_index: Some(new_name),
        })
    }

    async fn force_merge(&self, index: &str, max_num_segments: u32) -> ClientResult<()> {
        self.record(ops::FORCE_MERGE, index)?;
        self.with_index(index, |i| {
            i.segment_count = i.segment_count.min(max_num_segments);
        })
    }

    async fn max_shard_segment_count(&self, index: &str) -> ClientResult<u32> {
        self.record(ops::SEGMENT_COUNT, index)?;
        self.with_index(index, |i| i.segment_count)
    }

    async fn create_snapshot(&self, repository: &str, snapshot: &str, index: &str) -> ClientResult<()> {
        self.record(ops::CREATE_SNAPSHOT, index)?;
        let prefix = format!("{repository}/");
        if let Some(running) = self
            .snapshots
            .iter()
            .find(|entry| entry.key().starts_with(&prefix) && *entry.value() == SnapshotState::InProgress)
        {
            return Err(ClientError::ConcurrentSnapshot {
                reason: format!("snapshot [{}] is already running", running.key()),
            });
        }
        self.snapshots
            .insert(snapshot_key(repository, snapshot), SnapshotState::InProgress);
        Ok(())
    }

    async fn snapshot_status(&self, repository: &str, snapshot: &str) -> ClientResult<SnapshotState> {
        self.record(ops::SNAPSHOT_STATUS, snapshot)?;
        self.snapshots
            .get(&snapshot_key(repository, snapshot))
            .map(|entry| *entry)
            .ok_or_else(|| ClientError::Other(format!("snapshot [{repository}:{snapshot}] is missing")))
    }

    async fn create_rollup(&self, rollup_id: &str, source_index: &str, _rollup: &IsmRollup) -> ClientResult<()> {
        self.record(ops::CREATE_ROLLUP, source_index)?;
        if self.rollups.contains_key(rollup_id) {
            return Err(ClientError::AlreadyExists {
                id: rollup_id.to_string(),
            });
        }
        self.set_rollup_status(rollup_id, RollupStatus::Init, None);
        Ok(())
    }

    async fn start_rollup(&self, rollup_id: &str) -> ClientResult<bool> {
        self.record(ops::START_ROLLUP, rollup_id)?;
        match self.rollups.get_mut(rollup_id) {
            Some(mut rollup) => {
                rollup.status = RollupStatus::Started;
                rollup.failure_reason = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn explain_rollup(&self, rollup_id: &str) -> ClientResult<Option<RollupMetadata>> {
        self.record(ops::EXPLAIN_ROLLUP, rollup_id)?;
        Ok(self.rollups.get(rollup_id).map(|entry| entry.clone()))
    }
}
