//! Cluster membership and index administration seams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ClientResult;
use crate::models::{IndexMetadata, IndexStats, IsmRollup};

/// Leadership flag and the live index inventory
pub trait ClusterService: Send + Sync {
    fn is_local_node_leader(&self) -> bool;

    fn indices(&self) -> Vec<IndexMetadata>;

    fn index_metadata(&self, name: &str) -> Option<IndexMetadata>;
}

/// Index setting changes applied by settings-type steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsUpdate {
    /// Write block on or off
    ReadOnly(bool),
    ReplicaCount(u32),
    Priority(u32),
    Allocation {
        require: BTreeMap<String, String>,
        include: BTreeMap<String, String>,
        exclude: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloverResponse {
    pub acknowledged: bool,
    pub rolled_over: bool,
    pub new_index: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    InProgress,
    Success,
    Partial,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupStatus {
    Init,
    Started,
    Retry,
    Finished,
    Failed,
    Stopped,
}

impl fmt::Display for RollupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Started => write!(f, "started"),
            Self::Retry => write!(f, "retry"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupMetadata {
    pub status: RollupStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Index operations performed by steps. Acknowledgement flags are returned as
/// booleans; anything else is a [`ClientError`](crate::error::ClientError).
#[async_trait]
pub trait IndexAdminClient: Send + Sync {
    async fn index_stats(&self, index: &str) -> ClientResult<IndexStats>;

    async fn update_settings(&self, index: &str, update: &SettingsUpdate) -> ClientResult<bool>;

    async fn open_index(&self, index: &str) -> ClientResult<bool>;

    async fn close_index(&self, index: &str) -> ClientResult<bool>;

    async fn delete_index(&self, index: &str) -> ClientResult<bool>;

    async fn rollover(&self, alias: &str) -> ClientResult<RolloverResponse>;

    async fn force_merge(&self, index: &str, max_num_segments: u32) -> ClientResult<()>;

    /// Highest segment count across the primary shards of the index
    async fn max_shard_segment_count(&self, index: &str) -> ClientResult<u32>;

    async fn create_snapshot(&self, repository: &str, snapshot: &str, index: &str) -> ClientResult<()>;

    async fn snapshot_status(&self, repository: &str, snapshot: &str) -> ClientResult<SnapshotState>;

    async fn create_rollup(&self, rollup_id: &str, source_index: &str, rollup: &IsmRollup) -> ClientResult<()>;

    async fn start_rollup(&self, rollup_id: &str) -> ClientResult<bool>;

    async fn explain_rollup(&self, rollup_id: &str) -> ClientResult<Option<RollupMetadata>>;
}
