//! Cluster-side view of indices and the change events the coordinator consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::HIDDEN_INDEX_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Open,
    Closed,
}

/// Cluster metadata of a single index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub uuid: String,
    pub creation_date: DateTime<Utc>,
    pub state: IndexState,
    #[serde(default)]
    pub hidden: bool,
    /// Value of the index's rollover alias setting
    #[serde(default)]
    pub rollover_alias: Option<String>,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>, creation_date: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            creation_date,
            state: IndexState::Open,
            hidden: false,
            rollover_alias: None,
        }
    }

    /// Hidden flag or a system-index name; such indices never auto-match templates
    pub fn is_hidden(&self) -> bool {
        self.hidden || self.name.starts_with(HIDDEN_INDEX_PREFIX)
    }

    pub fn is_closed(&self) -> bool {
        self.state == IndexState::Closed
    }
}

/// Document statistics of an index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub doc_count: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedIndex {
    pub name: String,
    pub uuid: String,
}

/// Delta delivered by the cluster-membership service after each cluster state change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterChangedEvent {
    pub local_node_leader: bool,
    /// First state of a freshly formed cluster; nothing to reconcile yet
    pub is_new_cluster: bool,
    pub metadata_changed: bool,
    pub indices_created: Vec<String>,
    pub indices_deleted: Vec<DeletedIndex>,
}
