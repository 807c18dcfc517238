//! # Action Configuration
//!
//! Actions are a closed set of kinds, each carrying its typed configuration. The
//! flat [`ActionType`] discriminant is what the allow-list and metadata refer to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::policy::Transition;
use crate::constants::defaults;

/// Flat discriminant of [`ActionKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Rollover,
    Delete,
    ReadOnly,
    ReadWrite,
    ReplicaCount,
    IndexPriority,
    Allocation,
    Open,
    Close,
    ForceMerge,
    Snapshot,
    Rollup,
    Transition,
}

impl ActionType {
    pub const ALL: [ActionType; 13] = [
        Self::Rollover,
        Self::Delete,
        Self::ReadOnly,
        Self::ReadWrite,
        Self::ReplicaCount,
        Self::IndexPriority,
        Self::Allocation,
        Self::Open,
        Self::Close,
        Self::ForceMerge,
        Self::Snapshot,
        Self::Rollup,
        Self::Transition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rollover => "rollover",
            Self::Delete => "delete",
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
            Self::ReplicaCount => "replica_count",
            Self::IndexPriority => "index_priority",
            Self::Allocation => "allocation",
            Self::Open => "open",
            Self::Close => "close",
            Self::ForceMerge => "force_merge",
            Self::Snapshot => "snapshot",
            Self::Rollup => "rollup",
            Self::Transition => "transition",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid action type: {s}"))
    }
}

/// Backoff curve applied between retries of a failed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    #[default]
    Exponential,
    Constant,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRetry {
    pub count: u64,
    #[serde(default)]
    pub backoff: RetryBackoff,
    #[serde(with = "crate::utils::serde::duration_millis")]
    pub delay: Duration,
}

impl Default for ActionRetry {
    fn default() -> Self {
        Self {
            count: defaults::ACTION_RETRY_COUNT,
            backoff: RetryBackoff::Exponential,
            delay: Duration::from_millis(defaults::ACTION_RETRY_DELAY_MILLIS),
        }
    }
}

/// Rollup job definition applied by the rollup action. Dimensions and metrics are
/// opaque to the lifecycle engine and handed to the rollup subsystem unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsmRollup {
    #[serde(default)]
    pub description: String,
    pub target_index: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub dimensions: serde_json::Value,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

fn default_page_size() -> u32 {
    1000
}

impl IsmRollup {
    /// Rollup job id derived from the source index, stable across retries
    pub fn job_id(&self, index: &str) -> String {
        format!("{index}-rollup-{}", self.target_index)
    }
}

/// Kind-specific action configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Rollover {
        #[serde(default)]
        min_size: Option<u64>,
        #[serde(default)]
        min_doc_count: Option<u64>,
        #[serde(default, with = "crate::utils::serde::option_duration_millis")]
        min_index_age: Option<Duration>,
    },
    Delete,
    ReadOnly,
    ReadWrite,
    ReplicaCount {
        number_of_replicas: u32,
    },
    IndexPriority {
        index_priority: u32,
    },
    Allocation {
        #[serde(default)]
        require: BTreeMap<String, String>,
        #[serde(default)]
        include: BTreeMap<String, String>,
        #[serde(default)]
        exclude: BTreeMap<String, String>,
    },
    Open,
    Close,
    ForceMerge {
        max_num_segments: u32,
    },
    Snapshot {
        repository: String,
        snapshot: String,
    },
    Rollup {
        ism_rollup: IsmRollup,
    },
    /// Evaluates the state's transitions once all listed actions are done.
    /// Never written by users; synthesized from the state.
    Transition {
        transitions: Vec<Transition>,
    },
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Rollover { .. } => ActionType::Rollover,
            Self::Delete => ActionType::Delete,
            Self::ReadOnly => ActionType::ReadOnly,
            Self::ReadWrite => ActionType::ReadWrite,
            Self::ReplicaCount { .. } => ActionType::ReplicaCount,
            Self::IndexPriority { .. } => ActionType::IndexPriority,
            Self::Allocation { .. } => ActionType::Allocation,
            Self::Open => ActionType::Open,
            Self::Close => ActionType::Close,
            Self::ForceMerge { .. } => ActionType::ForceMerge,
            Self::Snapshot { .. } => ActionType::Snapshot,
            Self::Rollup { .. } => ActionType::Rollup,
            Self::Transition { .. } => ActionType::Transition,
        }
    }
}

/// One entry of a state's action list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Position within the owning state
    #[serde(default)]
    pub index: usize,
    #[serde(default, with = "crate::utils::serde::option_duration_millis")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry: ActionRetry,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl ActionConfig {
    pub fn new(index: usize, kind: ActionKind) -> Self {
        Self {
            index,
            timeout: None,
            retry: ActionRetry::default(),
            kind,
        }
    }

    /// The transition pseudo-action of a state with `action_count` listed actions
    pub fn transitions(action_count: usize, transitions: Vec<Transition>) -> Self {
        Self::new(action_count, ActionKind::Transition { transitions })
    }

    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: ActionRetry) -> Self {
        self.retry = retry;
        self
    }
}
