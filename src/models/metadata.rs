//! # Managed Index Metadata
//!
//! Per-index progress record: where in the policy the index is, what the last step
//! reported, and whether the index needs operator attention. The runner rewrites it
//! at least twice per tick (before and after executing a step) so that a crash can
//! always be detected and resumed from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::versioned::DocVersion;
use crate::state_machine::StepStatus;

/// Free-form diagnostic info; `message` and `cause` are the well-known keys
pub type InfoMap = serde_json::Map<String, serde_json::Value>;

pub fn info_message(message: impl Into<String>) -> InfoMap {
    let mut info = InfoMap::new();
    info.insert("message".to_string(), serde_json::Value::String(message.into()));
    info
}

pub fn info_with_cause(message: impl Into<String>, cause: impl Into<String>) -> InfoMap {
    let mut info = info_message(message);
    info.insert("cause".to_string(), serde_json::Value::String(cause.into()));
    info
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetaData {
    pub name: String,
    pub start_time: DateTime<Utc>,
}

/// Values a step hands to later steps of the same action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_segments: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_rollup_failed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMetaData {
    pub name: String,
    /// Cleared by the retry API; restored to "now" when the action resumes
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub index: usize,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub consumed_retries: u64,
    #[serde(default)]
    pub last_retry_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action_properties: Option<ActionProperties>,
}

impl ActionMetaData {
    pub fn new(name: impl Into<String>, index: usize, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            start_time: Some(now),
            index,
            failed: false,
            consumed_retries: 0,
            last_retry_time: None,
            action_properties: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetaData {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub step_status: StepStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRetryInfoMetaData {
    pub failed: bool,
    pub consumed_retries: u64,
}

impl PolicyRetryInfoMetaData {
    pub fn failed() -> Self {
        Self {
            failed: true,
            consumed_retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedIndexMetaData {
    pub index: String,
    pub index_uuid: String,
    pub policy_id: String,
    #[serde(default)]
    pub policy_seq_no: Option<i64>,
    #[serde(default)]
    pub policy_primary_term: Option<i64>,
    #[serde(default)]
    pub policy_completed: Option<bool>,
    #[serde(default)]
    pub rolled_over: Option<bool>,
    #[serde(default)]
    pub transition_to: Option<String>,
    #[serde(default)]
    pub state_meta_data: Option<StateMetaData>,
    #[serde(default)]
    pub action_meta_data: Option<ActionMetaData>,
    #[serde(default)]
    pub step_meta_data: Option<StepMetaData>,
    #[serde(default)]
    pub policy_retry_info: Option<PolicyRetryInfoMetaData>,
    #[serde(default)]
    pub info: InfoMap,
}

impl ManagedIndexMetaData {
    /// Empty metadata for an index, bound to nothing yet
    pub fn new(index: impl Into<String>, index_uuid: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            index_uuid: index_uuid.into(),
            policy_id: policy_id.into(),
            policy_seq_no: None,
            policy_primary_term: None,
            policy_completed: None,
            rolled_over: None,
            transition_to: None,
            state_meta_data: None,
            action_meta_data: None,
            step_meta_data: None,
            policy_retry_info: None,
            info: InfoMap::new(),
        }
    }

    pub fn policy_version(&self) -> Option<DocVersion> {
        match (self.policy_seq_no, self.policy_primary_term) {
            (Some(seq_no), Some(primary_term)) => Some(DocVersion::new(seq_no, primary_term)),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.policy_retry_info.is_some_and(|info| info.failed)
            || self.action_meta_data.as_ref().is_some_and(|action| action.failed)
    }

    pub fn is_policy_completed(&self) -> bool {
        self.policy_completed == Some(true)
    }

    /// Whether the job may be re-enabled when lifecycle management is switched back on
    pub fn is_resumable(&self) -> bool {
        !self.is_failed() && !self.is_policy_completed()
    }

    /// Marks the whole policy run as failed with an operator-facing message
    pub fn with_policy_failure(mut self, message: impl Into<String>) -> Self {
        self.policy_retry_info = Some(PolicyRetryInfoMetaData::failed());
        self.info = info_message(message);
        self
    }

    pub fn step_status(&self) -> Option<StepStatus> {
        self.step_meta_data.as_ref().map(|step| step.step_status)
    }

    pub fn info_message(&self) -> Option<&str> {
        self.info.get("message").and_then(|m| m.as_str())
    }
}
