//! # Managed Index Config
//!
//! The job document the scheduler runs. One per managed index, keyed by index uuid.
//! It carries a snapshot of the policy taken at initialization time; that snapshot is
//! only ever replaced through a [`ChangePolicy`] request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::Policy;
use super::versioned::DocVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub interval_minutes: u64,
    pub start_time: DateTime<Utc>,
}

/// Pending request to switch an index to another policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePolicy {
    pub policy_id: String,
    /// State to start in on the new policy; its default state when absent
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedIndexConfig {
    pub index: String,
    pub index_uuid: String,
    pub enabled: bool,
    pub schedule: JobSchedule,
    pub policy_id: String,
    #[serde(default)]
    pub policy: Option<Policy>,
    #[serde(default)]
    pub policy_seq_no: Option<i64>,
    #[serde(default)]
    pub policy_primary_term: Option<i64>,
    #[serde(default)]
    pub change_policy: Option<ChangePolicy>,
    #[serde(default)]
    pub job_enabled_time: Option<DateTime<Utc>>,
    pub last_updated_time: DateTime<Utc>,
}

impl ManagedIndexConfig {
    /// A fresh job document as created by the coordinator or the add policy API.
    /// The policy snapshot is filled in by the runner on its first tick.
    pub fn new(
        index: impl Into<String>,
        index_uuid: impl Into<String>,
        policy_id: impl Into<String>,
        interval_minutes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            index: index.into(),
            index_uuid: index_uuid.into(),
            enabled: true,
            schedule: JobSchedule {
                interval_minutes,
                start_time: now,
            },
            policy_id: policy_id.into(),
            policy: None,
            policy_seq_no: None,
            policy_primary_term: None,
            change_policy: None,
            job_enabled_time: Some(now),
            last_updated_time: now,
        }
    }

    pub fn policy_version(&self) -> Option<DocVersion> {
        match (self.policy_seq_no, self.policy_primary_term) {
            (Some(seq_no), Some(primary_term)) => Some(DocVersion::new(seq_no, primary_term)),
            _ => None,
        }
    }

    /// Binds a policy snapshot and clears any change request it fulfils
    pub fn with_policy(mut self, policy: Policy, version: DocVersion, now: DateTime<Utc>) -> Self {
        self.policy_id = policy.id.clone();
        self.policy = Some(policy);
        self.policy_seq_no = Some(version.seq_no);
        self.policy_primary_term = Some(version.primary_term);
        self.change_policy = None;
        self.last_updated_time = now;
        self
    }

    pub fn with_enabled(mut self, enabled: bool, now: DateTime<Utc>) -> Self {
        self.enabled = enabled;
        self.job_enabled_time = enabled.then_some(now);
        self.last_updated_time = now;
        self
    }
}
