//! # System Constants
//!
//! Operational limits, default settings and the operator-facing messages written into
//! managed index metadata. Messages are part of the observable contract: operators
//! and tooling match on them through the explain API.

use std::time::Duration;

/// Upper bound on hits fetched by a single config index search
pub const MAX_HITS: usize = 10_000;

/// Early-wake tolerance for the rate-limited full sweep
pub const SWEEP_BUFFER: Duration = Duration::from_millis(20);

/// Fixed delay of the background job re-enable sweep
pub const REENABLE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Name of the index holding job, metadata and policy documents
pub const CONFIG_INDEX_NAME: &str = ".opendistro-ism-config";

/// Prefix for hidden/system indices that are never auto-managed
pub const HIDDEN_INDEX_PREFIX: char = '.';

/// Default settings values
pub mod defaults {
    pub const JOB_INTERVAL_MINUTES: u64 = 5;
    pub const SWEEP_PERIOD_SECONDS: u64 = 600;
    pub const COORDINATOR_BACKOFF_MILLIS: u64 = 50;
    pub const COORDINATOR_BACKOFF_COUNT: u32 = 2;
    pub const ACTION_RETRY_COUNT: u64 = 3;
    pub const ACTION_RETRY_DELAY_MILLIS: u64 = 60_000;
    pub const FORCE_MERGE_TIMEOUT_HOURS: i64 = 12;
}

/// Messages written into `ManagedIndexMetaData.info`
pub mod messages {
    pub const POLICY_VERSION_CONFLICT: &str =
        "There is a version conflict between your previous execution and your managed index";
    pub const METADATA_WRITE_CONFLICT: &str =
        "Managed index metadata was modified concurrently by another writer";
    pub const ACTION_TIMED_OUT: &str = "Action timed out";
    pub const PREVIOUS_ACTION_UNKNOWN: &str = "Previous action was not able to update IndexMetaData.";
    pub const INDEX_CLOSED: &str = "This index is closed";
    pub const ALREADY_MANAGED: &str =
        "This index already has a policy, use the update policy API to update index policies";
    pub const NOT_MANAGED: &str = "This index is not being managed";
    pub const NOT_FAILED: &str = "This index is not in failed state";
    pub const INDEX_NOT_FOUND: &str = "This index does not exist";
    pub const PENDING_RETRY: &str = "Pending retry of failed managed index";

    pub fn action_not_allowed(action_type: &str) -> String {
        format!("Attempted to execute action={action_type} which is not allowed.")
    }

    pub fn policy_load_failed(policy_id: &str) -> String {
        format!("Fail to load policy: {policy_id}")
    }

    pub fn policy_initialized(policy_id: &str) -> String {
        format!("Successfully initialized policy: {policy_id}")
    }

    pub fn change_policy_load_failed(policy_id: &str) -> String {
        format!("Failed to load change policy: {policy_id}")
    }

    pub fn changing_policy(policy_id: &str) -> String {
        format!("Attempting to change policy to {policy_id}")
    }

    pub fn starting_action(action_type: &str, step_name: &str) -> String {
        format!("Starting action {action_type} and working on {step_name}")
    }

    pub fn state_not_found(state: &str, policy_id: &str) -> String {
        format!("Failed to find state={state} in policy={policy_id}")
    }

    pub fn action_not_found(action: &str, state: &str) -> String {
        format!("Failed to find action={action} in state={state}")
    }

    pub fn add_policy_failed(reason: &str) -> String {
        format!("Failed to add policy due to: {reason}")
    }
}
