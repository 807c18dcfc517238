//! # Managed Index Runner
//!
//! Executes one scheduled tick for one managed index: at most one step of its policy.
//!
//! ## Tick order
//!
//! 1. Load the job; skip when it is gone, disabled, or its index no longer exists
//! 2. Initialize metadata and the policy snapshot on the first tick
//! 3. Disable the job once the policy completed or failed
//! 4. Apply a pending policy change at a state boundary
//! 5. Refuse to run when the job and metadata disagree on the policy version
//! 6. Honour the global switch, action timeouts, retry backoff, the idempotency
//!    contract and the action allow-list
//! 7. Write starting metadata, execute the step, write completed metadata
//!
//! Every write of metadata is conditional on the version read earlier in the tick. A
//! conflict means another writer touched the index, which fails the index and
//! disables its job rather than guessing.
//!
//! The runner never returns an error: the [`RunOutcome`] says what happened, and
//! anything unexpected is logged and reported as [`RunOutcome::Errored`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::policy_traversal::{
    action_to_execute, change_policy_meta_data, completed_meta_data, disallowed_meta_data,
    failed_initialization_meta_data, initial_meta_data, is_state_boundary, policy_version_matches,
    starting_meta_data, state_to_execute, step_index_to_execute, timed_out_meta_data,
    updated_action_meta_data,
};
use crate::config::DynamicSettings;
use crate::constants::messages;
use crate::error::Result;
use crate::logging::{log_error, log_runner_operation};
use crate::models::{
    ChangePolicy, DocVersion, ManagedIndexConfig, ManagedIndexMetaData, Policy, Versioned,
};
use crate::state_machine::step::{post_execute, pre_execute};
use crate::state_machine::steps::delete::ATTEMPT_DELETE;
use crate::state_machine::{StepContext, StepStatus};
use crate::storage::{ClusterService, ConfigIndexClient, IndexAdminClient, UpdateOutcome};

/// What the scheduler hands the runner for one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionContext {
    /// Job id, which is the managed index uuid
    pub job_id: String,
    pub expected_execution_time: DateTime<Utc>,
}

impl JobExecutionContext {
    pub fn new(job_id: impl Into<String>, expected_execution_time: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            expected_execution_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConfigMissing,
    JobDisabled,
    IndexMissing,
    PolicyFinished,
    ManagementDisabled,
    BackingOff,
    ConcurrentUpdate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMissing => write!(f, "config_missing"),
            Self::JobDisabled => write!(f, "job_disabled"),
            Self::IndexMissing => write!(f, "index_missing"),
            Self::PolicyFinished => write!(f, "policy_finished"),
            Self::ManagementDisabled => write!(f, "management_disabled"),
            Self::BackingOff => write!(f, "backing_off"),
            Self::ConcurrentUpdate => write!(f, "concurrent_update"),
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was written
    Skipped(SkipReason),
    /// The job was disabled; no step ran
    JobDisabled(SkipReason),
    Initialized { policy_id: String },
    /// The policy could not be loaded; the index is marked failed
    InitializationFailed { policy_id: String },
    PolicyChanged { policy_id: String },
    Executed { step: String, status: StepStatus },
    /// The index was marked failed without executing a step
    Failed { message: String },
    Errored { message: String },
}

impl RunOutcome {
    fn status(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::JobDisabled(_) => "job_disabled",
            Self::Initialized { .. } => "initialized",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::PolicyChanged { .. } => "policy_changed",
            Self::Executed { .. } => "executed",
            Self::Failed { .. } => "failed",
            Self::Errored { .. } => "errored",
        }
    }
}

/// Per-index tick executor
pub struct ManagedIndexRunner {
    config_index: Arc<dyn ConfigIndexClient>,
    cluster: Arc<dyn ClusterService>,
    client: Arc<dyn IndexAdminClient>,
    settings: Arc<DynamicSettings>,
}

impl fmt::Debug for ManagedIndexRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedIndexRunner")
            .field("settings", &self.settings.snapshot())
            .finish_non_exhaustive()
    }
}

impl ManagedIndexRunner {
    pub fn new(
        config_index: Arc<dyn ConfigIndexClient>,
        cluster: Arc<dyn ClusterService>,
        client: Arc<dyn IndexAdminClient>,
        settings: Arc<DynamicSettings>,
    ) -> Self {
        Self {
            config_index,
            cluster,
            client,
            settings,
        }
    }

    /// Runs one tick for the job in `context`
    #[instrument(skip(self), fields(job_id = %context.job_id))]
    pub async fn run(&self, context: &JobExecutionContext) -> RunOutcome {
        let outcome = match self.run_tick(&context.job_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_error("managed_index_runner", "run", &e.to_string(), Some(&context.job_id));
                RunOutcome::Errored {
                    message: e.to_string(),
                }
            }
        };

        debug!(job_id = %context.job_id, status = outcome.status(), outcome = ?outcome, "RUNNER: Tick finished");
        outcome
    }

    async fn run_tick(&self, index_uuid: &str) -> Result<RunOutcome> {
        let Some(config) = self.config_index.get_managed_index_config(index_uuid).await? else {
            return Ok(RunOutcome::Skipped(SkipReason::ConfigMissing));
        };
        if !config.value.enabled {
            return Ok(RunOutcome::Skipped(SkipReason::JobDisabled));
        }

        let index_exists = self
            .cluster
            .index_metadata(&config.value.index)
            .is_some_and(|index| index.uuid == config.value.index_uuid);
        if !index_exists {
            return Ok(RunOutcome::Skipped(SkipReason::IndexMissing));
        }

        let metadata = self.config_index.get_metadata(index_uuid).await?;
        let (metadata, policy) = match (metadata, config.value.policy.clone()) {
            (Some(metadata), Some(policy)) => (metadata, policy),
            (metadata, _) => return self.initialize(config, metadata).await,
        };

        if metadata.value.is_policy_completed() || metadata.value.is_failed() {
            return self.disable_job(config, SkipReason::PolicyFinished).await;
        }

        if let Some(change) = config.value.change_policy.clone() {
            if is_state_boundary(&policy, &metadata.value) {
                return self.change_policy(config, metadata, &change).await;
            }
        }

        if !policy_version_matches(&config.value, &metadata.value) {
            let failed = metadata
                .value
                .clone()
                .with_policy_failure(messages::POLICY_VERSION_CONFLICT);
            return self
                .fail_index(&config, &metadata, failed, messages::POLICY_VERSION_CONFLICT)
                .await;
        }

        self.execute_step(config, metadata, &policy).await
    }

    /// First tick: bind the policy snapshot to the job and create metadata at the
    /// policy's starting state
    async fn initialize(
        &self,
        config: Versioned<ManagedIndexConfig>,
        existing: Option<Versioned<ManagedIndexMetaData>>,
    ) -> Result<RunOutcome> {
        let now = Utc::now();
        let expected_metadata = existing.as_ref().map(|metadata| metadata.version);
        let policy_id = config.value.policy_id.clone();

        let policy = match (&config.value.policy, config.value.policy_version()) {
            (Some(policy), Some(version)) => Some(Versioned::new(policy.clone(), version)),
            _ => self.config_index.get_policy(&policy_id).await?,
        };

        let Some(policy) = policy else {
            warn!(index = %config.value.index, policy_id = %policy_id, "⚠️ RUNNER: Policy not found during initialization");
            let failed = failed_initialization_meta_data(&config.value);
            if !self.write_metadata(&failed, expected_metadata).await? {
                return self.handle_metadata_conflict(&config).await;
            }
            return Ok(RunOutcome::InitializationFailed { policy_id });
        };

        if config.value.policy.is_none() {
            let saved = config
                .value
                .clone()
                .with_policy(policy.value.clone(), policy.version, now);
            match self
                .config_index
                .update_managed_index_config(&saved, config.version)
                .await?
            {
                UpdateOutcome::Updated(_) => {}
                _ => return Ok(RunOutcome::Skipped(SkipReason::ConcurrentUpdate)),
            }
        }

        let metadata = initial_meta_data(&config.value, &policy, now);
        if !self.write_metadata(&metadata, expected_metadata).await? {
            return self.handle_metadata_conflict(&config).await;
        }

        info!(
            index = %config.value.index,
            policy_id = %policy.value.id,
            "✅ RUNNER: Initialized managed index"
        );
        log_runner_operation(
            "initialize",
            &config.value.index,
            &config.value.index_uuid,
            Some(&policy.value.id),
            "initialized",
            None,
        );
        Ok(RunOutcome::Initialized {
            policy_id: policy.value.id,
        })
    }

    /// Rebinds metadata and then the job to the requested policy. Metadata goes first
    /// so that a crash in between leaves a version mismatch, which fails loudly.
    async fn change_policy(
        &self,
        config: Versioned<ManagedIndexConfig>,
        metadata: Versioned<ManagedIndexMetaData>,
        change: &ChangePolicy,
    ) -> Result<RunOutcome> {
        let now = Utc::now();
        let Some(policy) = self.config_index.get_policy(&change.policy_id).await? else {
            let message = messages::change_policy_load_failed(&change.policy_id);
            let failed = metadata.value.clone().with_policy_failure(message.clone());
            return self.fail_index(&config, &metadata, failed, &message).await;
        };

        let changed = change_policy_meta_data(&metadata.value, change, &policy, now);
        if !self.write_metadata(&changed, Some(metadata.version)).await? {
            return self.handle_metadata_conflict(&config).await;
        }

        let saved = config
            .value
            .clone()
            .with_policy(policy.value.clone(), policy.version, now);
        if let UpdateOutcome::VersionConflict | UpdateOutcome::NotFound = self
            .config_index
            .update_managed_index_config(&saved, config.version)
            .await?
        {
            warn!(index = %config.value.index, "⚠️ RUNNER: Job changed while applying policy change");
        }

        info!(
            index = %config.value.index,
            policy_id = %policy.value.id,
            "🔀 RUNNER: Changed policy"
        );
        log_runner_operation(
            "change_policy",
            &config.value.index,
            &config.value.index_uuid,
            Some(&policy.value.id),
            "changed",
            change.state.as_deref(),
        );
        Ok(RunOutcome::PolicyChanged {
            policy_id: policy.value.id,
        })
    }

    async fn execute_step(
        &self,
        config: Versioned<ManagedIndexConfig>,
        metadata: Versioned<ManagedIndexMetaData>,
        policy: &Policy,
    ) -> Result<RunOutcome> {
        let settings = self.settings.snapshot();
        let now = Utc::now();

        let state = state_to_execute(policy, &metadata.value);
        let mut action = state.and_then(|state| action_to_execute(state, &metadata.value));
        let (Some(state), Some(action)) = (state, action.as_mut()) else {
            let failed = starting_meta_data(policy, &metadata.value, state, None, now);
            let message = failed.info_message().unwrap_or_default().to_string();
            return self.fail_index(&config, &metadata, failed, &message).await;
        };

        let step_index = step_index_to_execute(state, action, &metadata.value);
        let Some(step) = action.step(step_index) else {
            let failed = starting_meta_data(policy, &metadata.value, Some(state), None, now);
            let message = failed.info_message().unwrap_or_default().to_string();
            return self.fail_index(&config, &metadata, failed, &message).await;
        };
        let step_name = step.name().to_string();

        if !settings.enabled && step.is_safe_to_disable_on() {
            return self.disable_job(config, SkipReason::ManagementDisabled).await;
        }

        let action_meta = updated_action_meta_data(state, action, &metadata.value, now);
        if action.has_timed_out(Some(&action_meta), now) {
            let failed = timed_out_meta_data(&metadata.value, action_meta);
            return self
                .fail_index(&config, &metadata, failed, messages::ACTION_TIMED_OUT)
                .await;
        }

        if action.should_backoff(Some(&action_meta), now) {
            debug!(index = %config.value.index, action = %action.action_type(), "RUNNER: Backing off retried action");
            return Ok(RunOutcome::Skipped(SkipReason::BackingOff));
        }

        let interrupted = metadata
            .value
            .step_meta_data
            .as_ref()
            .is_some_and(|recorded| {
                recorded.step_status == StepStatus::Starting && recorded.name == step_name
            });
        if interrupted && !step.is_idempotent() {
            let failed = metadata
                .value
                .clone()
                .with_policy_failure(messages::PREVIOUS_ACTION_UNKNOWN);
            return self
                .fail_index(&config, &metadata, failed, messages::PREVIOUS_ACTION_UNKNOWN)
                .await;
        }

        let action_type = action.action_type();
        if !settings.is_action_allowed(action_type) && action.is_first_step(&step_name) {
            let failed = disallowed_meta_data(&metadata.value, action_meta, action_type);
            let message = messages::action_not_allowed(action_type.as_str());
            return self.fail_index(&config, &metadata, failed, &message).await;
        }

        let starting = starting_meta_data(policy, &metadata.value, Some(state), Some((&*action, step)), now);
        let Some(starting_version) = self.write_metadata_versioned(&starting, Some(metadata.version)).await? else {
            return self.handle_metadata_conflict(&config).await;
        };

        let retry = action.config().retry;
        let Some(step) = action.step_mut(step_index) else {
            return Ok(RunOutcome::Skipped(SkipReason::ConcurrentUpdate));
        };

        let ctx = StepContext {
            index: &config.value.index,
            index_uuid: &config.value.index_uuid,
            metadata: &starting,
            client: self.client.as_ref(),
            cluster: self.cluster.as_ref(),
            now,
        };
        pre_execute(&**step, &ctx);
        step.execute(&ctx).await;
        post_execute(&**step, &ctx);

        let status = step.status();
        log_runner_operation(
            "execute_step",
            &config.value.index,
            &config.value.index_uuid,
            Some(&policy.id),
            &status.to_string(),
            Some(&step_name),
        );

        if step_name == ATTEMPT_DELETE && status == StepStatus::Completed {
            return Ok(RunOutcome::Executed {
                step: step_name,
                status,
            });
        }

        let completed = completed_meta_data(&**step, &retry, &starting, &ctx);
        if !self.write_metadata(&completed, Some(starting_version)).await? {
            return self.handle_metadata_conflict(&config).await;
        }

        if config.value.schedule.interval_minutes != settings.job_interval_minutes {
            self.update_job_interval(config, settings.job_interval_minutes).await?;
        }

        Ok(RunOutcome::Executed {
            step: step_name,
            status,
        })
    }

    async fn write_metadata_versioned(
        &self,
        metadata: &ManagedIndexMetaData,
        expected: Option<DocVersion>,
    ) -> Result<Option<DocVersion>> {
        Ok(self
            .config_index
            .update_metadata(metadata, expected)
            .await?
            .version())
    }

    /// Returns `false` on a version conflict
    async fn write_metadata(
        &self,
        metadata: &ManagedIndexMetaData,
        expected: Option<DocVersion>,
    ) -> Result<bool> {
        Ok(self.write_metadata_versioned(metadata, expected).await?.is_some())
    }

    /// Persists failed metadata; the next tick disables the job
    async fn fail_index(
        &self,
        config: &Versioned<ManagedIndexConfig>,
        metadata: &Versioned<ManagedIndexMetaData>,
        failed: ManagedIndexMetaData,
        message: &str,
    ) -> Result<RunOutcome> {
        warn!(index = %config.value.index, reason = %message, "❌ RUNNER: Managed index failed");
        if !self.write_metadata(&failed, Some(metadata.version)).await? {
            return self.handle_metadata_conflict(config).await;
        }
        Ok(RunOutcome::Failed {
            message: message.to_string(),
        })
    }

    /// Someone else wrote the metadata mid-tick. Fail the index on top of whatever
    /// they wrote and stop the job.
    async fn handle_metadata_conflict(&self, config: &Versioned<ManagedIndexConfig>) -> Result<RunOutcome> {
        warn!(index = %config.value.index, "⚠️ RUNNER: Metadata write conflict");

        if let Some(current) = self.config_index.get_metadata(&config.value.index_uuid).await? {
            let failed = current
                .value
                .with_policy_failure(messages::METADATA_WRITE_CONFLICT);
            if !self.write_metadata(&failed, Some(current.version)).await? {
                warn!(index = %config.value.index, "⚠️ RUNNER: Could not record metadata write conflict");
            }
        }

        if let Some(latest) = self
            .config_index
            .get_managed_index_config(&config.value.index_uuid)
            .await?
        {
            self.disable_job(latest, SkipReason::ConcurrentUpdate).await?;
        }

        Ok(RunOutcome::Failed {
            message: messages::METADATA_WRITE_CONFLICT.to_string(),
        })
    }

    async fn disable_job(&self, config: Versioned<ManagedIndexConfig>, reason: SkipReason) -> Result<RunOutcome> {
        let index = config.value.index.clone();
        let disabled = config.value.with_enabled(false, Utc::now());
        match self
            .config_index
            .update_managed_index_config(&disabled, config.version)
            .await?
        {
            UpdateOutcome::Updated(_) => {
                info!(index = %index, reason = %reason, "⏸️ RUNNER: Disabled managed index job");
                Ok(RunOutcome::JobDisabled(reason))
            }
            _ => Ok(RunOutcome::Skipped(SkipReason::ConcurrentUpdate)),
        }
    }

    async fn update_job_interval(&self, config: Versioned<ManagedIndexConfig>, interval_minutes: u64) -> Result<()> {
        // The config version was read at the start of the tick; metadata writes do
        // not touch it, so it is still current unless an operator edited the job.
        let mut updated = config.value;
        updated.schedule.interval_minutes = interval_minutes;
        updated.last_updated_time = Utc::now();
        if let UpdateOutcome::Updated(_) = self
            .config_index
            .update_managed_index_config(&updated, config.version)
            .await?
        {
            debug!(index = %updated.index, interval_minutes, "RUNNER: Updated job interval");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsmSettings;
    use crate::models::IndexMetadata;
    use crate::storage::{InMemoryConfigIndex, SimulatedCluster};

    fn runner(store: &Arc<InMemoryConfigIndex>, cluster: &Arc<SimulatedCluster>) -> ManagedIndexRunner {
        ManagedIndexRunner::new(
            store.clone(),
            cluster.clone(),
            cluster.clone(),
            Arc::new(DynamicSettings::new(IsmSettings::default())),
        )
    }

    #[tokio::test]
    async fn test_missing_config_is_skipped() {
        let store = Arc::new(InMemoryConfigIndex::new());
        let cluster = Arc::new(SimulatedCluster::new());
        let outcome = runner(&store, &cluster)
            .run(&JobExecutionContext::new("missing", Utc::now()))
            .await;
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::ConfigMissing));
    }

    #[tokio::test]
    async fn test_unknown_policy_fails_initialization() {
        let store = Arc::new(InMemoryConfigIndex::new());
        let cluster = Arc::new(SimulatedCluster::new());
        cluster.add_index(IndexMetadata::new("logs", "uuid-1", Utc::now()));
        store.insert_managed_index_config(ManagedIndexConfig::new("logs", "uuid-1", "ghost", 5, Utc::now()));

        let outcome = runner(&store, &cluster)
            .run(&JobExecutionContext::new("uuid-1", Utc::now()))
            .await;

        assert_eq!(
            outcome,
            RunOutcome::InitializationFailed {
                policy_id: "ghost".to_string()
            }
        );
        let metadata = store.metadata("uuid-1").unwrap().value;
        assert!(metadata.is_failed());
        assert_eq!(metadata.info_message(), Some("Fail to load policy: ghost"));
    }

    #[tokio::test]
    async fn test_recreated_index_with_new_uuid_is_skipped() {
        let store = Arc::new(InMemoryConfigIndex::new());
        let cluster = Arc::new(SimulatedCluster::new());
        cluster.add_index(IndexMetadata::new("logs", "uuid-2", Utc::now()));
        store.insert_managed_index_config(ManagedIndexConfig::new("logs", "uuid-1", "policy", 5, Utc::now()));

        let outcome = runner(&store, &cluster)
            .run(&JobExecutionContext::new("uuid-1", Utc::now()))
            .await;
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::IndexMissing));
    }
}
