//! # Lifecycle Administration
//!
//! The operator-facing operations: storing policies, attaching and detaching them
//! from indices, requesting a policy change, retrying failed indices and explaining
//! where each index is in its policy.
//!
//! Index names may contain `*` wildcards. Per-index problems are reported in the
//! returned [`IsmStatusResponse`]; only problems with the request as a whole are
//! errors.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::DynamicSettings;
use crate::constants::messages;
use crate::error::{IsmError, Result, StorageError, StorageResult};
use crate::models::{
    metadata::info_message, ChangePolicy, DocVersion, IndexMetadata, ManagedIndexConfig,
    ManagedIndexMetaData, Policy, PolicyRetryInfoMetaData, Versioned,
};
use crate::state_machine::StepStatus;
use crate::storage::{
    BulkItemStatus, ClusterService, ConfigIndexClient, DocWriteRequest, UpdateOutcome,
};
use crate::utils::glob;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedIndex {
    pub index_name: String,
    pub index_uuid: String,
    pub reason: String,
}

impl FailedIndex {
    fn new(index: &IndexMetadata, reason: impl Into<String>) -> Self {
        Self {
            index_name: index.name.clone(),
            index_uuid: index.uuid.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsmStatusResponse {
    pub updated_indices: usize,
    pub failed_indices: Vec<FailedIndex>,
}

impl IsmStatusResponse {
    pub fn has_failures(&self) -> bool {
        !self.failed_indices.is_empty()
    }
}

/// Lifecycle view of one index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainEntry {
    pub index: String,
    pub index_uuid: String,
    pub policy_id: Option<String>,
    pub enabled: Option<bool>,
    pub metadata: Option<ManagedIndexMetaData>,
}

pub struct IsmAdmin {
    config_index: Arc<dyn ConfigIndexClient>,
    cluster: Arc<dyn ClusterService>,
    settings: Arc<DynamicSettings>,
}

impl fmt::Debug for IsmAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsmAdmin").finish_non_exhaustive()
    }
}

impl IsmAdmin {
    pub fn new(
        config_index: Arc<dyn ConfigIndexClient>,
        cluster: Arc<dyn ClusterService>,
        settings: Arc<DynamicSettings>,
    ) -> Self {
        Self {
            config_index,
            cluster,
            settings,
        }
    }

    /// Validates and stores a policy. `expected` is the version being replaced, or
    /// `None` for a new policy.
    #[instrument(skip(self, policy), fields(policy_id = %policy.id))]
    pub async fn put_policy(&self, policy: &Policy, expected: Option<DocVersion>) -> Result<DocVersion> {
        policy.validate()?;
        match self.config_index.put_policy(policy, expected).await? {
            UpdateOutcome::Updated(version) => {
                info!(policy_id = %policy.id, seq_no = version.seq_no, "📝 ADMIN: Stored policy");
                Ok(version)
            }
            UpdateOutcome::VersionConflict | UpdateOutcome::NotFound => Err(IsmError::VersionConflict {
                document: format!("policy {}", policy.id),
            }),
        }
    }

    pub async fn get_policy(&self, policy_id: &str) -> Result<Versioned<Policy>> {
        self.config_index
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| IsmError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            })
    }

    /// Attaches `policy_id` to every matching index that is open and not yet managed
    #[instrument(skip(self))]
    pub async fn add_policy(&self, indices: &[String], policy_id: &str) -> Result<IsmStatusResponse> {
        if !self.config_index.ensure_config_index().await? {
            return Err(IsmError::InvalidState(
                "Unable to create or update the config index with the newest mapping".to_string(),
            ));
        }
        self.get_policy(policy_id).await?;

        let mut response = IsmStatusResponse::default();
        let mut candidates = Vec::new();
        for index in self.resolve(indices, &mut response) {
            if index.is_closed() {
                response
                    .failed_indices
                    .push(FailedIndex::new(&index, messages::INDEX_CLOSED));
            } else {
                candidates.push(index);
            }
        }
        if candidates.is_empty() {
            return Ok(response);
        }

        let existing = self.managed_configs(&candidates).await?;
        let interval = self.settings.snapshot().job_interval_minutes;
        let now = Utc::now();
        let mut to_add = Vec::new();
        for index in candidates {
            if existing.contains_key(&index.uuid) {
                response
                    .failed_indices
                    .push(FailedIndex::new(&index, messages::ALREADY_MANAGED));
            } else {
                to_add.push(index);
            }
        }
        if to_add.is_empty() {
            return Ok(response);
        }

        let requests: Vec<DocWriteRequest> = to_add
            .iter()
            .map(|index| {
                DocWriteRequest::CreateManagedIndex(ManagedIndexConfig::new(
                    &index.name,
                    &index.uuid,
                    policy_id,
                    interval,
                    now,
                ))
            })
            .collect();

        let failures = self.bulk_failures(&requests).await?;
        for index in &to_add {
            match failures.get(&index.uuid) {
                Some(reason) => response
                    .failed_indices
                    .push(FailedIndex::new(index, messages::add_policy_failed(reason))),
                None => response.updated_indices += 1,
            }
        }

        info!(
            policy_id = %policy_id,
            updated = response.updated_indices,
            failed = response.failed_indices.len(),
            "📌 ADMIN: Added policy"
        );
        Ok(response)
    }

    /// Deletes the job and metadata of every matching managed index
    #[instrument(skip(self))]
    pub async fn remove_policy(&self, indices: &[String]) -> Result<IsmStatusResponse> {
        let mut response = IsmStatusResponse::default();
        let resolved = self.resolve(indices, &mut response);
        let managed = self.managed_configs(&resolved).await?;

        let mut to_remove = Vec::new();
        for index in resolved {
            if managed.contains_key(&index.uuid) {
                to_remove.push(index);
            } else {
                response
                    .failed_indices
                    .push(FailedIndex::new(&index, messages::NOT_MANAGED));
            }
        }
        if to_remove.is_empty() {
            return Ok(response);
        }

        let job_deletes: Vec<DocWriteRequest> = to_remove
            .iter()
            .map(|index| DocWriteRequest::DeleteManagedIndex {
                index_uuid: index.uuid.clone(),
            })
            .collect();
        let failures = self.bulk_failures(&job_deletes).await?;

        let removed: Vec<&IndexMetadata> = to_remove
            .iter()
            .filter(|index| !failures.contains_key(&index.uuid))
            .collect();
        let metadata_deletes: Vec<DocWriteRequest> = removed
            .iter()
            .map(|index| DocWriteRequest::DeleteMetadata {
                index_uuid: index.uuid.clone(),
            })
            .collect();
        for (uuid, reason) in self.bulk_failures(&metadata_deletes).await? {
            warn!(index_uuid = %uuid, reason = %reason, "⚠️ ADMIN: Failed to delete metadata of removed index");
        }

        response.updated_indices = removed.len();
        for index in &to_remove {
            if let Some(reason) = failures.get(&index.uuid) {
                response
                    .failed_indices
                    .push(FailedIndex::new(index, reason.clone()));
            }
        }
        info!(removed = response.updated_indices, "🗑️ ADMIN: Removed policy");
        Ok(response)
    }

    /// Records a policy change request on every matching managed index. The runner
    /// applies it once the index reaches a state boundary.
    #[instrument(skip(self, change), fields(policy_id = %change.policy_id))]
    pub async fn change_policy(&self, indices: &[String], change: &ChangePolicy) -> Result<IsmStatusResponse> {
        let policy = self.get_policy(&change.policy_id).await?;
        if let Some(state) = &change.state {
            if policy.value.state(state).is_none() {
                return Err(IsmError::InvalidState(messages::state_not_found(
                    state,
                    &change.policy_id,
                )));
            }
        }

        let mut response = IsmStatusResponse::default();
        let resolved = self.resolve(indices, &mut response);
        let managed = self.managed_configs(&resolved).await?;

        let results = join_all(
            resolved
                .iter()
                .map(|index| self.request_change(index, managed.get(&index.uuid), change)),
        )
        .await;
        for result in results {
            match result? {
                None => response.updated_indices += 1,
                Some(failed) => response.failed_indices.push(failed),
            }
        }
        Ok(response)
    }

    async fn request_change(
        &self,
        index: &IndexMetadata,
        config: Option<&Versioned<ManagedIndexConfig>>,
        change: &ChangePolicy,
    ) -> Result<Option<FailedIndex>> {
        let Some(config) = config else {
            return Ok(Some(FailedIndex::new(index, messages::NOT_MANAGED)));
        };

        let mut updated = config.value.clone();
        updated.change_policy = Some(change.clone());
        updated.last_updated_time = Utc::now();
        match self
            .config_index
            .update_managed_index_config(&updated, config.version)
            .await?
        {
            UpdateOutcome::Updated(_) => Ok(None),
            UpdateOutcome::VersionConflict | UpdateOutcome::NotFound => Ok(Some(FailedIndex::new(
                index,
                "Managed index was updated concurrently",
            ))),
        }
    }

    /// Clears the failure of every matching failed index so its job picks up where it
    /// stopped, or at `state` when given.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, indices: &[String], state: Option<&str>) -> Result<IsmStatusResponse> {
        let mut response = IsmStatusResponse::default();
        let resolved = self.resolve(indices, &mut response);
        let managed = self.managed_configs(&resolved).await?;
        let uuids: Vec<String> = managed.keys().cloned().collect();
        let metadata = if uuids.is_empty() {
            HashMap::new()
        } else {
            self.config_index.multi_get_metadata(&uuids).await?
        };

        let now = Utc::now();
        for index in resolved {
            let Some(config) = managed.get(&index.uuid) else {
                response
                    .failed_indices
                    .push(FailedIndex::new(&index, messages::NOT_MANAGED));
                continue;
            };
            let Some(current) = metadata.get(&index.uuid).filter(|m| m.value.is_failed()) else {
                response
                    .failed_indices
                    .push(FailedIndex::new(&index, messages::NOT_FAILED));
                continue;
            };

            if let (Some(state), Some(policy)) = (state, &config.value.policy) {
                if policy.state(state).is_none() {
                    response.failed_indices.push(FailedIndex::new(
                        &index,
                        messages::state_not_found(state, &policy.id),
                    ));
                    continue;
                }
            }

            let retried = retried_meta_data(&current.value, &config.value, state);
            match self
                .config_index
                .update_metadata(&retried, Some(current.version))
                .await?
            {
                UpdateOutcome::Updated(_) => {}
                UpdateOutcome::VersionConflict | UpdateOutcome::NotFound => {
                    response
                        .failed_indices
                        .push(FailedIndex::new(&index, "Managed index metadata was updated concurrently"));
                    continue;
                }
            }

            if !config.value.enabled {
                let enabled = config.value.clone().with_enabled(true, now);
                if let UpdateOutcome::VersionConflict | UpdateOutcome::NotFound = self
                    .config_index
                    .update_managed_index_config(&enabled, config.version)
                    .await?
                {
                    response
                        .failed_indices
                        .push(FailedIndex::new(&index, "Failed to re-enable the managed index job"));
                    continue;
                }
            }
            response.updated_indices += 1;
        }

        info!(
            retried = response.updated_indices,
            failed = response.failed_indices.len(),
            "🔁 ADMIN: Retried failed managed indices"
        );
        Ok(response)
    }

    /// Job and metadata of every matching index. Unmanaged indices are listed with
    /// empty fields.
    pub async fn explain(&self, indices: &[String]) -> Result<Vec<ExplainEntry>> {
        let mut ignored = IsmStatusResponse::default();
        let resolved = self.resolve(indices, &mut ignored);
        let managed = self.managed_configs(&resolved).await?;
        let uuids: Vec<String> = managed.keys().cloned().collect();
        let metadata = if uuids.is_empty() {
            HashMap::new()
        } else {
            self.config_index.multi_get_metadata(&uuids).await?
        };

        Ok(resolved
            .into_iter()
            .map(|index| {
                let config = managed.get(&index.uuid);
                ExplainEntry {
                    policy_id: config.map(|c| c.value.policy_id.clone()),
                    enabled: config.map(|c| c.value.enabled),
                    metadata: metadata.get(&index.uuid).map(|m| m.value.clone()),
                    index: index.name,
                    index_uuid: index.uuid,
                }
            })
            .collect())
    }

    /// Expands names and wildcard patterns against the cluster. Names that match
    /// nothing are reported as failed.
    fn resolve(&self, patterns: &[String], response: &mut IsmStatusResponse) -> Vec<IndexMetadata> {
        let mut all = self.cluster.indices();
        all.sort_by(|a, b| a.name.cmp(&b.name));

        let mut resolved: Vec<IndexMetadata> = Vec::new();
        for pattern in patterns {
            if pattern.contains('*') {
                for index in all.iter().filter(|index| glob::simple_match(pattern, &index.name)) {
                    if !resolved.iter().any(|r| r.uuid == index.uuid) {
                        resolved.push(index.clone());
                    }
                }
                continue;
            }
            match self.cluster.index_metadata(pattern) {
                Some(index) => {
                    if !resolved.iter().any(|r| r.uuid == index.uuid) {
                        resolved.push(index);
                    }
                }
                None => response.failed_indices.push(FailedIndex {
                    index_name: pattern.clone(),
                    index_uuid: String::new(),
                    reason: messages::INDEX_NOT_FOUND.to_string(),
                }),
            }
        }
        resolved
    }

    async fn managed_configs(
        &self,
        indices: &[IndexMetadata],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexConfig>>> {
        if indices.is_empty() {
            return Ok(HashMap::new());
        }
        let uuids: Vec<String> = indices.iter().map(|index| index.uuid.clone()).collect();
        match self.config_index.multi_get_managed_index_configs(&uuids).await {
            Ok(configs) => Ok(configs),
            Err(e) if e.is_index_not_found() => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Sends one bulk request and returns the failure reason per uuid. A cluster block
    /// fails every item instead of the whole call.
    async fn bulk_failures(&self, requests: &[DocWriteRequest]) -> Result<HashMap<String, String>> {
        if requests.is_empty() {
            return Ok(HashMap::new());
        }
        let response = match self.config_index.bulk(requests).await {
            Ok(response) => response,
            Err(e @ StorageError::ClusterBlocked { .. }) => {
                let reason = e.to_string();
                return Ok(requests
                    .iter()
                    .map(|request| (request.index_uuid().to_string(), reason.clone()))
                    .collect());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| match item.status {
                BulkItemStatus::Ok => None,
                BulkItemStatus::RetryableFailure { reason } | BulkItemStatus::PermanentFailure { reason } => {
                    Some((item.index_uuid, reason))
                }
            })
            .collect())
    }
}

/// Metadata that lets the runner resume a failed index: failure flags and retry
/// counters cleared, an interrupted step re-armed as failed so it runs again, and the
/// policy version rebound to the job's snapshot.
fn retried_meta_data(
    metadata: &ManagedIndexMetaData,
    config: &ManagedIndexConfig,
    state: Option<&str>,
) -> ManagedIndexMetaData {
    let mut retried = metadata.clone();
    retried.policy_retry_info = Some(PolicyRetryInfoMetaData::default());
    retried.policy_seq_no = config.policy_seq_no;
    retried.policy_primary_term = config.policy_primary_term;

    if let Some(action) = retried.action_meta_data.as_mut() {
        action.failed = false;
        action.consumed_retries = 0;
        action.last_retry_time = None;
        action.start_time = None;
    }
    if let Some(step) = retried.step_meta_data.as_mut() {
        if step.step_status == StepStatus::Starting {
            step.step_status = StepStatus::Failed;
        }
    }
    if let Some(state) = state {
        retried.transition_to = Some(state.to_string());
    }
    retried.info = info_message(messages::PENDING_RETRY);
    retried
}
