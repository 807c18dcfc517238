//! In-memory config index.
//!
//! Versioning follows the storage engine's model: one monotonically increasing
//! sequence number shared by every document and a fixed primary term. Item-level
//! bulk failures and search errors can be injected to exercise the coordinator's
//! retry and degradation paths.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use super::config_index::{
    BulkItemResponse, BulkItemStatus, BulkResponse, ConfigIndexClient, DocWriteRequest,
    UpdateOutcome,
};
use crate::constants::{CONFIG_INDEX_NAME, MAX_HITS};
use crate::error::{StorageError, StorageResult};
use crate::models::{
    DocVersion, IsmTemplate, ManagedIndexConfig, ManagedIndexMetaData, Policy, Versioned,
};

const PRIMARY_TERM: i64 = 1;

/// Bulk calls kept for inspection; older calls are dropped first
const BULK_CALL_LOG_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct InjectedFailure {
    status: BulkItemStatus,
    remaining: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryConfigIndex {
    index_exists: AtomicBool,
    ensure_fails: AtomicBool,
    seq_no: AtomicI64,
    policies: DashMap<String, Versioned<Policy>>,
    configs: DashMap<String, Versioned<ManagedIndexConfig>>,
    metadata: DashMap<String, Versioned<ManagedIndexMetaData>>,
    bulk_failures: DashMap<String, InjectedFailure>,
    search_failure: Mutex<Option<StorageError>>,
    bulk_calls: Mutex<VecDeque<Vec<String>>>,
}

impl InMemoryConfigIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> DocVersion {
        DocVersion::new(self.seq_no.fetch_add(1, Ordering::SeqCst) + 1, PRIMARY_TERM)
    }

    fn mark_exists(&self) {
        self.index_exists.store(true, Ordering::SeqCst);
    }

    fn check_exists(&self) -> StorageResult<()> {
        if self.index_exists.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::IndexNotFound {
                index: CONFIG_INDEX_NAME.to_string(),
            })
        }
    }

    fn check_search(&self) -> StorageResult<()> {
        if let Some(error) = self.search_failure.lock().clone() {
            return Err(error);
        }
        self.check_exists()
    }

    /// Stores a job document unconditionally and returns its version
    pub fn insert_managed_index_config(&self, config: ManagedIndexConfig) -> DocVersion {
        self.mark_exists();
        let version = self.next_version();
        self.configs
            .insert(config.index_uuid.clone(), Versioned::new(config, version));
        version
    }

    /// Stores metadata unconditionally and returns its version
    pub fn insert_metadata(&self, metadata: ManagedIndexMetaData) -> DocVersion {
        self.mark_exists();
        let version = self.next_version();
        self.metadata
            .insert(metadata.index_uuid.clone(), Versioned::new(metadata, version));
        version
    }

    /// Stores a policy unconditionally and returns its version
    pub fn insert_policy(&self, policy: Policy) -> DocVersion {
        self.mark_exists();
        let version = self.next_version();
        self.policies
            .insert(policy.id.clone(), Versioned::new(policy, version));
        version
    }

    pub fn managed_index_config(&self, index_uuid: &str) -> Option<Versioned<ManagedIndexConfig>> {
        self.configs.get(index_uuid).map(|entry| entry.clone())
    }

    pub fn metadata(&self, index_uuid: &str) -> Option<Versioned<ManagedIndexMetaData>> {
        self.metadata.get(index_uuid).map(|entry| entry.clone())
    }

    pub fn managed_index_uuids(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.configs.iter().map(|e| e.key().clone()).collect();
        uuids.sort();
        uuids
    }

    pub fn metadata_uuids(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.metadata.iter().map(|e| e.key().clone()).collect();
        uuids.sort();
        uuids
    }

    /// The next `times` bulk writes touching `index_uuid` fail with `status`
    pub fn inject_bulk_failure(&self, index_uuid: impl Into<String>, status: BulkItemStatus, times: usize) {
        self.bulk_failures.insert(
            index_uuid.into(),
            InjectedFailure {
                status,
                remaining: times,
            },
        );
    }

    /// Makes every search fail until cleared with `None`
    pub fn set_search_failure(&self, error: Option<StorageError>) {
        *self.search_failure.lock() = error;
    }

    pub fn set_ensure_fails(&self, fails: bool) {
        self.ensure_fails.store(fails, Ordering::SeqCst);
    }

    /// Uuids sent in each of the most recent bulk calls, in call order
    pub fn bulk_calls(&self) -> Vec<Vec<String>> {
        self.bulk_calls.lock().iter().cloned().collect()
    }

    fn record_bulk_call(&self, requests: &[DocWriteRequest]) {
        let mut calls = self.bulk_calls.lock();
        if calls.len() == BULK_CALL_LOG_CAPACITY {
            calls.pop_front();
        }
        calls.push_back(requests.iter().map(|r| r.index_uuid().to_string()).collect());
    }

    /// Spent failures are removed so the map only holds pending injections
    fn take_injected_failure(&self, index_uuid: &str) -> Option<BulkItemStatus> {
        let Entry::Occupied(mut entry) = self.bulk_failures.entry(index_uuid.to_string()) else {
            return None;
        };
        let failure = entry.get_mut();
        if failure.remaining == 0 {
            entry.remove();
            return None;
        }
        failure.remaining -= 1;
        let status = failure.status.clone();
        if failure.remaining == 0 {
            entry.remove();
        }
        Some(status)
    }

    fn apply(&self, request: &DocWriteRequest) -> BulkItemStatus {
        match request {
            DocWriteRequest::CreateManagedIndex(config) => {
                self.mark_exists();
                let version = self.next_version();
                match self.configs.entry(config.index_uuid.clone()) {
                    Entry::Occupied(_) => BulkItemStatus::PermanentFailure {
                        reason: format!(
                            "version conflict, document already exists [{}]",
                            config.index_uuid
                        ),
                    },
                    Entry::Vacant(entry) => {
                        entry.insert(Versioned::new(config.clone(), version));
                        BulkItemStatus::Ok
                    }
                }
            }
            DocWriteRequest::DeleteManagedIndex { index_uuid } => {
                self.configs.remove(index_uuid);
                BulkItemStatus::Ok
            }
            DocWriteRequest::DeleteMetadata { index_uuid } => {
                self.metadata.remove(index_uuid);
                BulkItemStatus::Ok
            }
            DocWriteRequest::SetJobEnabled {
                index_uuid,
                enabled,
            } => {
                let version = self.next_version();
                match self.configs.get_mut(index_uuid) {
                    Some(mut entry) => {
                        let updated = entry.value.clone().with_enabled(*enabled, Utc::now());
                        *entry = Versioned::new(updated, version);
                        BulkItemStatus::Ok
                    }
                    None => BulkItemStatus::PermanentFailure {
                        reason: format!("document missing [{index_uuid}]"),
                    },
                }
            }
        }
    }
}

#[async_trait]
impl ConfigIndexClient for InMemoryConfigIndex {
    async fn config_index_exists(&self) -> StorageResult<bool> {
        Ok(self.index_exists.load(Ordering::SeqCst))
    }

    async fn ensure_config_index(&self) -> StorageResult<bool> {
        if self.ensure_fails.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.mark_exists();
        Ok(true)
    }

    async fn get_policy(&self, policy_id: &str) -> StorageResult<Option<Versioned<Policy>>> {
        Ok(self.policies.get(policy_id).map(|entry| entry.clone()))
    }

    async fn put_policy(
        &self,
        policy: &Policy,
        expected: Option<DocVersion>,
    ) -> StorageResult<UpdateOutcome> {
        self.mark_exists();
        let version = self.next_version();
        match self.policies.entry(policy.id.clone()) {
            Entry::Occupied(mut entry) if Some(entry.get().version) == expected => {
                entry.insert(Versioned::new(policy.clone(), version));
                Ok(UpdateOutcome::Updated(version))
            }
            Entry::Vacant(entry) if expected.is_none() => {
                entry.insert(Versioned::new(policy.clone(), version));
                Ok(UpdateOutcome::Updated(version))
            }
            _ => Ok(UpdateOutcome::VersionConflict),
        }
    }

    async fn search_ism_templates(&self) -> StorageResult<HashMap<String, Vec<IsmTemplate>>> {
        self.check_search()?;
        Ok(self
            .policies
            .iter()
            .filter(|entry| !entry.value.ism_template.is_empty())
            .take(MAX_HITS)
            .map(|entry| (entry.key().clone(), entry.value.ism_template.clone()))
            .collect())
    }

    async fn get_managed_index_config(
        &self,
        index_uuid: &str,
    ) -> StorageResult<Option<Versioned<ManagedIndexConfig>>> {
        Ok(self.managed_index_config(index_uuid))
    }

    async fn multi_get_managed_index_configs(
        &self,
        index_uuids: &[String],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexConfig>>> {
        self.check_exists()?;
        Ok(index_uuids
            .iter()
            .filter_map(|uuid| self.managed_index_config(uuid).map(|c| (uuid.clone(), c)))
            .collect())
    }

    async fn search_managed_index_configs(&self) -> StorageResult<Vec<Versioned<ManagedIndexConfig>>> {
        self.check_search()?;
        Ok(self
            .configs
            .iter()
            .take(MAX_HITS)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_managed_index_config(
        &self,
        config: &ManagedIndexConfig,
        expected: DocVersion,
    ) -> StorageResult<UpdateOutcome> {
        let version = self.next_version();
        match self.configs.get_mut(&config.index_uuid) {
            None => Ok(UpdateOutcome::NotFound),
            Some(entry) if entry.version != expected => Ok(UpdateOutcome::VersionConflict),
            Some(mut entry) => {
                *entry = Versioned::new(config.clone(), version);
                Ok(UpdateOutcome::Updated(version))
            }
        }
    }

    async fn get_metadata(
        &self,
        index_uuid: &str,
    ) -> StorageResult<Option<Versioned<ManagedIndexMetaData>>> {
        Ok(self.metadata(index_uuid))
    }

    async fn multi_get_metadata(
        &self,
        index_uuids: &[String],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexMetaData>>> {
        self.check_exists()?;
        Ok(index_uuids
            .iter()
            .filter_map(|uuid| self.metadata(uuid).map(|m| (uuid.clone(), m)))
            .collect())
    }

    async fn update_metadata(
        &self,
        metadata: &ManagedIndexMetaData,
        expected: Option<DocVersion>,
    ) -> StorageResult<UpdateOutcome> {
        self.mark_exists();
        let version = self.next_version();
        // The shard lock is held from the version check through the write
        match (self.metadata.entry(metadata.index_uuid.clone()), expected) {
            (Entry::Occupied(mut entry), Some(expected)) if entry.get().version == expected => {
                entry.insert(Versioned::new(metadata.clone(), version));
                Ok(UpdateOutcome::Updated(version))
            }
            (Entry::Occupied(_), _) => Ok(UpdateOutcome::VersionConflict),
            (Entry::Vacant(entry), None) => {
                entry.insert(Versioned::new(metadata.clone(), version));
                Ok(UpdateOutcome::Updated(version))
            }
            (Entry::Vacant(_), Some(_)) => Ok(UpdateOutcome::NotFound),
        }
    }

    async fn bulk(&self, requests: &[DocWriteRequest]) -> StorageResult<BulkResponse> {
        self.record_bulk_call(requests);

        let items = requests
            .iter()
            .map(|request| {
                let status = self
                    .take_injected_failure(request.index_uuid())
                    .unwrap_or_else(|| self.apply(request));
                BulkItemResponse {
                    index_uuid: request.index_uuid().to_string(),
                    status,
                }
            })
            .collect();
        Ok(BulkResponse { items })
    }
}
