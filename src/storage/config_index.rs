//! Config index client: CRUD and search over job, metadata and policy documents.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StorageResult;
use crate::models::{
    DocVersion, IsmTemplate, ManagedIndexConfig, ManagedIndexMetaData, Policy, Versioned,
};

/// Result of a conditional single-document write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(DocVersion),
    /// The document changed since the expected version was read (or already
    /// exists for a create)
    VersionConflict,
    NotFound,
}

impl UpdateOutcome {
    pub fn version(&self) -> Option<DocVersion> {
        match self {
            Self::Updated(version) => Some(*version),
            _ => None,
        }
    }
}

/// One write of a bulk request. Documents are keyed by index uuid.
#[derive(Debug, Clone, PartialEq)]
pub enum DocWriteRequest {
    /// Create-only: an existing job for the same uuid is left untouched
    CreateManagedIndex(ManagedIndexConfig),
    DeleteManagedIndex { index_uuid: String },
    DeleteMetadata { index_uuid: String },
    SetJobEnabled { index_uuid: String, enabled: bool },
}

impl DocWriteRequest {
    pub fn index_uuid(&self) -> &str {
        match self {
            Self::CreateManagedIndex(config) => &config.index_uuid,
            Self::DeleteManagedIndex { index_uuid }
            | Self::DeleteMetadata { index_uuid }
            | Self::SetJobEnabled { index_uuid, .. } => index_uuid,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Self::CreateManagedIndex(_))
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateManagedIndex(_) => "create_managed_index",
            Self::DeleteManagedIndex { .. } => "delete_managed_index",
            Self::DeleteMetadata { .. } => "delete_metadata",
            Self::SetJobEnabled { .. } => "set_job_enabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkItemStatus {
    Ok,
    /// Throttled; the only failure the bulk writer resubmits
    RetryableFailure { reason: String },
    PermanentFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResponse {
    pub index_uuid: String,
    pub status: BulkItemStatus,
}

/// Item responses in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResponse>,
}

impl BulkResponse {
    pub fn has_failures(&self) -> bool {
        self.items
            .iter()
            .any(|item| item.status != BulkItemStatus::Ok)
    }
}

#[async_trait]
pub trait ConfigIndexClient: Send + Sync {
    async fn config_index_exists(&self) -> StorageResult<bool>;

    /// Creates the config index or brings its mappings up to date.
    /// Returns `false` when the index could not be made ready.
    async fn ensure_config_index(&self) -> StorageResult<bool>;

    async fn get_policy(&self, policy_id: &str) -> StorageResult<Option<Versioned<Policy>>>;

    /// Stores a policy; `None` expects the policy not to exist yet
    async fn put_policy(
        &self,
        policy: &Policy,
        expected: Option<DocVersion>,
    ) -> StorageResult<UpdateOutcome>;

    /// ISM templates of every policy that declares any, keyed by policy id
    async fn search_ism_templates(&self) -> StorageResult<HashMap<String, Vec<IsmTemplate>>>;

    async fn get_managed_index_config(
        &self,
        index_uuid: &str,
    ) -> StorageResult<Option<Versioned<ManagedIndexConfig>>>;

    async fn multi_get_managed_index_configs(
        &self,
        index_uuids: &[String],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexConfig>>>;

    /// All job documents, bounded by [`MAX_HITS`](crate::constants::MAX_HITS)
    async fn search_managed_index_configs(&self) -> StorageResult<Vec<Versioned<ManagedIndexConfig>>>;

    async fn update_managed_index_config(
        &self,
        config: &ManagedIndexConfig,
        expected: DocVersion,
    ) -> StorageResult<UpdateOutcome>;

    async fn get_metadata(
        &self,
        index_uuid: &str,
    ) -> StorageResult<Option<Versioned<ManagedIndexMetaData>>>;

    async fn multi_get_metadata(
        &self,
        index_uuids: &[String],
    ) -> StorageResult<HashMap<String, Versioned<ManagedIndexMetaData>>>;

    /// Writes metadata; `None` creates it and conflicts if it already exists
    async fn update_metadata(
        &self,
        metadata: &ManagedIndexMetaData,
        expected: Option<DocVersion>,
    ) -> StorageResult<UpdateOutcome>;

    async fn bulk(&self, requests: &[DocWriteRequest]) -> StorageResult<BulkResponse>;
}
