//! Diffing between the live index inventory and the job documents.
//!
//! Every function is pure; the coordinator fetches the inputs and issues the
//! resulting writes.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::models::{find_matching_policy, IndexMetadata, IsmTemplate, ManagedIndexConfig};
use crate::storage::DocWriteRequest;

/// Job creations for every index that matches a template
pub fn create_requests<'a>(
    indices: impl IntoIterator<Item = &'a IndexMetadata>,
    templates: &HashMap<String, Vec<IsmTemplate>>,
    job_interval_minutes: u64,
    now: DateTime<Utc>,
) -> Vec<DocWriteRequest> {
    indices
        .into_iter()
        .filter_map(|index| {
            let policy_id = find_matching_policy(templates, index)?;
            info!(index = %index.name, policy_id = %policy_id, "📌 SWEEP: Index will be managed by policy");
            Some(DocWriteRequest::CreateManagedIndex(ManagedIndexConfig::new(
                &index.name,
                &index.uuid,
                policy_id,
                job_interval_minutes,
                now,
            )))
        })
        .collect()
}

/// Indices that exist but have no job
pub fn unmanaged_indices<'a>(
    indices: &'a [IndexMetadata],
    managed_uuids: &HashSet<String>,
) -> Vec<&'a IndexMetadata> {
    let mut seen = HashSet::new();
    indices
        .iter()
        .filter(|index| !managed_uuids.contains(&index.uuid))
        .filter(|index| seen.insert(index.uuid.as_str()))
        .collect()
}

/// Jobs whose index no longer exists, sorted
pub fn removed_job_uuids(managed_uuids: &HashSet<String>, live_uuids: &HashSet<String>) -> Vec<String> {
    let mut removed: Vec<String> = managed_uuids.difference(live_uuids).cloned().collect();
    removed.sort();
    removed
}

pub fn delete_job_requests(uuids: &[String]) -> Vec<DocWriteRequest> {
    uuids
        .iter()
        .map(|uuid| DocWriteRequest::DeleteManagedIndex {
            index_uuid: uuid.clone(),
        })
        .collect()
}

pub fn delete_metadata_requests<'a>(uuids: impl IntoIterator<Item = &'a String>) -> Vec<DocWriteRequest> {
    let mut uuids: Vec<&String> = uuids.into_iter().collect();
    uuids.sort();
    uuids.dedup();
    uuids
        .into_iter()
        .map(|uuid| DocWriteRequest::DeleteMetadata {
            index_uuid: uuid.clone(),
        })
        .collect()
}
