//! Bulk writes of job and metadata documents with throttling-aware retry.

use tracing::{error, warn};

use crate::error::StorageResult;
use crate::logging::log_coordinator_operation;
use crate::orchestration::backoff::ConstantBackoff;
use crate::storage::{BulkItemResponse, BulkItemStatus, ConfigIndexClient, DocWriteRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub attempts: u32,
    pub succeeded: usize,
    /// Items that failed permanently, or were still throttled after the last retry
    pub failed: Vec<BulkItemResponse>,
    /// The config index could not be made ready; nothing was sent
    pub abandoned: bool,
}

/// Sends `requests` in one bulk call, then resubmits only the throttled items on a
/// constant backoff. Other item failures are logged and dropped.
///
/// When the batch creates jobs the config index is ensured first; if that fails the
/// whole batch is abandoned.
pub async fn update_managed_indices(
    client: &dyn ConfigIndexClient,
    requests: Vec<DocWriteRequest>,
    has_create: bool,
    backoff: ConstantBackoff,
) -> StorageResult<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    if requests.is_empty() {
        return Ok(outcome);
    }

    if has_create && !client.ensure_config_index().await? {
        error!(requests = requests.len(), "❌ BULK: Config index is not ready, abandoning batch");
        outcome.abandoned = true;
        return Ok(outcome);
    }

    let mut pending = requests;
    let mut delays = backoff.delays();
    loop {
        outcome.attempts += 1;
        let response = client.bulk(&pending).await?;

        let mut throttled = Vec::new();
        let mut throttled_items = Vec::new();
        for (request, item) in pending.into_iter().zip(response.items) {
            match &item.status {
                BulkItemStatus::Ok => outcome.succeeded += 1,
                BulkItemStatus::RetryableFailure { .. } => {
                    throttled.push(request);
                    throttled_items.push(item);
                }
                BulkItemStatus::PermanentFailure { reason } => {
                    warn!(
                        index_uuid = %item.index_uuid,
                        operation = request.operation(),
                        reason = %reason,
                        "⚠️ BULK: Item failed"
                    );
                    outcome.failed.push(item);
                }
            }
        }

        if throttled.is_empty() {
            break;
        }
        match delays.next() {
            Some(delay) => {
                warn!(
                    throttled = throttled.len(),
                    delay_ms = delay.as_millis() as u64,
                    "⏳ BULK: Retrying throttled items"
                );
                tokio::time::sleep(delay).await;
                pending = throttled;
            }
            None => {
                error!(throttled = throttled.len(), "❌ BULK: Retries exhausted for throttled items");
                outcome.failed.extend(throttled_items);
                break;
            }
        }
    }

    log_coordinator_operation(
        "bulk_update",
        if outcome.failed.is_empty() { "success" } else { "partial" },
        outcome.succeeded,
        None,
        Some(&format!("attempts={} failed={}", outcome.attempts, outcome.failed.len())),
    );
    Ok(outcome)
}
