//! Rollover of the index's write alias once any configured condition is met.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::models::ManagedIndexMetaData;
use crate::state_machine::step::{Step, StepContext, StepOutcome};

#[derive(Debug)]
pub struct AttemptRolloverStep {
    min_size: Option<u64>,
    min_doc_count: Option<u64>,
    min_index_age: Option<Duration>,
    outcome: StepOutcome,
    rolled_over: bool,
}

impl AttemptRolloverStep {
    pub fn new(min_size: Option<u64>, min_doc_count: Option<u64>, min_index_age: Option<Duration>) -> Self {
        Self {
            min_size,
            min_doc_count,
            min_index_age,
            outcome: StepOutcome::default(),
            rolled_over: false,
        }
    }

    fn has_conditions(&self) -> bool {
        self.min_size.is_some() || self.min_doc_count.is_some() || self.min_index_age.is_some()
    }

    fn needs_stats(&self) -> bool {
        self.min_size.is_some() || self.min_doc_count.is_some()
    }

    /// Returns whether any condition is met, plus the evaluated values for operators
    async fn evaluate_conditions(&self, ctx: &StepContext<'_>) -> Result<(bool, serde_json::Value), StepOutcome> {
        let failed = || format!("Failed to evaluate conditions for rollover [index={}]", ctx.index);

        let metadata = ctx
            .cluster
            .index_metadata(ctx.index)
            .ok_or_else(|| StepOutcome::failed(failed()))?;
        let stats = if self.needs_stats() {
            Some(
                ctx.client
                    .index_stats(ctx.index)
                    .await
                    .map_err(|e| StepOutcome::failed_with_cause(failed(), &e))?,
            )
        } else {
            None
        };

        let mut met = false;
        let mut conditions = serde_json::Map::new();

        if let Some(min_age) = self.min_index_age {
            let age = ctx
                .now
                .signed_duration_since(metadata.creation_date)
                .to_std()
                .unwrap_or_default();
            met |= age >= min_age;
            conditions.insert(
                "min_index_age".to_string(),
                json!({ "condition": min_age.as_millis() as u64, "current": age.as_millis() as u64 }),
            );
        }
        if let (Some(min_docs), Some(stats)) = (self.min_doc_count, stats) {
            met |= stats.doc_count >= min_docs;
            conditions.insert(
                "min_doc_count".to_string(),
                json!({ "condition": min_docs, "current": stats.doc_count }),
            );
        }
        if let (Some(min_size), Some(stats)) = (self.min_size, stats) {
            met |= stats.size_bytes >= min_size;
            conditions.insert(
                "min_size".to_string(),
                json!({ "condition": min_size, "current": stats.size_bytes }),
            );
        }

        Ok((met, serde_json::Value::Object(conditions)))
    }
}

#[async_trait]
impl Step for AttemptRolloverStep {
    fn name(&self) -> &str {
        "attempt_rollover"
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        if ctx.metadata.rolled_over == Some(true) {
            self.rolled_over = true;
            self.outcome = StepOutcome::completed(format!(
                "Index has already been rolled over [index={}]",
                ctx.index
            ));
            return;
        }

        let alias = ctx
            .cluster
            .index_metadata(ctx.index)
            .and_then(|metadata| metadata.rollover_alias);
        let Some(alias) = alias else {
            self.outcome = StepOutcome::failed(format!(
                "There is no valid rollover_alias=null set on {}",
                ctx.index
            ));
            return;
        };

        if self.has_conditions() {
            match self.evaluate_conditions(ctx).await {
                Err(outcome) => {
                    self.outcome = outcome;
                    return;
                }
                Ok((false, conditions)) => {
                    self.outcome = StepOutcome::condition_not_met(format!(
                        "Pending rollover of index [index={}]",
                        ctx.index
                    ))
                    .with_info("conditions", conditions);
                    return;
                }
                Ok((true, _)) => {}
            }
        }

        let failed = format!("Failed to rollover index [index={}]", ctx.index);
        self.outcome = match ctx.client.rollover(&alias).await {
            Ok(response) if response.rolled_over => {
                self.rolled_over = true;
                let outcome = StepOutcome::completed(format!(
                    "Successfully rolled over index [index={}]",
                    ctx.index
                ));
                match response.new_index {
                    Some(new_index) => outcome.with_info("new_index", json!(new_index)),
                    None => outcome,
                }
            }
            Ok(_) => StepOutcome::failed(failed),
            Err(e) => StepOutcome::failed_with_cause(failed, &e),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    fn updated_metadata(&self, current: &ManagedIndexMetaData, ctx: &StepContext<'_>) -> ManagedIndexMetaData {
        let mut updated = self.outcome.apply(self.name(), current, ctx);
        if self.rolled_over {
            updated.rolled_over = Some(true);
        }
        updated
    }
}
