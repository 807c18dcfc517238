use async_trait::async_trait;

use crate::error::ClientError;
use crate::models::{IsmRollup, ManagedIndexMetaData};
use crate::state_machine::step::{with_action_properties, Step, StepContext, StepOutcome};
use crate::storage::RollupStatus;

/// Creates the rollup job, or restarts it when a previous run of the wait step saw
/// it fail
#[derive(Debug)]
pub struct AttemptCreateRollupJobStep {
    ism_rollup: IsmRollup,
    outcome: StepOutcome,
    rollup_id: Option<String>,
}

impl AttemptCreateRollupJobStep {
    pub fn new(ism_rollup: IsmRollup) -> Self {
        Self {
            ism_rollup,
            outcome: StepOutcome::default(),
            rollup_id: None,
        }
    }

    async fn restart(&self, ctx: &StepContext<'_>, rollup_id: &str) -> StepOutcome {
        let failed = format!("Failed to start the rollup job [{rollup_id}] [index={}]", ctx.index);
        match ctx.client.start_rollup(rollup_id).await {
            Ok(true) => StepOutcome::completed(format!(
                "Successfully restarted the rollup job [{rollup_id}] [index={}]",
                ctx.index
            )),
            Ok(false) => StepOutcome::failed(failed),
            Err(e) => StepOutcome::failed_with_cause(failed, &e),
        }
    }
}

#[async_trait]
impl Step for AttemptCreateRollupJobStep {
    fn name(&self) -> &str {
        "attempt_create_rollup"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let properties = ctx.action_properties();
        let rollup_id = self.ism_rollup.job_id(ctx.index);

        if properties.has_rollup_failed == Some(true) {
            if let Some(previous_id) = properties.rollup_id {
                self.outcome = self.restart(ctx, &previous_id).await;
                self.rollup_id = Some(previous_id);
                return;
            }
        }

        self.outcome = match ctx
            .client
            .create_rollup(&rollup_id, ctx.index, &self.ism_rollup)
            .await
        {
            Ok(()) => StepOutcome::completed(format!(
                "Successfully created the rollup job [{rollup_id}] [index={}]",
                ctx.index
            )),
            Err(ClientError::AlreadyExists { .. }) => StepOutcome::completed(format!(
                "Rollup job [{rollup_id}] already exists, skipping creation [index={}]",
                ctx.index
            )),
            Err(e) => StepOutcome::failed_with_cause(
                format!("Failed to create the rollup job [{rollup_id}] [index={}]", ctx.index),
                &e,
            ),
        };
        self.rollup_id = Some(rollup_id);
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    fn updated_metadata(&self, current: &ManagedIndexMetaData, ctx: &StepContext<'_>) -> ManagedIndexMetaData {
        let rollup_id = self.rollup_id.clone();
        with_action_properties(self.outcome.apply(self.name(), current, ctx), |properties| {
            properties.rollup_id = rollup_id;
            properties.has_rollup_failed = Some(false);
        })
    }
}

#[derive(Debug, Default)]
pub struct WaitForRollupCompletionStep {
    outcome: StepOutcome,
    rollup_failed: bool,
}

impl WaitForRollupCompletionStep {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for WaitForRollupCompletionStep {
    fn name(&self) -> &str {
        "wait_for_rollup_completion"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let Some(rollup_id) = ctx.action_properties().rollup_id else {
            self.outcome = StepOutcome::failed(format!(
                "Missing rollup job id in action properties [index={}]",
                ctx.index
            ));
            return;
        };

        self.outcome = match ctx.client.explain_rollup(&rollup_id).await {
            Ok(Some(metadata)) => match metadata.status {
                RollupStatus::Init | RollupStatus::Started | RollupStatus::Retry => {
                    StepOutcome::condition_not_met(format!(
                        "Rollup job [{rollup_id}] is still processing [index={}]",
                        ctx.index
                    ))
                }
                RollupStatus::Failed => {
                    self.rollup_failed = true;
                    let outcome = StepOutcome::failed(format!(
                        "Rollup job [{rollup_id}] failed [index={}]",
                        ctx.index
                    ));
                    match metadata.failure_reason {
                        Some(reason) => outcome.with_info("cause", serde_json::Value::String(reason)),
                        None => outcome,
                    }
                }
                RollupStatus::Stopped => {
                    self.rollup_failed = true;
                    StepOutcome::failed(format!(
                        "Rollup job was stopped [{rollup_id}] [index={}]",
                        ctx.index
                    ))
                }
                RollupStatus::Finished => StepOutcome::completed(format!(
                    "Rollup job [{rollup_id}] completed [index={}]",
                    ctx.index
                )),
            },
            Ok(None) => StepOutcome::failed(format!(
                "Rollup job was not found [index={}]",
                ctx.index
            )),
            Err(e) => StepOutcome::failed_with_cause(
                format!(
                    "Failed to get the status of rollup job [{rollup_id}] [index={}]",
                    ctx.index
                ),
                &e,
            ),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    fn updated_metadata(&self, current: &ManagedIndexMetaData, ctx: &StepContext<'_>) -> ManagedIndexMetaData {
        let updated = self.outcome.apply(self.name(), current, ctx);
        if self.rollup_failed {
            with_action_properties(updated, |properties| {
                properties.has_rollup_failed = Some(true);
            })
        } else {
            updated
        }
    }
}
