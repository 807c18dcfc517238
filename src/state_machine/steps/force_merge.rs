//! Force merge: request the merge, then wait for every primary shard to reach the
//! target segment count. Neither step is safe to stop on, since an abandoned merge
//! leaves the index write-blocked.

use async_trait::async_trait;
use chrono::Duration;

use crate::constants::defaults::FORCE_MERGE_TIMEOUT_HOURS;
use crate::models::ManagedIndexMetaData;
use crate::state_machine::step::{with_action_properties, Step, StepContext, StepOutcome};

#[derive(Debug)]
pub struct AttemptCallForceMergeStep {
    max_num_segments: u32,
    outcome: StepOutcome,
}

impl AttemptCallForceMergeStep {
    pub fn new(max_num_segments: u32) -> Self {
        Self {
            max_num_segments,
            outcome: StepOutcome::default(),
        }
    }
}

#[async_trait]
impl Step for AttemptCallForceMergeStep {
    fn name(&self) -> &str {
        "attempt_call_force_merge"
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    fn is_safe_to_disable_on(&self) -> bool {
        false
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        self.outcome = match ctx.client.force_merge(ctx.index, self.max_num_segments).await {
            Ok(()) => StepOutcome::completed(format!(
                "Successfully started force merge [index={}]",
                ctx.index
            )),
            Err(e) => StepOutcome::failed_with_cause(
                format!("Failed to start force merge [index={}]", ctx.index),
                &e,
            ),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    fn updated_metadata(&self, current: &ManagedIndexMetaData, ctx: &StepContext<'_>) -> ManagedIndexMetaData {
        let max_num_segments = self.max_num_segments;
        with_action_properties(self.outcome.apply(self.name(), current, ctx), |properties| {
            properties.max_num_segments = Some(max_num_segments);
        })
    }
}

#[derive(Debug, Default)]
pub struct WaitForForceMergeStep {
    outcome: StepOutcome,
}

impl WaitForForceMergeStep {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for WaitForForceMergeStep {
    fn name(&self) -> &str {
        "wait_for_force_merge"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn is_safe_to_disable_on(&self) -> bool {
        false
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let Some(max_num_segments) = ctx.action_properties().max_num_segments else {
            self.outcome = StepOutcome::failed(format!(
                "Unable to retrieve [max_num_segments] from ActionProperties [index={}]",
                ctx.index
            ));
            return;
        };

        let segments = match ctx.client.max_shard_segment_count(ctx.index).await {
            Ok(segments) => segments,
            Err(e) => {
                self.outcome = StepOutcome::failed_with_cause(
                    format!("Failed to check segment counts [index={}]", ctx.index),
                    &e,
                );
                return;
            }
        };

        if segments <= max_num_segments {
            self.outcome = StepOutcome::completed(format!(
                "Successfully confirmed segments force merged [index={}]",
                ctx.index
            ));
            return;
        }

        let waited = ctx.now.signed_duration_since(ctx.step_start_time(self.name()));
        self.outcome = if waited > Duration::hours(FORCE_MERGE_TIMEOUT_HOURS) {
            StepOutcome::failed(format!(
                "Force merge timed out [index={}]",
                ctx.index
            ))
        } else {
            StepOutcome::condition_not_met(format!(
                "Waiting for force merge to complete [index={}]",
                ctx.index
            ))
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }
}
