use async_trait::async_trait;

use crate::error::ClientError;
use crate::state_machine::step::{Step, StepContext, StepOutcome};

pub const ATTEMPT_DELETE: &str = "attempt_delete";

/// Deletes the managed index. A completed delete is terminal: the runner skips the
/// final metadata write and the coordinator cleans up the job.
#[derive(Debug, Default)]
pub struct AttemptDeleteStep {
    outcome: StepOutcome,
}

impl AttemptDeleteStep {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for AttemptDeleteStep {
    fn name(&self) -> &str {
        ATTEMPT_DELETE
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        let failed = format!("Failed to delete index [index={}]", ctx.index);
        self.outcome = match ctx.client.delete_index(ctx.index).await {
            Ok(true) => StepOutcome::completed(format!("Deleted index [index={}]", ctx.index)),
            Ok(false) => StepOutcome::failed(failed),
            // A retried delete finds the index already gone
            Err(ClientError::IndexNotFound { .. }) => {
                StepOutcome::completed(format!("Deleted index [index={}]", ctx.index))
            }
            Err(e) => StepOutcome::failed_with_cause(failed, &e),
        };
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }
}
