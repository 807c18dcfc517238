use async_trait::async_trait;

use crate::models::{IndexFacts, ManagedIndexMetaData, Transition};
use crate::state_machine::step::{Step, StepContext, StepOutcome};

/// Evaluates the state's transitions in order. The first one whose condition holds
/// wins; a state without transitions completes the policy.
#[derive(Debug)]
pub struct AttemptTransitionStep {
    transitions: Vec<Transition>,
    outcome: StepOutcome,
    state_name: Option<String>,
    policy_completed: bool,
}

impl AttemptTransitionStep {
    pub fn new(transitions: Vec<Transition>) -> Self {
        Self {
            transitions,
            outcome: StepOutcome::default(),
            state_name: None,
            policy_completed: false,
        }
    }

    async fn index_facts(&self, ctx: &StepContext<'_>) -> Result<IndexFacts, StepOutcome> {
        let failed = || format!("Failed to transition index [index={}]", ctx.index);

        let metadata = ctx
            .cluster
            .index_metadata(ctx.index)
            .ok_or_else(|| StepOutcome::failed(failed()))?;

        let stats = if self.transitions.iter().any(Transition::needs_stats) {
            Some(
                ctx.client
                    .index_stats(ctx.index)
                    .await
                    .map_err(|e| StepOutcome::failed_with_cause(failed(), &e))?,
            )
        } else {
            None
        };

        Ok(IndexFacts {
            creation_date: metadata.creation_date,
            doc_count: stats.map(|s| s.doc_count),
            size_bytes: stats.map(|s| s.size_bytes),
        })
    }
}

#[async_trait]
impl Step for AttemptTransitionStep {
    fn name(&self) -> &str {
        "attempt_transition"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    async fn execute(&mut self, ctx: &StepContext<'_>) {
        if self.transitions.is_empty() {
            self.policy_completed = true;
            self.outcome = StepOutcome::completed(format!("Policy completed [index={}]", ctx.index));
            return;
        }

        let facts = match self.index_facts(ctx).await {
            Ok(facts) => facts,
            Err(outcome) => {
                self.outcome = outcome;
                return;
            }
        };

        let step_start = ctx.step_start_time(self.name());
        let next = self
            .transitions
            .iter()
            .find(|transition| transition.evaluate(&facts, step_start, ctx.now))
            .map(|transition| transition.state_name.clone());

        self.outcome = match &next {
            Some(state) => StepOutcome::completed(format!(
                "Transitioning to {state} [index={}]",
                ctx.index
            )),
            None => StepOutcome::condition_not_met(format!(
                "Evaluating transition conditions [index={}]",
                ctx.index
            )),
        };
        self.state_name = next;
    }

    fn outcome(&self) -> &StepOutcome {
        &self.outcome
    }

    fn updated_metadata(&self, current: &ManagedIndexMetaData, ctx: &StepContext<'_>) -> ManagedIndexMetaData {
        let mut updated = self.outcome.apply(self.name(), current, ctx);
        updated.transition_to = self.state_name.clone();
        if self.policy_completed {
            updated.policy_completed = Some(true);
        }
        updated
    }
}
