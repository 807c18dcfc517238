//! # Action
//!
//! An action is the ordered list of steps built from an [`ActionConfig`], plus the
//! pure selection function that picks which step a tick should run.

use chrono::{DateTime, Utc};

use super::states::StepStatus;
use super::step::Step;
use super::steps::build_steps;
use crate::models::{ActionConfig, ActionMetaData, ActionType, StepMetaData};
use crate::orchestration::backoff;

/// Index of the step to run given the recorded step.
///
/// - nothing recorded: the first step
/// - recorded step completed: the step after it, or the first step when it was the
///   last one or belongs to another action
/// - otherwise: the recorded step again, or the last step when it is unknown
///
/// Total and deterministic; `step_names` must not be empty.
pub fn select_step_index(step_names: &[&str], recorded: Option<(&str, StepStatus)>) -> usize {
    let Some((name, status)) = recorded else {
        return 0;
    };
    let position = step_names.iter().position(|step| *step == name);

    if status == StepStatus::Completed {
        match position {
            Some(i) if i + 1 < step_names.len() => i + 1,
            _ => 0,
        }
    } else {
        position.unwrap_or(step_names.len().saturating_sub(1))
    }
}

#[derive(Debug)]
pub struct Action {
    config: ActionConfig,
    steps: Vec<Box<dyn Step>>,
}

impl Action {
    pub fn from_config(config: ActionConfig) -> Self {
        let steps = build_steps(&config.kind);
        Self { config, steps }
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    pub fn action_type(&self) -> ActionType {
        self.config.action_type()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn step_index_to_execute(&self, recorded: Option<&StepMetaData>) -> usize {
        select_step_index(
            &self.step_names(),
            recorded.map(|step| (step.name.as_str(), step.step_status)),
        )
    }

    pub fn step(&self, index: usize) -> Option<&dyn Step> {
        self.steps.get(index).map(|step| &**step)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Box<dyn Step>> {
        self.steps.get_mut(index)
    }

    pub fn is_first_step(&self, step_name: &str) -> bool {
        self.steps.first().is_some_and(|step| step.name() == step_name)
    }

    pub fn is_last_step(&self, step_name: &str) -> bool {
        self.steps.last().is_some_and(|step| step.name() == step_name)
    }

    /// Timeouts measure from the action start; a cleared start time never times out
    pub fn has_timed_out(&self, action: Option<&ActionMetaData>, now: DateTime<Utc>) -> bool {
        let (Some(timeout), Some(start)) = (
            self.config.timeout,
            action.and_then(|action| action.start_time),
        ) else {
            return false;
        };
        now.signed_duration_since(start)
            .to_std()
            .is_ok_and(|elapsed| elapsed > timeout)
    }

    /// Whether the action is inside the wait window of its retry policy
    pub fn should_backoff(&self, action: Option<&ActionMetaData>, now: DateTime<Utc>) -> bool {
        backoff::should_backoff(&self.config.retry, action, now)
    }
}
