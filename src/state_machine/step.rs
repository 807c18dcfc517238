//! # Step
//!
//! The smallest unit of lifecycle work. A step runs against the cluster, records its
//! outcome internally, and then describes how the managed index metadata should look
//! afterwards. It never writes metadata itself; the runner persists what
//! [`Step::updated_metadata`] returns.
//!
//! ## Idempotency contract
//!
//! The runner records a step as `Starting` before executing it. If the next tick
//! finds that record still in place, the previous run died mid-step. Only steps that
//! report [`Step::is_idempotent`] may be re-executed in that situation; all others
//! fail the index so an operator can decide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::info;

use super::states::StepStatus;
use crate::error::ClientError;
use crate::models::metadata::{info_message, info_with_cause};
use crate::models::{ActionProperties, InfoMap, ManagedIndexMetaData, StepMetaData};
use crate::storage::{ClusterService, IndexAdminClient};

/// Everything a step may look at while executing
pub struct StepContext<'a> {
    pub index: &'a str,
    pub index_uuid: &'a str,
    /// Metadata as persisted by the starting write of this tick
    pub metadata: &'a ManagedIndexMetaData,
    pub client: &'a dyn IndexAdminClient,
    pub cluster: &'a dyn ClusterService,
    pub now: DateTime<Utc>,
}

impl StepContext<'_> {
    pub fn step_start_time(&self, step_name: &str) -> DateTime<Utc> {
        step_start_time(self.metadata, step_name, self.now)
    }

    pub fn action_properties(&self) -> ActionProperties {
        self.metadata
            .action_meta_data
            .as_ref()
            .and_then(|action| action.action_properties.clone())
            .unwrap_or_default()
    }
}

/// Start time of `step_name` for this tick.
///
/// A step that is re-entered (same name, not yet completed) keeps its original start
/// time so that duration-based conditions measure the whole wait; anything else
/// starts now.
pub fn step_start_time(
    previous: &ManagedIndexMetaData,
    step_name: &str,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match &previous.step_meta_data {
        Some(step) if step.name == step_name && step.step_status != StepStatus::Completed => {
            step.start_time
        }
        _ => now,
    }
}

/// Status and diagnostic info recorded by a step execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub info: InfoMap,
}

impl Default for StepOutcome {
    fn default() -> Self {
        Self {
            status: StepStatus::Starting,
            info: InfoMap::new(),
        }
    }
}

impl StepOutcome {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Completed,
            info: info_message(message),
        }
    }

    pub fn condition_not_met(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::ConditionNotMet,
            info: info_message(message),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            info: info_message(message),
        }
    }

    /// Failure whose cause is the root of a possibly nested remote error
    pub fn failed_with_cause(message: impl Into<String>, error: &ClientError) -> Self {
        Self {
            status: StepStatus::Failed,
            info: info_with_cause(message, error.root_cause().to_string()),
        }
    }

    pub fn with_info(mut self, key: &str, value: serde_json::Value) -> Self {
        self.info.insert(key.to_string(), value);
        self
    }

    /// Metadata after this outcome: step record replaced, pending transition
    /// consumed, info overwritten
    pub fn apply(
        &self,
        step_name: &str,
        current: &ManagedIndexMetaData,
        ctx: &StepContext<'_>,
    ) -> ManagedIndexMetaData {
        let mut updated = current.clone();
        updated.step_meta_data = Some(StepMetaData {
            name: step_name.to_string(),
            start_time: ctx.step_start_time(step_name),
            step_status: self.status,
        });
        updated.transition_to = None;
        updated.info = self.info.clone();
        updated
    }
}

/// Writes `properties` into the action metadata of `metadata`
pub(crate) fn with_action_properties(
    mut metadata: ManagedIndexMetaData,
    update: impl FnOnce(&mut ActionProperties),
) -> ManagedIndexMetaData {
    if let Some(action) = metadata.action_meta_data.as_mut() {
        let mut properties = action.action_properties.clone().unwrap_or_default();
        update(&mut properties);
        action.action_properties = Some(properties);
    }
    metadata
}

#[async_trait]
pub trait Step: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Safe to execute again after a run that died between the starting write and
    /// the completed write
    fn is_idempotent(&self) -> bool;

    /// Safe to stop at this step when lifecycle management is disabled
    fn is_safe_to_disable_on(&self) -> bool {
        true
    }

    /// Performs the step and records its outcome
    async fn execute(&mut self, ctx: &StepContext<'_>);

    fn outcome(&self) -> &StepOutcome;

    /// Metadata to persist after [`Step::execute`]. Pure.
    fn updated_metadata(
        &self,
        current: &ManagedIndexMetaData,
        ctx: &StepContext<'_>,
    ) -> ManagedIndexMetaData {
        self.outcome().apply(self.name(), current, ctx)
    }

    fn status(&self) -> StepStatus {
        self.outcome().status
    }

    fn starting_step_meta_data(&self, ctx: &StepContext<'_>) -> StepMetaData {
        StepMetaData {
            name: self.name().to_string(),
            start_time: ctx.step_start_time(self.name()),
            step_status: StepStatus::Starting,
        }
    }
}

pub fn pre_execute(step: &dyn Step, ctx: &StepContext<'_>) {
    info!(
        step = %step.name(),
        index = %ctx.index,
        "▶️ STEP: Executing {} for {}",
        step.name(),
        ctx.index
    );
}

pub fn post_execute(step: &dyn Step, ctx: &StepContext<'_>) {
    info!(
        step = %step.name(),
        index = %ctx.index,
        status = %step.status(),
        "⏹️ STEP: Finished executing {} for {}",
        step.name(),
        ctx.index
    );
}
