//! # Policy Traversal
//!
//! Pure functions that locate an index within its policy and build the metadata the
//! runner writes around a step. Nothing here performs I/O; the runner decides when to
//! persist what these functions return.

use chrono::{DateTime, Utc};

use crate::constants::messages;
use crate::models::metadata::info_message;
use crate::models::{
    ActionConfig, ActionMetaData, ActionRetry, ActionType, ChangePolicy, ManagedIndexConfig,
    ManagedIndexMetaData, Policy, State, StateMetaData, StepMetaData, Versioned,
};
use crate::state_machine::step::step_start_time;
use crate::state_machine::{Action, Step, StepContext, StepStatus};

/// The state the next tick works in: a pending transition target wins over the
/// recorded state
pub fn state_to_execute<'p>(policy: &'p Policy, metadata: &ManagedIndexMetaData) -> Option<&'p State> {
    let name = metadata
        .transition_to
        .as_deref()
        .or_else(|| metadata.state_meta_data.as_ref().map(|state| state.name.as_str()))?;
    policy.state(name)
}

fn transition_action(state: &State) -> Action {
    Action::from_config(ActionConfig::transitions(
        state.actions.len(),
        state.transitions.clone(),
    ))
}

fn first_action(state: &State) -> Action {
    state
        .actions
        .first()
        .cloned()
        .map(Action::from_config)
        .unwrap_or_else(|| transition_action(state))
}

fn action_after(state: &State, position: usize) -> Action {
    state
        .actions
        .get(position + 1)
        .cloned()
        .map(Action::from_config)
        .unwrap_or_else(|| transition_action(state))
}

/// The action the next tick works on, or `None` when the recorded action no longer
/// exists in `state`
pub fn action_to_execute(state: &State, metadata: &ManagedIndexMetaData) -> Option<Action> {
    let current = match &metadata.action_meta_data {
        Some(current) if metadata.transition_to.is_none() => current,
        _ => return Some(first_action(state)),
    };

    if current.name == ActionType::Transition.as_str() {
        return Some(transition_action(state));
    }

    let config = state
        .actions
        .iter()
        .find(|config| config.index == current.index && config.action_type().as_str() == current.name)?;
    let action = Action::from_config(config.clone());

    let finished = metadata.step_meta_data.as_ref().is_some_and(|step| {
        step.step_status == StepStatus::Completed && action.is_last_step(&step.name)
    });
    if finished {
        Some(action_after(state, config.index))
    } else {
        Some(action)
    }
}

/// Whether `action` in `state` differs from the action recorded in `metadata`
pub fn is_new_action(state: &State, action: &Action, metadata: &ManagedIndexMetaData) -> bool {
    let same_state = metadata.transition_to.is_none()
        && metadata
            .state_meta_data
            .as_ref()
            .is_some_and(|recorded| recorded.name == state.name);

    match &metadata.action_meta_data {
        Some(current) if same_state => {
            current.index != action.config().index || current.name != action.action_type().as_str()
        }
        _ => true,
    }
}

/// Action metadata for this tick: fresh for a new action, otherwise the recorded one
/// with a cleared start time restored
pub fn updated_action_meta_data(
    state: &State,
    action: &Action,
    metadata: &ManagedIndexMetaData,
    now: DateTime<Utc>,
) -> ActionMetaData {
    match &metadata.action_meta_data {
        Some(current) if !is_new_action(state, action, metadata) => {
            let mut kept = current.clone();
            kept.start_time.get_or_insert(now);
            kept
        }
        _ => ActionMetaData::new(action.action_type().as_str(), action.config().index, now),
    }
}

/// Index of the step to run. A new action always starts at its first step, whatever
/// the recorded step was.
pub fn step_index_to_execute(state: &State, action: &Action, metadata: &ManagedIndexMetaData) -> usize {
    if is_new_action(state, action, metadata) {
        0
    } else {
        action.step_index_to_execute(metadata.step_meta_data.as_ref())
    }
}

/// Metadata written before a step executes. Records the step as `Starting` so a run
/// that dies mid-step is detectable on the next tick.
pub fn starting_meta_data(
    policy: &Policy,
    metadata: &ManagedIndexMetaData,
    state: Option<&State>,
    action: Option<(&Action, &dyn Step)>,
    now: DateTime<Utc>,
) -> ManagedIndexMetaData {
    let Some(state) = state else {
        let name = metadata
            .transition_to
            .as_deref()
            .or_else(|| metadata.state_meta_data.as_ref().map(|s| s.name.as_str()))
            .unwrap_or_default();
        return metadata
            .clone()
            .with_policy_failure(messages::state_not_found(name, &policy.id));
    };
    let Some((action, step)) = action else {
        let name = metadata
            .action_meta_data
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or_default();
        return metadata
            .clone()
            .with_policy_failure(messages::action_not_found(name, &state.name));
    };

    let mut starting = metadata.clone();
    let state_changed = metadata
        .state_meta_data
        .as_ref()
        .map_or(true, |recorded| recorded.name != state.name);
    if state_changed {
        starting.state_meta_data = Some(StateMetaData {
            name: state.name.clone(),
            start_time: now,
        });
    }
    starting.action_meta_data = Some(updated_action_meta_data(state, action, metadata, now));
    starting.step_meta_data = Some(StepMetaData {
        name: step.name().to_string(),
        start_time: step_start_time(metadata, step.name(), now),
        step_status: StepStatus::Starting,
    });
    starting.transition_to = None;
    starting.info = info_message(messages::starting_action(action.action_type().as_str(), step.name()));
    starting
}

/// Metadata written after a step executes. A failed step consumes a retry, or fails
/// the action once its retries are spent.
pub fn completed_meta_data(
    step: &dyn Step,
    retry: &ActionRetry,
    starting: &ManagedIndexMetaData,
    ctx: &StepContext<'_>,
) -> ManagedIndexMetaData {
    let mut completed = step.updated_metadata(starting, ctx);
    if step.status() != StepStatus::Failed {
        return completed;
    }

    if let Some(action) = completed.action_meta_data.as_mut() {
        if action.consumed_retries >= retry.count {
            action.failed = true;
        } else {
            action.consumed_retries += 1;
            action.last_retry_time = Some(ctx.now);
        }
    }
    completed
}

/// Metadata for an index whose action ran past its timeout
pub fn timed_out_meta_data(metadata: &ManagedIndexMetaData, action: ActionMetaData) -> ManagedIndexMetaData {
    let mut timed_out = metadata.clone();
    timed_out.action_meta_data = Some(ActionMetaData { failed: true, ..action });
    timed_out.info = info_message(messages::ACTION_TIMED_OUT);
    timed_out
}

/// Metadata for an index whose next action is not on the allow-list
pub fn disallowed_meta_data(
    metadata: &ManagedIndexMetaData,
    action: ActionMetaData,
    action_type: ActionType,
) -> ManagedIndexMetaData {
    let mut disallowed = metadata.clone();
    disallowed.action_meta_data = Some(ActionMetaData { failed: true, ..action });
    disallowed.info = info_message(messages::action_not_allowed(action_type.as_str()));
    disallowed
}

/// First metadata of an index, bound to the policy version saved in its config
pub fn initial_meta_data(
    config: &ManagedIndexConfig,
    policy: &Versioned<Policy>,
    now: DateTime<Utc>,
) -> ManagedIndexMetaData {
    let requested_state = config
        .change_policy
        .as_ref()
        .filter(|change| change.policy_id == policy.value.id)
        .and_then(|change| change.state.clone());

    let mut metadata = ManagedIndexMetaData::new(&config.index, &config.index_uuid, &policy.value.id);
    metadata.policy_seq_no = Some(policy.version.seq_no);
    metadata.policy_primary_term = Some(policy.version.primary_term);
    metadata.state_meta_data = Some(StateMetaData {
        name: requested_state.unwrap_or_else(|| policy.value.default_state.clone()),
        start_time: now,
    });
    metadata.info = info_message(messages::policy_initialized(&policy.value.id));
    metadata
}

/// Metadata for an index whose policy could not be loaded at initialization
pub fn failed_initialization_meta_data(config: &ManagedIndexConfig) -> ManagedIndexMetaData {
    ManagedIndexMetaData::new(&config.index, &config.index_uuid, &config.policy_id)
        .with_policy_failure(messages::policy_load_failed(&config.policy_id))
}

/// Whether the config and metadata are bound to the same policy version
pub fn policy_version_matches(config: &ManagedIndexConfig, metadata: &ManagedIndexMetaData) -> bool {
    config.policy_version() == metadata.policy_version()
}

/// A policy may only be swapped between states: before any action of the current
/// state started, while a transition is pending, or when transitions are next.
pub fn is_state_boundary(policy: &Policy, metadata: &ManagedIndexMetaData) -> bool {
    if metadata.action_meta_data.is_none() || metadata.transition_to.is_some() {
        return true;
    }
    let Some(state) = state_to_execute(policy, metadata) else {
        return true;
    };
    action_to_execute(state, metadata)
        .is_some_and(|action| action.action_type() == ActionType::Transition)
}

/// Metadata rebound to a new policy. The index re-enters at the requested state, or
/// the new policy's default state.
pub fn change_policy_meta_data(
    metadata: &ManagedIndexMetaData,
    change: &ChangePolicy,
    policy: &Versioned<Policy>,
    now: DateTime<Utc>,
) -> ManagedIndexMetaData {
    let target = change
        .state
        .clone()
        .unwrap_or_else(|| policy.value.default_state.clone());

    let mut changed = metadata.clone();
    changed.policy_id = policy.value.id.clone();
    changed.policy_seq_no = Some(policy.version.seq_no);
    changed.policy_primary_term = Some(policy.version.primary_term);
    changed.policy_completed = Some(false);
    changed.transition_to = Some(target);
    changed.step_meta_data = None;
    if let Some(action) = changed.action_meta_data.as_mut() {
        if action.name == ActionType::Transition.as_str() {
            *action = ActionMetaData::new(ActionType::Transition.as_str(), action.index, now);
        }
    }
    changed.info = info_message(messages::changing_policy(&policy.value.id));
    changed
}
