//! # Policy Model
//!
//! A policy is a named, versioned, declarative state machine. Each state lists the
//! actions to run in order and the transitions to evaluate once every action is done.
//!
//! Transition conditions are an enum, so "exactly one condition" holds by
//! construction. Deserialization funnels through [`Conditions::try_new`], which
//! rejects documents naming zero or several conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use super::action_config::ActionConfig;
use super::ism_template::IsmTemplate;
use crate::error::PolicyValidationError;

fn default_schema_version() -> i64 {
    1
}

/// A lifecycle policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub default_state: String,
    pub states: Vec<State>,
    /// Stored and returned by explain; delivery is handled outside this crate
    #[serde(default)]
    pub error_notification: Option<serde_json::Value>,
    #[serde(default)]
    pub ism_template: Vec<IsmTemplate>,
    #[serde(default = "default_schema_version")]
    pub schema_version: i64,
    pub last_updated_time: DateTime<Utc>,
}

impl Policy {
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Structural validation performed before a policy is stored
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        if self.states.is_empty() {
            return Err(PolicyValidationError::NoStates);
        }

        let mut names = HashSet::new();
        for state in &self.states {
            if !names.insert(state.name.as_str()) {
                return Err(PolicyValidationError::DuplicateState {
                    state: state.name.clone(),
                });
            }
        }

        if !names.contains(self.default_state.as_str()) {
            return Err(PolicyValidationError::MissingDefaultState {
                state: self.default_state.clone(),
            });
        }

        for state in &self.states {
            for (position, action) in state.actions.iter().enumerate() {
                if action.index != position {
                    return Err(PolicyValidationError::ActionIndexMismatch {
                        state: state.name.clone(),
                        position,
                        declared: action.index,
                    });
                }
            }
            for transition in &state.transitions {
                if !names.contains(transition.state_name.as_str()) {
                    return Err(PolicyValidationError::UnknownTransitionTarget {
                        state: state.name.clone(),
                        target: transition.state_name.clone(),
                    });
                }
            }
        }

        for template in &self.ism_template {
            if template.priority < 0 {
                return Err(PolicyValidationError::NegativeTemplatePriority {
                    priority: template.priority,
                });
            }
        }

        Ok(())
    }
}

/// A named phase of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// Edge to another state, guarded by optional conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state_name: String,
    #[serde(default)]
    pub conditions: Option<Conditions>,
}

/// Facts about an index used to evaluate transition and rollover conditions.
/// Stats are only collected when some condition needs them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexFacts {
    pub creation_date: DateTime<Utc>,
    pub doc_count: Option<u64>,
    pub size_bytes: Option<u64>,
}

impl Transition {
    pub fn unconditional(state_name: impl Into<String>) -> Self {
        Self {
            state_name: state_name.into(),
            conditions: None,
        }
    }

    pub fn needs_stats(&self) -> bool {
        self.conditions.as_ref().is_some_and(Conditions::needs_stats)
    }

    /// `step_start_time` anchors cron conditions to when transition evaluation began
    pub fn evaluate(
        &self,
        facts: &IndexFacts,
        step_start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        match &self.conditions {
            None => true,
            Some(conditions) => conditions.is_met(facts, step_start_time, now),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawConditions {
    #[serde(default, with = "crate::utils::serde::option_duration_millis")]
    min_index_age: Option<Duration>,
    #[serde(default)]
    min_doc_count: Option<i64>,
    #[serde(default)]
    min_size: Option<i64>,
    #[serde(default)]
    cron: Option<String>,
}

/// Exactly one transition condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConditions", into = "RawConditions")]
pub enum Conditions {
    MinIndexAge(Duration),
    MinDocCount(u64),
    /// Primary store size in bytes
    MinSize(u64),
    Cron(CronExpression),
}

impl Conditions {
    /// Builds conditions from optional fields, rejecting zero or several set fields
    /// and non-positive numeric thresholds.
    pub fn try_new(
        min_index_age: Option<Duration>,
        min_doc_count: Option<i64>,
        min_size: Option<i64>,
        cron: Option<String>,
    ) -> Result<Self, PolicyValidationError> {
        let provided = [
            min_index_age.is_some(),
            min_doc_count.is_some(),
            min_size.is_some(),
            cron.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if provided > 1 {
            return Err(PolicyValidationError::MultipleConditions);
        }

        if let Some(age) = min_index_age {
            return Ok(Self::MinIndexAge(age));
        }
        if let Some(count) = min_doc_count {
            return u64::try_from(count)
                .ok()
                .filter(|c| *c > 0)
                .map(Self::MinDocCount)
                .ok_or(PolicyValidationError::NonPositiveDocCount);
        }
        if let Some(size) = min_size {
            return u64::try_from(size)
                .ok()
                .filter(|s| *s > 0)
                .map(Self::MinSize)
                .ok_or(PolicyValidationError::NonPositiveSize);
        }
        if let Some(expression) = cron {
            return CronExpression::new(expression).map(Self::Cron);
        }

        Err(PolicyValidationError::NoCondition)
    }

    pub fn needs_stats(&self) -> bool {
        matches!(self, Self::MinDocCount(_) | Self::MinSize(_))
    }

    pub fn is_met(&self, facts: &IndexFacts, step_start_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::MinIndexAge(age) => {
                let elapsed = now.signed_duration_since(facts.creation_date);
                elapsed
                    .to_std()
                    .map(|elapsed| elapsed >= *age)
                    .unwrap_or(false)
            }
            Self::MinDocCount(count) => facts.doc_count.is_some_and(|docs| docs >= *count),
            Self::MinSize(size) => facts.size_bytes.is_some_and(|bytes| bytes >= *size),
            Self::Cron(cron) => cron
                .next_after(step_start_time)
                .is_some_and(|next| next <= now),
        }
    }
}

impl TryFrom<RawConditions> for Conditions {
    type Error = PolicyValidationError;

    fn try_from(raw: RawConditions) -> Result<Self, Self::Error> {
        Self::try_new(raw.min_index_age, raw.min_doc_count, raw.min_size, raw.cron)
    }
}

impl From<Conditions> for RawConditions {
    fn from(conditions: Conditions) -> Self {
        let mut raw = RawConditions::default();
        match conditions {
            Conditions::MinIndexAge(age) => raw.min_index_age = Some(age),
            Conditions::MinDocCount(count) => raw.min_doc_count = i64::try_from(count).ok(),
            Conditions::MinSize(size) => raw.min_size = i64::try_from(size).ok(),
            Conditions::Cron(cron) => raw.cron = Some(cron.expression),
        }
        raw
    }
}

/// Validated cron expression, evaluated in UTC.
///
/// Five-field unix expressions are accepted and get a leading seconds field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpression {
    expression: String,
}

impl CronExpression {
    pub fn new(expression: impl Into<String>) -> Result<Self, PolicyValidationError> {
        let expression = expression.into();
        Self::parse(&expression)?;
        Ok(Self { expression })
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    fn parse(expression: &str) -> Result<cron::Schedule, PolicyValidationError> {
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };
        cron::Schedule::from_str(&normalized).map_err(|e| PolicyValidationError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
    }

    /// Next fire time strictly after `from`
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Self::parse(&self.expression)
            .ok()
            .and_then(|schedule| schedule.after(&from).next())
    }
}

impl TryFrom<String> for CronExpression {
    type Error = PolicyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CronExpression> for String {
    fn from(cron: CronExpression) -> Self {
        cron.expression
    }
}
