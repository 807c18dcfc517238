use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the most recent step execution, persisted in step metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Recorded before a step executes; seeing it on the next tick means the
    /// previous run stopped mid-step
    Starting,
    /// The step ran but has to be evaluated again on a later tick
    ConditionNotMet,
    /// The step failed; diagnostic info is in the metadata
    Failed,
    /// The step finished its work
    Completed,
}

impl StepStatus {
    /// Check if the step reached an outcome on its last run
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Starting)
    }

    /// Check if the next tick moves on to the following step
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::ConditionNotMet => write!(f, "condition_not_met"),
            Self::Failed => write!(f, "failed"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "condition_not_met" => Ok(Self::ConditionNotMet),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}
