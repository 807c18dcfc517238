// Step engine for managed index lifecycles
//
// A policy state lists actions; an action is an ordered list of steps; a step is one
// unit of work against the cluster with a persisted status. Step selection is a pure
// function of the recorded step metadata, which is what makes a crashed run resumable.

pub mod action;
pub mod states;
pub mod step;
pub mod steps;

// Re-export main types for convenient access
pub use action::{select_step_index, Action};
pub use states::StepStatus;
pub use step::{step_start_time, Step, StepContext, StepOutcome};
