//! # Orchestration
//!
//! Drives managed indices through their policies.
//!
//! ## Core Components
//!
//! - **ManagedIndexRunner**: executes one tick of one index's policy
//! - **Policy traversal**: pure functions that pick the state, action and step to run
//!   and compute the metadata written around each step
//! - **ManagedIndexCoordinator**: leader-only reconciliation of job documents with
//!   the indices in the cluster
//! - **IsmAdmin**: the operator-facing add, remove, change and retry operations
//! - **Backoff**: retry delay arithmetic shared by actions and the bulk writer

pub mod admin;
pub mod backoff;
pub mod coordinator;
pub mod managed_index_runner;
pub mod policy_traversal;

pub use admin::{ExplainEntry, FailedIndex, IsmAdmin, IsmStatusResponse};
pub use backoff::ConstantBackoff;
pub use coordinator::{CoordinatorStatus, ManagedIndexCoordinator};
pub use managed_index_runner::{JobExecutionContext, ManagedIndexRunner, RunOutcome, SkipReason};
