//! # Data Models
//!
//! Documents persisted in the config index (policies, managed index job configs,
//! per-index metadata) and the cluster view the engine reconciles against.

pub mod action_config;
pub mod index;
pub mod ism_template;
pub mod managed_index_config;
pub mod metadata;
pub mod policy;
pub mod versioned;

pub use action_config::{ActionConfig, ActionKind, ActionRetry, ActionType, IsmRollup, RetryBackoff};
pub use index::{ClusterChangedEvent, DeletedIndex, IndexMetadata, IndexState, IndexStats};
pub use ism_template::{find_matching_policy, IsmTemplate};
pub use managed_index_config::{ChangePolicy, JobSchedule, ManagedIndexConfig};
pub use metadata::{
    ActionMetaData, ActionProperties, InfoMap, ManagedIndexMetaData, PolicyRetryInfoMetaData,
    StateMetaData, StepMetaData,
};
pub use policy::{Conditions, CronExpression, IndexFacts, Policy, State, Transition};
pub use versioned::{DocVersion, Versioned};
