//! # Storage and Cluster Seams
//!
//! The engine talks to the outside world through three narrow traits:
//!
//! - [`ConfigIndexClient`]: job, metadata and policy documents in the config index
//! - [`ClusterService`]: leadership and the live index inventory
//! - [`IndexAdminClient`]: the index operations performed by steps
//!
//! Every read of a versioned document returns its [`DocVersion`](crate::models::DocVersion)
//! and every conditional write reports a conflict as a value, never as an error.
//! In-memory implementations live in [`memory`] and [`simulated`].

pub mod cluster;
pub mod config_index;
pub mod memory;
pub mod simulated;

pub use cluster::{
    ClusterService, IndexAdminClient, RolloverResponse, RollupMetadata, RollupStatus,
    SettingsUpdate, SnapshotState,
};
pub use config_index::{
    BulkItemResponse, BulkItemStatus, BulkResponse, ConfigIndexClient, DocWriteRequest,
    UpdateOutcome,
};
pub use memory::InMemoryConfigIndex;
pub use simulated::SimulatedCluster;
