#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # ISM Core
//!
//! Index state management: drives indices through declarative lifecycle policies.
//!
//! ## Overview
//!
//! A **policy** is a state machine of named states. Each state runs an ordered list
//! of actions (rollover, force merge, snapshot, delete, ...) and then evaluates
//! transitions to other states. Every managed index has a **job** document that a
//! scheduler runs periodically and a **metadata** document that records exactly
//! where the index is in its policy.
//!
//! ## Architecture
//!
//! - The **runner** executes at most one step per tick and persists metadata before
//!   and after it, so a crash is always detected and resumed on the next tick.
//! - The **coordinator** runs on the elected leader only. It creates jobs for new
//!   indices that match a policy's ISM template, deletes jobs of deleted indices and
//!   periodically sweeps the whole cluster to repair drift.
//! - Documents are read with their version and written conditionally; conflicts are
//!   values, not errors.
//!
//! ## Module Organization
//!
//! - [`models`] - policies, job configs, metadata and the cluster view
//! - [`state_machine`] - steps, actions and step selection
//! - [`orchestration`] - runner, coordinator and administration operations
//! - [`storage`] - config index and cluster seams with in-memory implementations
//! - [`config`] - settings loading and the live settings cell
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ism_core::config::{DynamicSettings, IsmSettings};
//! use ism_core::orchestration::{JobExecutionContext, ManagedIndexRunner};
//! use ism_core::storage::{InMemoryConfigIndex, SimulatedCluster};
//!
//! # async fn example() {
//! let store = Arc::new(InMemoryConfigIndex::new());
//! let cluster = Arc::new(SimulatedCluster::new());
//! let settings = Arc::new(DynamicSettings::new(IsmSettings::default()));
//!
//! let runner = ManagedIndexRunner::new(store, cluster.clone(), cluster, settings);
//! let outcome = runner
//!     .run(&JobExecutionContext::new("index-uuid", chrono::Utc::now()))
//!     .await;
//! println!("{outcome:?}");
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod storage;
pub mod utils;

pub use config::{ConfigManager, DynamicSettings, IsmSettings, SettingsListener};
pub use error::{IsmError, Result};
pub use orchestration::{
    IsmAdmin, IsmStatusResponse, JobExecutionContext, ManagedIndexCoordinator, ManagedIndexRunner,
    RunOutcome,
};
pub use state_machine::StepStatus;
