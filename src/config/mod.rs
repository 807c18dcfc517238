//! # ISM Configuration
//!
//! Cluster-level settings of the lifecycle engine. Settings are loaded once by the
//! [`ConfigManager`] (TOML files plus `ISM__*` environment overrides) and then held in
//! a [`DynamicSettings`] cell, which hands out immutable snapshots and pushes updates to
//! registered listeners.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ism_core::config::{ConfigManager, DynamicSettings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let settings = DynamicSettings::new(manager.settings().clone());
//! let snapshot = settings.snapshot();
//! println!("sweeping every {:?}", snapshot.sweep_period());
//! # Ok(())
//! # }
//! ```

pub mod dynamic;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;
use crate::error::{ConfigResult, ConfigurationError};
use crate::models::ActionType;

pub use dynamic::{DynamicSettings, SettingsListener};
pub use loader::ConfigManager;

/// Engine settings. Every field may be changed at runtime through [`DynamicSettings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsmSettings {
    /// Master switch for lifecycle management
    pub enabled: bool,
    /// Interval at which each managed index job runs
    pub job_interval_minutes: u64,
    /// Period of the full anti-entropy sweep
    pub sweep_period_millis: u64,
    /// Delay between bulk retries of throttled items
    pub coordinator_backoff_millis: u64,
    /// Number of bulk retries of throttled items
    pub coordinator_backoff_count: u32,
    /// Action types the runner may start
    pub allow_list: Vec<ActionType>,
}

impl Default for IsmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            job_interval_minutes: defaults::JOB_INTERVAL_MINUTES,
            sweep_period_millis: defaults::SWEEP_PERIOD_SECONDS * 1000,
            coordinator_backoff_millis: defaults::COORDINATOR_BACKOFF_MILLIS,
            coordinator_backoff_count: defaults::COORDINATOR_BACKOFF_COUNT,
            allow_list: ActionType::ALL.to_vec(),
        }
    }
}

impl IsmSettings {
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_millis)
    }

    pub fn coordinator_backoff_delay(&self) -> Duration {
        Duration::from_millis(self.coordinator_backoff_millis)
    }

    /// The transition pseudo-action is part of every state and cannot be disallowed
    pub fn is_action_allowed(&self, action_type: ActionType) -> bool {
        action_type == ActionType::Transition || self.allow_list.contains(&action_type)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.job_interval_minutes == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "job_interval_minutes".to_string(),
                reason: "job interval must be at least one minute".to_string(),
            });
        }
        if self.sweep_period_millis == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "sweep_period_millis".to_string(),
                reason: "sweep period must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
