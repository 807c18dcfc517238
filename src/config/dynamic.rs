//! Live settings cell.
//!
//! Readers take an `Arc` snapshot at the start of a unit of work and never observe a
//! half-applied update. Writers replace the whole snapshot and then notify listeners
//! outside the lock.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::info;

use super::IsmSettings;
use crate::error::ConfigResult;

/// Receives settings changes after they have been applied
pub trait SettingsListener: Send + Sync {
    fn on_settings_changed(&self, previous: &IsmSettings, current: &IsmSettings);
}

pub struct DynamicSettings {
    current: RwLock<Arc<IsmSettings>>,
    listeners: RwLock<Vec<Weak<dyn SettingsListener>>>,
}

impl std::fmt::Debug for DynamicSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSettings")
            .field("current", &self.current.read())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl DynamicSettings {
    pub fn new(settings: IsmSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<IsmSettings> {
        Arc::clone(&self.current.read())
    }

    /// Listeners are held weakly; dropped listeners are pruned on the next update
    pub fn subscribe(&self, listener: Weak<dyn SettingsListener>) {
        self.listeners.write().push(listener);
    }

    pub fn update(&self, settings: IsmSettings) -> ConfigResult<()> {
        settings.validate()?;

        let current = Arc::new(settings);
        let previous = {
            let mut guard = self.current.write();
            std::mem::replace(&mut *guard, Arc::clone(&current))
        };

        if *previous == *current {
            return Ok(());
        }

        info!(
            enabled = current.enabled,
            sweep_period_millis = current.sweep_period_millis,
            job_interval_minutes = current.job_interval_minutes,
            "⚙️ SETTINGS: Applied settings update"
        );

        let listeners: Vec<Arc<dyn SettingsListener>> = {
            let mut guard = self.listeners.write();
            guard.retain(|listener| listener.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_settings_changed(&previous, &current);
        }
        Ok(())
    }

    /// Applies a modification to a copy of the current settings
    pub fn update_with(&self, modify: impl FnOnce(&mut IsmSettings)) -> ConfigResult<()> {
        let mut settings = (*self.snapshot()).clone();
        modify(&mut settings);
        self.update(settings)
    }
}
