//! Configuration Loader
//!
//! Environment-aware settings loading: `ism.toml`, then `ism.<environment>.toml`, then
//! `ISM__*` environment variables, later sources overriding earlier ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::IsmSettings;
use crate::error::ConfigResult;

pub struct ConfigManager {
    settings: IsmSettings,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load from a directory with an explicit environment, leaving process env untouched
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading ISM configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let settings = Self::load_settings(&config_directory, environment)?;
        settings.validate()?;

        debug!(
            enabled = settings.enabled,
            job_interval_minutes = settings.job_interval_minutes,
            sweep_period_millis = settings.sweep_period_millis,
            "ISM configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            settings,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn load_settings(config_directory: &Path, environment: &str) -> ConfigResult<IsmSettings> {
        let settings = config::Config::builder()
            .add_source(config::File::from(config_directory.join("ism.toml")).required(false))
            .add_source(
                config::File::from(config_directory.join(format!("ism.{environment}.toml")))
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("ISM")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allow_list"),
            )
            .build()?
            .try_deserialize::<IsmSettings>()?;
        Ok(settings)
    }

    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("ISM_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    pub fn settings(&self) -> &IsmSettings {
        &self.settings
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}
