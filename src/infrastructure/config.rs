//! Hierarchical configuration loading: compiled defaults, `constellation.yaml`,
//! then `CONSTELLATION_*` environment variables, each layer overriding the
//! last.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::models::CoordinatorConfig;

use super::logging::LogConfig;

/// Top-level process configuration: the coordinator's tunables plus logging.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub coordinator: CoordinatorConfig,
    pub logging: LogConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): compiled defaults, `constellation.yaml`
    /// in the working directory, `CONSTELLATION_*` environment variables.
    pub fn load() -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file("constellation.yaml"))
            .merge(Env::prefixed("CONSTELLATION_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        config.coordinator.validate().context("invalid coordinator configuration")?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        config.coordinator.validate().context("invalid coordinator configuration")?;
        Ok(config)
    }
}
