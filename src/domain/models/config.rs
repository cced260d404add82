//! Coordinator configuration.
//!
//! This is the pure data shape; loading it from defaults/file/env lives in
//! `infrastructure::config` so the domain layer stays free of figment.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    RoundRobin,
    CapabilityFirst,
    PreferenceTable,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        Self::CapabilityFirst
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub heartbeat_interval_s: u64,
    pub initial_reconnect_delay_s: u64,
    pub max_reconnect_delay_s: u64,
    pub default_max_retries: u32,
    pub default_task_timeout_s: u64,
    pub max_history_size: usize,
    pub assignment_strategy: AssignmentStrategy,
    pub device_preference_table: HashMap<String, String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: 30,
            initial_reconnect_delay_s: 5,
            max_reconnect_delay_s: 300,
            default_max_retries: 5,
            default_task_timeout_s: 1000,
            max_history_size: 100,
            assignment_strategy: AssignmentStrategy::default(),
            device_preference_table: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Range checks applied after figment merges defaults/file/env.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_s == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval(self.heartbeat_interval_s));
        }
        if self.default_task_timeout_s == 0 {
            return Err(ConfigError::InvalidTaskTimeout(self.default_task_timeout_s));
        }
        if self.initial_reconnect_delay_s > self.max_reconnect_delay_s {
            return Err(ConfigError::InvalidBackoff(
                self.initial_reconnect_delay_s,
                self.max_reconnect_delay_s,
            ));
        }
        if self.default_max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(self.default_max_retries));
        }
        if self.max_history_size == 0 {
            return Err(ConfigError::InvalidHistorySize(self.max_history_size));
        }
        Ok(())
    }

    /// Heartbeat timeout: 2x the configured interval.
    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_s * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut cfg = CoordinatorConfig::default();
        cfg.initial_reconnect_delay_s = 400;
        cfg.max_reconnect_delay_s = 300;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBackoff(400, 300))));
    }

    #[test]
    fn rejects_zero_heartbeat_interval() {
        let mut cfg = CoordinatorConfig::default();
        cfg.heartbeat_interval_s = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidHeartbeatInterval(0))));
    }

    #[test]
    fn heartbeat_timeout_is_double_interval() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.heartbeat_timeout(), std::time::Duration::from_secs(60));
    }
}
