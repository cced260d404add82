//! Ambient concerns: configuration loading and logging setup. Neither is
//! part of the domain or services layer — both are process bootstrap.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigLoader};
pub use logging::{init as init_logging, LogConfig, LogFormat};
