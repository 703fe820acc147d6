//! # Configuration Modules
//!
//! Process configuration for the buffer service: defaults, an optional JSON
//! file, then environment variables and CLI arguments.

/// Layered `ServiceConfig` and its resolution into `ServiceSettings`.
pub mod config_service;

pub use config_service::{
    ConfigError, ConfigFile, DEFAULT_CONFIG_FILE, DEFAULT_REFRESH_CRON, LoadedConfig, ServiceConfig,
    ServiceSettings, load_config, load_config_from,
};
