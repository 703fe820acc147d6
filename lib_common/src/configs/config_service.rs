//! # Service Configuration
//!
//! Settings are layered, later layers winning for every value they set:
//!
//! 1. built-in defaults,
//! 2. an optional JSON file (`server_buffer.conf`, or `--config-path` /
//!    `BUFFER_CONFIG_PATH`), camelCase keys,
//! 3. environment variables and command line arguments (clap), after `.env`
//!    has been loaded.
//!
//! The merged [`ServiceConfig`] keeps every value optional;
//! [`ServiceConfig::into_settings`] checks the required ones and produces the
//! concrete [`ServiceSettings`] the binary runs with.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "server_buffer.conf";
/// Classic five-field cron: every 6 hours.
pub const DEFAULT_REFRESH_CRON: &str = "0 */6 * * *";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid command line: {0}")]
    Cli(#[from] clap::Error),

    #[error("Failed to read config file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required setting {0}")]
    Missing(&'static str),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(name = "server_buffer", about = "Dune query snapshot buffer service", version)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[clap(long, env = "PORT", help = "Port to listen on for HTTP queries.")]
    pub port: Option<u16>,

    #[clap(long, env = "BUFFER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DUNE_QUERY_ID", help = "Dune query whose results are buffered.")]
    pub dune_query_id: Option<String>,

    #[clap(long, env = "DUNE_API_KEY", hide_env_values = true, help = "Dune API key.")]
    pub dune_api_key: Option<String>,

    #[clap(long, env = "DUNE_API_BASE_URL", help = "Dune API base URL.")]
    pub dune_base_url: Option<String>,

    #[clap(long, env = "DUNE_RESULT_LIMIT", help = "Maximum number of result rows requested.")]
    pub result_limit: Option<u32>,

    #[clap(long, env = "REFRESH_CRON", help = "Cron expression for the recurring refresh.")]
    pub refresh_cron: Option<String>,

    #[clap(long, env = "API_KEY", hide_env_values = true, help = "Shared secret for POST /refresh.")]
    pub api_key: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub dune_query_id: String,
    pub dune_api_key: String,
    pub dune_base_url: String,
    pub result_limit: u32,
    pub refresh_cron: String,
    pub api_key: Option<String>,
}

impl ServiceConfig {
    /// Built-in defaults. Query id and API key have none.
    pub fn defaults() -> Self {
        ServiceConfig {
            port: Some(3001),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            dune_base_url: Some("https://api.dune.com".to_string()),
            result_limit: Some(10_000),
            refresh_cron: Some(DEFAULT_REFRESH_CRON.to_string()),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' for Some values
    fn merge(self, other: ServiceConfig) -> ServiceConfig {
        ServiceConfig {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            dune_query_id: other.dune_query_id.or(self.dune_query_id),
            dune_api_key: other.dune_api_key.or(self.dune_api_key),
            dune_base_url: other.dune_base_url.or(self.dune_base_url),
            result_limit: other.result_limit.or(self.result_limit),
            refresh_cron: other.refresh_cron.or(self.refresh_cron),
            api_key: other.api_key.or(self.api_key),
        }
    }

    /// Checks required values and fills in the rest.
    pub fn into_settings(self) -> Result<ServiceSettings, ConfigError> {
        let merged = ServiceConfig::defaults().merge(self);

        Ok(ServiceSettings {
            port: merged.port.unwrap_or(3001),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            dune_query_id: merged
                .dune_query_id
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("DUNE_QUERY_ID"))?,
            dune_api_key: merged
                .dune_api_key
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("DUNE_API_KEY"))?,
            dune_base_url: merged
                .dune_base_url
                .unwrap_or_else(|| "https://api.dune.com".to_string()),
            result_limit: merged.result_limit.unwrap_or(10_000),
            refresh_cron: merged
                .refresh_cron
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REFRESH_CRON.to_string()),
            api_key: merged.api_key.filter(|s| !s.is_empty()),
        })
    }
}

/// Where the file layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigFile {
    /// The file existed and was merged.
    Loaded(PathBuf),
    /// No file at this path; defaults and environment/CLI only.
    NotFound(PathBuf),
}

/// Merged configuration plus what happened to the file layer, so the caller
/// can report it once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub config: ServiceConfig,
    pub file: ConfigFile,
}

/// Loads `.env`, then layers defaults, the config file and the process
/// environment/arguments.
pub fn load_config() -> Result<LoadedConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_config_from(std::env::args_os())
}

/// Same as [`load_config`] with explicit arguments and without `.env`.
pub fn load_config_from<I, T>(args: I) -> Result<LoadedConfig, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = ServiceConfig::try_parse_from(args)?;

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current = ServiceConfig::defaults();

    let file = if config_file_path.exists() {
        let raw = fs::read_to_string(&config_file_path).map_err(|source| ConfigError::File {
            path: config_file_path.clone(),
            source,
        })?;
        let file_config =
            serde_json::from_str::<ServiceConfig>(&raw).map_err(|source| ConfigError::Parse {
                path: config_file_path.clone(),
                source,
            })?;
        current = current.merge(file_config);
        ConfigFile::Loaded(config_file_path)
    } else {
        ConfigFile::NotFound(config_file_path)
    };

    Ok(LoadedConfig {
        config: current.merge(cli),
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, MutexGuard};

    const SERVICE_VARS: [&str; 10] = [
        "PORT",
        "BUFFER_CONFIG_PATH",
        "LOG_DIR",
        "LOG_LEVEL",
        "DUNE_QUERY_ID",
        "DUNE_API_KEY",
        "DUNE_API_BASE_URL",
        "DUNE_RESULT_LIMIT",
        "REFRESH_CRON",
        "API_KEY",
    ];

    // clap reads the process environment; tests touching it run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clean_env() -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for var in SERVICE_VARS {
            std::env::remove_var(var);
        }
        guard
    }

    fn write_conf(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    const CONF: &str = r#"{ "port": 4100, "duneQueryId": "42", "duneApiKey": "k", "refreshCron": "*/5 * * * *" }"#;

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let _env = clean_env();
        let file = write_conf(CONF);
        let path = file.path().to_str().unwrap();

        let loaded = load_config_from(["server_buffer", "--config-path", path, "--port", "4200"]).unwrap();
        assert_eq!(loaded.file, ConfigFile::Loaded(file.path().to_path_buf()));
        let settings = loaded.config.into_settings().unwrap();

        assert_eq!(settings.port, 4200);
        assert_eq!(settings.dune_query_id, "42");
        assert_eq!(settings.refresh_cron, "*/5 * * * *");
        assert_eq!(settings.result_limit, 10_000);
    }

    #[test]
    fn environment_overrides_file() {
        let _env = clean_env();
        let file = write_conf(CONF);
        std::env::set_var("BUFFER_CONFIG_PATH", file.path());
        std::env::set_var("DUNE_QUERY_ID", "from-env");
        std::env::set_var("REFRESH_CRON", "* * * * * *");

        let loaded = load_config_from(["server_buffer"]);
        for var in SERVICE_VARS {
            std::env::remove_var(var);
        }
        let settings = loaded.unwrap().config.into_settings().unwrap();

        assert_eq!(settings.dune_query_id, "from-env");
        assert_eq!(settings.refresh_cron, "* * * * * *");
        assert_eq!(settings.port, 4100);
        assert_eq!(settings.dune_api_key, "k");
    }

    #[test]
    fn missing_file_is_reported_to_the_caller() {
        let _env = clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");

        let loaded = load_config_from([
            "server_buffer",
            "--config-path",
            path.to_str().unwrap(),
            "--dune-query-id",
            "7",
        ])
        .unwrap();

        assert_eq!(loaded.file, ConfigFile::NotFound(path));
        assert_eq!(loaded.config.dune_query_id.as_deref(), Some("7"));
        assert_eq!(loaded.config.port, Some(3001));
    }

    #[test]
    fn malformed_file_is_reported() {
        let _env = clean_env();
        let file = write_conf("{ port: nope");
        let path = file.path().to_str().unwrap();

        let err = load_config_from(["server_buffer", "--config-path", path]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_query_id_is_an_error() {
        let config = ServiceConfig {
            dune_api_key: Some("k".to_string()),
            ..Default::default()
        };
        let err = config.into_settings().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DUNE_QUERY_ID")));
    }

    #[test]
    fn empty_manual_secret_means_none() {
        let config = ServiceConfig {
            dune_query_id: Some("1".to_string()),
            dune_api_key: Some("k".to_string()),
            api_key: Some(String::new()),
            ..Default::default()
        };
        let settings = config.into_settings().unwrap();
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.port, 3001);
        assert_eq!(settings.refresh_cron, DEFAULT_REFRESH_CRON);
    }
}
