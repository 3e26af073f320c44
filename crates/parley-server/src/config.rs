//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// External provider gateway settings.
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL the telephony provider posts webhooks back to.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Maximum connections in the pool.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Session engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Completed agent turns after which a run is force-finalised.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Concurrency ceiling for owners whose agents set none.
    #[serde(default = "default_concurrency_ceiling")]
    pub default_concurrency_ceiling: u32,

    /// Inactivity span after which an IN_PROGRESS run counts as stale.
    #[serde(default = "default_staleness_seconds")]
    pub staleness_seconds: u64,

    /// Seconds between recovery sweeps. Zero disables sweeping.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

/// External provider gateway settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider gateway.
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Bearer token sent with every provider request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt, transient failures only.
    #[serde(default = "default_provider_max_retries")]
    pub max_retries: u32,

    /// Use the in-process scripted provider instead of the gateway.
    /// Local development only.
    #[serde(default)]
    pub scripted: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_db_path() -> String {
    "parley.db".to_string()
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_turns() -> u32 {
    50
}

fn default_concurrency_ceiling() -> u32 {
    5
}

fn default_staleness_seconds() -> u64 {
    300
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_provider_base_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    15_000
}

fn default_provider_max_retries() -> u32 {
    2
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            default_concurrency_ceiling: default_concurrency_ceiling(),
            staleness_seconds: default_staleness_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: None,
            timeout_ms: default_provider_timeout_ms(),
            max_retries: default_provider_max_retries(),
            scripted: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_PUBLIC_URL` overrides `server.public_url`
/// - `PARLEY_DB_PATH` overrides `database.path`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_PROVIDER_BASE_URL` overrides `provider.base_url`
/// - `PARLEY_PROVIDER_API_KEY` overrides `provider.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(url) = std::env::var("PARLEY_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Ok(db_path) = std::env::var("PARLEY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(url) = std::env::var("PARLEY_PROVIDER_BASE_URL") {
        config.provider.base_url = url;
    }
    if let Ok(key) = std::env::var("PARLEY_PROVIDER_API_KEY") {
        config.provider.api_key = Some(key);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = load_config(None).expect("defaults should load");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.max_turns, 50);
        assert_eq!(config.engine.staleness_seconds, 300);
        assert!(!config.provider.scripted);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let toml_src = r#"
            [server]
            port = 9000

            [engine]
            max_turns = 10
        "#;
        let config: Config = toml::from_str(toml_src).expect("partial config should parse");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.engine.max_turns, 10);
        assert_eq!(config.database.path, "parley.db");
        assert_eq!(config.engine.sweep_interval_seconds, 60);
    }
}
