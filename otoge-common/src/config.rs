//! Bootstrap configuration loading
//!
//! Resolution priority (highest first):
//! 1. Command-line overrides
//! 2. Environment variables (`OTOGE_SERVICE_*`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file at the default location is not an error: the
//! service logs a warning and starts from defaults. A file named explicitly
//! on the command line must exist, and a malformed file is always an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "OTOGE_SERVICE_";

/// Service configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Bounded wait for a busy player lock on HTTP-triggered runs (0 = wait forever)
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub developer: DeveloperConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Developer-token gate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeveloperConfig {
    /// Require `x-developer-token` on score routes
    #[serde(default)]
    pub enable_check: bool,

    /// Accept developer token applications
    #[serde(default)]
    pub enable_apply: bool,
}

/// Upstream provider endpoints and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub lxns_base_url: Option<String>,
    #[serde(default)]
    pub lxns_developer_token: Option<String>,

    #[serde(default)]
    pub divingfish_base_url: Option<String>,
    #[serde(default)]
    pub divingfish_developer_token: Option<String>,

    #[serde(default)]
    pub wechat_base_url: Option<String>,

    #[serde(default)]
    pub arcade_base_url: Option<String>,
    /// HTTP proxy for arcade traffic
    #[serde(default)]
    pub arcade_proxy: Option<String>,

    /// Per-provider request rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    7100
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("otoge").join("otoge.db"))
        .unwrap_or_else(|| PathBuf::from("./otoge.db"))
}

fn default_lock_wait_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            database_path: default_database_path(),
            lock_wait_ms: default_lock_wait_ms(),
            logging: LoggingConfig::default(),
            developer: DeveloperConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            lxns_base_url: None,
            lxns_developer_token: None,
            divingfish_base_url: None,
            divingfish_developer_token: None,
            wechat_base_url: None,
            arcade_base_url: None,
            arcade_proxy: None,
            requests_per_second: default_requests_per_second(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub bind_host: Option<String>,
    pub bind_port: Option<u16>,
    pub database_path: Option<PathBuf>,
}

/// Default config file location (`<config dir>/otoge/otoge-sync.toml`)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("otoge").join("otoge-sync.toml"))
        .unwrap_or_else(|| PathBuf::from("./otoge-sync.toml"))
}

/// Resolve the effective configuration from all tiers
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<TomlConfig> {
    let mut config = match &overrides.config_path {
        Some(path) => load_toml_config(path)?,
        None => {
            let path = default_config_path();
            if path.exists() {
                load_toml_config(&path)?
            } else {
                warn!(
                    "No config file at {}, using compiled defaults",
                    path.display()
                );
                TomlConfig::default()
            }
        }
    };

    config.apply_env()?;
    config.apply_overrides(overrides);
    Ok(config)
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

impl TomlConfig {
    /// Apply `OTOGE_SERVICE_*` variables from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        if let Some(v) = var("BIND_HOST") {
            self.bind_host = v;
        }
        if let Some(v) = var("BIND_PORT") {
            self.bind_port = parse_env("BIND_PORT", &v)?;
        }
        if let Some(v) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = var("LOCK_WAIT_MS") {
            self.lock_wait_ms = parse_env("LOCK_WAIT_MS", &v)?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("ENABLE_DEVELOPER_CHECK") {
            self.developer.enable_check = parse_env("ENABLE_DEVELOPER_CHECK", &v)?;
        }
        if let Some(v) = var("ENABLE_DEVELOPER_APPLY") {
            self.developer.enable_apply = parse_env("ENABLE_DEVELOPER_APPLY", &v)?;
        }

        let providers = &mut self.providers;
        for (key, slot) in [
            ("LXNS_BASE_URL", &mut providers.lxns_base_url),
            ("LXNS_DEVELOPER_TOKEN", &mut providers.lxns_developer_token),
            ("DIVINGFISH_BASE_URL", &mut providers.divingfish_base_url),
            ("DIVINGFISH_DEVELOPER_TOKEN", &mut providers.divingfish_developer_token),
            ("WECHAT_BASE_URL", &mut providers.wechat_base_url),
            ("ARCADE_BASE_URL", &mut providers.arcade_base_url),
            ("ARCADE_PROXY", &mut providers.arcade_proxy),
        ] {
            if let Some(v) = var(key) {
                *slot = Some(v);
            }
        }

        Ok(())
    }

    /// Apply command-line values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.bind_host {
            self.bind_host = host.clone();
        }
        if let Some(port) = overrides.bind_port {
            self.bind_port = port;
        }
        if let Some(path) = &overrides.database_path {
            self.database_path = path.clone();
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "{}{} has an invalid value: {}",
            ENV_PREFIX, key, value
        ))
    })
}
