//! Configuration system for Lakeport.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! Configuration is loaded from an explicit path or `lakeport.toml` in the current
//! directory, then overridden by `LAKEPORT_` prefixed environment variables with
//! `__` as the nesting separator (e.g. `LAKEPORT_STORAGE__MOUNTS__LSC=/mnt/lsc`).
//!
//! Settings are loaded once at process start and passed by reference into every
//! run; nothing mutates them afterwards.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level settings for the Lakeport service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding one file per secret, named after the secret.
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,
    /// Scratch directory for per-run working state.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Directory for rolling JSON log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secrets_dir: default_secrets_dir(),
            working_dir: default_working_dir(),
            log_dir: default_log_dir(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            warehouse: WarehouseConfig::default(),
            governance: GovernanceConfig::default(),
        }
    }
}

/// Storage mounts, keyed by lower-cased destination name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mounts: BTreeMap<String, PathBuf>,
}

impl StorageConfig {
    /// Mount root for a named file destination.
    pub fn mount_for(&self, destination: &str) -> Result<&Path, ConfigError> {
        self.mounts
            .get(&destination.to_lowercase())
            .map(PathBuf::as_path)
            .ok_or_else(|| ConfigError::MissingMount {
                destination: destination.to_string(),
            })
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent table readers during extraction.
    pub extract_workers: usize,
    /// Concurrent writers during load.
    pub load_workers: usize,
    /// Rows pulled from a source per round trip.
    pub chunk_size: usize,
    /// Byte threshold after which a delimited output file is rotated.
    pub max_file_bytes: u64,
    /// Timeout applied to every outbound HTTP request.
    pub http_timeout_secs: u64,
    /// Interval between statement status polls.
    pub statement_poll_millis: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_workers: 5,
            load_workers: 20,
            chunk_size: 200_000,
            max_file_bytes: 100 * 1024 * 1024,
            http_timeout_secs: 120,
            statement_poll_millis: 1_000,
        }
    }
}

/// Relational warehouse destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Credentials handed to downstream consumers through the governance service.
    pub readonly_username: Option<String>,
    pub readonly_password: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 5432,
            database: None,
            username: None,
            password: None,
            readonly_username: None,
            readonly_password: None,
        }
    }
}

impl WarehouseConfig {
    fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ConfigError> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingWarehouse {
                field: field.to_string(),
            })
    }

    pub fn host(&self) -> Result<&str, ConfigError> {
        Self::required(&self.host, "host")
    }

    pub fn database(&self) -> Result<&str, ConfigError> {
        Self::required(&self.database, "database")
    }

    pub fn username(&self) -> Result<&str, ConfigError> {
        Self::required(&self.username, "username")
    }

    pub fn password(&self) -> Result<&str, ConfigError> {
        Self::required(&self.password, "password")
    }

    pub fn readonly_username(&self) -> Result<&str, ConfigError> {
        Self::required(&self.readonly_username, "readonly_username")
    }

    pub fn readonly_password(&self) -> Result<&str, ConfigError> {
        Self::required(&self.readonly_password, "readonly_password")
    }
}

/// Governance (access provisioning) service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub url: Option<String>,
    pub username: String,
    /// Name of the secret holding the governance password.
    pub password_secret: String,
    pub no_ssl_verify: bool,
    /// Service user that owns newly created access groups.
    pub default_user: String,
    /// Prefix for resource names registered per warehouse table.
    pub resource_prefix: String,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: "administrator".into(),
            password_secret: "opaladminpassword".into(),
            no_ssl_verify: false,
            default_user: "dsuser_default".into(),
            resource_prefix: "tre".into(),
        }
    }
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/mnt/secrets")
}

fn default_working_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "lakeport", "lakeport")
        .map(|dirs| dirs.cache_dir().join("runs"))
        .unwrap_or_else(|| std::env::temp_dir().join("lakeport"))
}

fn default_log_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "lakeport", "lakeport")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("lakeport-logs"))
}

impl Settings {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::Invalid {
            field: field.to_string(),
            message: message.to_string(),
        };
        if self.pipeline.extract_workers == 0 {
            return Err(invalid("pipeline.extract_workers", "must be at least 1"));
        }
        if self.pipeline.load_workers == 0 {
            return Err(invalid("pipeline.load_workers", "must be at least 1"));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(invalid("pipeline.chunk_size", "must be at least 1"));
        }
        if self.pipeline.max_file_bytes == 0 {
            return Err(invalid("pipeline.max_file_bytes", "must be greater than 0"));
        }
        if self.governance.resource_prefix.trim().is_empty() {
            return Err(invalid("governance.resource_prefix", "must not be empty"));
        }
        Ok(())
    }
}

/// Load settings from defaults, an optional TOML file and the environment.
///
/// When `path` is `None`, `lakeport.toml` in the current directory is used if it
/// exists.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    match path {
        Some(explicit) => {
            figment = figment.merge(Toml::file_exact(explicit));
        }
        None => {
            let local = Path::new("lakeport.toml");
            if local.exists() {
                figment = figment.merge(Toml::file(local));
            }
        }
    }

    // Environment variables (LAKEPORT_WAREHOUSE__HOST, LAKEPORT_PIPELINE__LOAD_WORKERS, etc.)
    figment = figment.merge(Env::prefixed("LAKEPORT_").split("__"));

    let settings: Settings = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    settings.validate()?;
    Ok(settings)
}
