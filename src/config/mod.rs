//! Configuration management for mongo-porter
//!
//! Configuration is layered, highest precedence first:
//! 1. Command-line arguments (applied by the CLI)
//! 2. Environment variables (`MONGO_PORTER_*`)
//! 3. Configuration file (TOML)
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "MONGO_PORTER_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Connection configuration
    pub connection: ConnectionConfig,

    /// Bulk transfer tuning
    pub transfer: TransferConfig,

    /// Progress broadcasting and session retention
    pub progress: ProgressConfig,

    /// Backup file storage
    pub backup: BackupConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests from any origin
    #[serde(default = "default_true")]
    pub cors: bool,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// URI to connect to at start-up; the UI can connect later otherwise
    #[serde(default)]
    pub default_uri: Option<String>,

    /// Server selection / connect timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Maximum pool size
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Bulk transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Documents per cursor chunk for structured exports
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Documents per cursor chunk for CSV exports
    #[serde(default = "default_csv_chunk_size")]
    pub csv_chunk_size: u32,

    /// Maximum number of CSV columns
    #[serde(default = "default_csv_max_fields")]
    pub csv_max_fields: usize,

    /// Documents sampled to infer CSV columns
    #[serde(default = "default_csv_sample_size")]
    pub csv_sample_size: usize,

    /// Nested object levels flattened into dotted CSV columns
    #[serde(default = "default_csv_max_depth")]
    pub csv_max_depth: usize,

    /// Documents per insert during import
    #[serde(default = "default_import_batch_size")]
    pub import_batch_size: usize,

    /// Gzip compression level (0-9)
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,

    /// Encoded chunks buffered between the pipeline and the HTTP body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Resident memory (MiB) above which the pipeline pauses briefly
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
}

/// Progress reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Registry polling interval for asynchronous progress streams
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Heartbeat interval for progress streams
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Hard wall-clock limit for asynchronous progress streams
    #[serde(default = "default_progress_timeout_secs")]
    pub timeout_secs: u64,

    /// Age after which a registered session is swept
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,

    /// Records between progress events in the synchronous scan
    #[serde(default = "default_update_every")]
    pub update_every: u64,
}

/// Backup storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_directory")]
    pub directory: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_app_name() -> String {
    "mongo-porter".to_string()
}

fn default_chunk_size() -> u32 {
    10_000
}

fn default_csv_chunk_size() -> u32 {
    5_000
}

fn default_csv_max_fields() -> usize {
    100
}

fn default_csv_sample_size() -> usize {
    100
}

fn default_csv_max_depth() -> usize {
    3
}

fn default_import_batch_size() -> usize {
    500
}

fn default_gzip_level() -> u32 {
    6
}

fn default_channel_capacity() -> usize {
    16
}

fn default_memory_limit_mb() -> u64 {
    512
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_progress_timeout_secs() -> u64 {
    300
}

fn default_session_retention_secs() -> u64 {
    3_600
}

fn default_update_every() -> u64 {
    100
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from("backups")
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: true,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_uri: None,
            timeout: default_timeout(),
            max_pool_size: default_max_pool_size(),
            app_name: default_app_name(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            csv_chunk_size: default_csv_chunk_size(),
            csv_max_fields: default_csv_max_fields(),
            csv_sample_size: default_csv_sample_size(),
            csv_max_depth: default_csv_max_depth(),
            import_batch_size: default_import_batch_size(),
            gzip_level: default_gzip_level(),
            channel_capacity: default_channel_capacity(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            timeout_secs: default_progress_timeout_secs(),
            session_retention_secs: default_session_retention_secs(),
            update_every: default_update_every(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.display().to_string()),
            _ => ConfigError::InvalidFormat(format!("{}: {e}", path.display())),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from the file (explicit path, or the default path when
    /// it exists) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MONGO_PORTER_*` overrides through the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "server.port".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(uri) = lookup("URI") {
            self.connection.default_uri = Some(uri);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&level).ok_or(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: level.clone(),
            })?;
        }
        if let Some(dir) = lookup("BACKUP_DIR") {
            self.backup.directory = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongo-porter")
            .join("config.toml")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, value: String| -> Result<()> {
            Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value,
            }
            .into())
        };

        if self.transfer.chunk_size == 0 {
            return invalid("transfer.chunk_size", "0".into());
        }
        if self.transfer.csv_chunk_size == 0 {
            return invalid("transfer.csv_chunk_size", "0".into());
        }
        if self.transfer.csv_max_fields == 0 {
            return invalid("transfer.csv_max_fields", "0".into());
        }
        if self.transfer.import_batch_size == 0 {
            return invalid("transfer.import_batch_size", "0".into());
        }
        if self.transfer.channel_capacity == 0 {
            return invalid("transfer.channel_capacity", "0".into());
        }
        if self.transfer.gzip_level > 9 {
            return invalid("transfer.gzip_level", self.transfer.gzip_level.to_string());
        }
        if self.progress.poll_interval_ms == 0 {
            return invalid("progress.poll_interval_ms", "0".into());
        }
        if self.progress.heartbeat_interval_ms == 0 {
            return invalid("progress.heartbeat_interval_ms", "0".into());
        }
        Ok(())
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }
}

impl LogLevel {
    /// Parse a level name, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.transfer.csv_max_fields, 100);
        assert_eq!(config.transfer.import_batch_size, 500);
        assert_eq!(config.progress.retention(), Duration::from_secs(3600));
        assert!(config.connection.default_uri.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 8081

            [transfer]
            chunk_size = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.transfer.chunk_size, 250);
        assert_eq!(config.transfer.csv_chunk_size, 5000);
        assert_eq!(config.progress.poll_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml_str("[server\nport = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9999"),
            ("URI", "mongodb://db:27017"),
            ("LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.connection.default_uri.as_deref(), Some("mongodb://db:27017"));
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_env_rejects_bad_port() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.gzip_level = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/mongo-porter.toml");
        assert!(matches!(
            result,
            Err(crate::error::AdminError::Config(ConfigError::FileNotFound(_)))
        ));
    }
}
